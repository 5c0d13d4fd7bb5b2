//! Direct file transfer over a dedicated stream protocol.
//!
//! One stream carries one file: a newline-terminated JSON header
//! (`{"Name": .., "Size": .., "From": ..}`) followed by exactly `Size` raw
//! bytes, then the sender closes its side. Lowercase keys are accepted too.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};

use crate::directory::PeerDirectory;
use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::transport::{InboundStream, Transport};
use crate::types::FileRecord;

/// Longest header line accepted, newline included.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Transfer header. `data` never travels in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Size", alias = "size")]
    pub size: i64,
    #[serde(rename = "From", alias = "from")]
    pub from: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("header not terminated within 64 KiB")]
    Unterminated,
    #[error("bad header json: {0}")]
    Json(#[from] serde_json::Error),
}

pub async fn write_header<W: AsyncWrite + Unpin>(w: &mut W, header: &FileHeader) -> io::Result<()> {
    let mut line = serde_json::to_vec(header)?;
    line.push(b'\n');
    w.write_all(&line).await?;
    w.flush().await
}

/// Read one header line, leaving the reader positioned at the first data byte.
pub async fn read_header<R: AsyncRead + Unpin>(
    r: &mut BufReader<R>,
) -> std::result::Result<FileHeader, HeaderError> {
    let mut line = Vec::new();
    (&mut *r)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if line.last() != Some(&b'\n') {
        return Err(HeaderError::Unterminated);
    }
    Ok(serde_json::from_slice(&line)?)
}

/// Read a whole transfer. `None` for any malformed, truncated or oversized input.
pub async fn receive_file<R: AsyncRead + Unpin>(stream: R, max_file_size: u64) -> Option<FileRecord> {
    let mut reader = BufReader::new(stream);
    let header = match read_header(&mut reader).await {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!(error = %e, "dropping transfer with bad header");
            return None;
        }
    };
    if header.size < 0 || header.size as u64 > max_file_size {
        tracing::debug!(name = %header.name, size = header.size, "dropping transfer with unacceptable size");
        return None;
    }
    let declared = header.size as u64;
    let mut data = Vec::with_capacity(header.size as usize);
    // One byte past the declared size is enough to spot an overlong body.
    if let Err(e) = (&mut reader).take(declared + 1).read_to_end(&mut data).await {
        tracing::debug!(name = %header.name, error = %e, "transfer read failed");
        return None;
    }
    if data.len() as u64 != declared {
        tracing::debug!(
            name = %header.name,
            declared,
            received = data.len(),
            "dropping transfer with mismatched length"
        );
        return None;
    }
    Some(FileRecord {
        name: header.name,
        size: header.size,
        from: header.from,
        data,
    })
}

/// Fully received files keyed by name; a later file replaces an earlier one.
#[derive(Default)]
pub struct FileStore {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, record: FileRecord) {
        self.files.write().await.insert(record.name.clone(), record);
    }

    pub async fn get(&self, name: &str) -> Option<FileRecord> {
        self.files.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> Vec<FileRecord> {
        self.files.read().await.values().cloned().collect()
    }
}

/// Events the transfer handler hands to the rest of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    FileReceived { name: String, from: String },
}

#[derive(Debug, Clone)]
pub struct TransferLimits {
    pub open_timeout: Duration,
    pub write_timeout: Duration,
    pub max_file_size: u64,
}

#[derive(Clone)]
pub struct FileTransfer {
    transport: Arc<dyn Transport>,
    directory: Arc<PeerDirectory>,
    protocol: String,
    limits: TransferLimits,
}

impl FileTransfer {
    /// Register `protocol` with the transport and spawn the inbound accept loop.
    pub async fn start(
        transport: Arc<dyn Transport>,
        directory: Arc<PeerDirectory>,
        store: Arc<FileStore>,
        protocol: &str,
        limits: TransferLimits,
        events: mpsc::UnboundedSender<NodeEvent>,
    ) -> Self {
        let inbound = transport.register_protocol(protocol).await;
        tokio::spawn(accept_loop(inbound, store, events, limits.max_file_size));
        Self {
            transport,
            directory,
            protocol: protocol.to_string(),
            limits,
        }
    }

    /// Send `data` as `file_name` to a peer previously added with `connect`.
    pub async fn send_file(&self, peer_id: &str, file_name: &str, data: Vec<u8>) -> Result<()> {
        let peer: NodeId = peer_id.parse()?;
        if self.directory.get(&peer).await.is_none() {
            return Err(Error::PeerNotFound(peer));
        }
        // The receiver would drop it anyway.
        let size = data.len() as u64;
        if size > self.limits.max_file_size {
            return Err(Error::FileTooLarge {
                size,
                max: self.limits.max_file_size,
            });
        }

        let open = self.transport.open_stream(peer, &self.protocol);
        let mut stream = match tokio::time::timeout(self.limits.open_timeout, open).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(Error::StreamOpenError(e)),
            Err(_) => return Err(Error::StreamOpenTimeout(self.limits.open_timeout)),
        };

        let header = FileHeader {
            name: file_name.to_string(),
            size: data.len() as i64,
            from: self.transport.local_id().to_string(),
        };
        write_header(&mut stream, &header)
            .await
            .map_err(Error::HeaderWriteError)?;

        // The body write runs in its own task so an expired timer can abandon it;
        // aborting the task drops the stream.
        let mut writer = tokio::spawn(async move {
            stream.write_all(&data).await?;
            stream.shutdown().await
        });
        match tokio::time::timeout(self.limits.write_timeout, &mut writer).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(%peer, name = %file_name, size = header.size, "file sent");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(Error::DataWriteError(e)),
            Ok(Err(join)) => Err(Error::DataWriteError(io::Error::new(
                io::ErrorKind::Other,
                join,
            ))),
            Err(_) => {
                writer.abort();
                tracing::warn!(%peer, name = %file_name, "file send timed out");
                Err(Error::TransferTimeout(self.limits.write_timeout))
            }
        }
    }
}

async fn accept_loop(
    mut inbound: mpsc::Receiver<InboundStream>,
    store: Arc<FileStore>,
    events: mpsc::UnboundedSender<NodeEvent>,
    max_file_size: u64,
) {
    while let Some(InboundStream { peer, stream }) = inbound.recv().await {
        let store = store.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let Some(record) = receive_file(stream, max_file_size).await else {
                return;
            };
            tracing::info!(%peer, name = %record.name, size = record.size, "file received");
            let event = NodeEvent::FileReceived {
                name: record.name.clone(),
                from: record.from.clone(),
            };
            store.upsert(record).await;
            let _ = events.send(event);
        });
    }
    tracing::debug!("file protocol handler closed");
}
