//! Network engine: the one object the HTTP layer talks to.
//!
//! Owns the peer directory, message log and file store, each behind its own
//! reader/writer lock, and wires the broadcast channel and the file-transfer
//! handler to the transport. File receipts reach the broadcast channel through
//! an internal event queue drained by a notifier task.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::address::format_local;
use crate::broadcast::{BroadcastChannel, ListenerState, MessageLog};
use crate::config::EngineConfig;
use crate::directory::PeerDirectory;
use crate::error::Result;
use crate::identity::NodeId;
use crate::transfer::{FileStore, FileTransfer, NodeEvent, TransferLimits};
use crate::transport::Transport;
use crate::types::{FileRecord, Message, PeerRecord};

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct NetworkEngine {
    transport: Arc<dyn Transport>,
    config: Arc<EngineConfig>,
    directory: Arc<PeerDirectory>,
    messages: Arc<MessageLog>,
    files: Arc<FileStore>,
    broadcast: BroadcastChannel,
    transfer: FileTransfer,
}

impl NetworkEngine {
    /// Subscribe to the message topic, register the file protocol and spawn
    /// the background tasks. Must be called inside a tokio runtime.
    pub async fn start(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        let directory = Arc::new(PeerDirectory::new());
        let messages = Arc::new(MessageLog::new());
        let files = Arc::new(FileStore::new());

        let broadcast =
            BroadcastChannel::start(transport.clone(), &config.topic, messages.clone()).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let limits = TransferLimits {
            open_timeout: config.stream_open_timeout,
            write_timeout: config.transfer_timeout,
            max_file_size: config.max_file_size,
        };
        let transfer = FileTransfer::start(
            transport.clone(),
            directory.clone(),
            files.clone(),
            &config.file_protocol,
            limits,
            events_tx,
        )
        .await;
        tokio::spawn(notify_loop(events_rx, broadcast.clone()));

        tracing::info!(id = %transport.local_id(), "network engine started");
        Ok(Self {
            transport,
            config: Arc::new(config),
            directory,
            messages,
            files,
            broadcast,
            transfer,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.transport.local_id()
    }

    /// `addr/p2p/id` for the first advertised address, or `""` when there is none.
    pub fn local_address(&self) -> String {
        match self.transport.listen_addrs().first() {
            Some(addr) => format_local(*addr, self.local_id()),
            None => String::new(),
        }
    }

    pub async fn connect(&self, address: &str) -> Result<PeerRecord> {
        self.directory
            .connect(
                self.transport.as_ref(),
                address,
                self.config.connect_timeout,
            )
            .await
    }

    pub async fn list_peers(&self) -> Vec<PeerRecord> {
        self.directory.snapshot().await
    }

    pub async fn broadcast(&self, content: &str) -> Result<()> {
        self.broadcast.broadcast(content).await
    }

    pub async fn list_messages(&self) -> Vec<Message> {
        self.messages.snapshot().await
    }

    pub async fn send_file(&self, peer_id: &str, file_name: &str, data: Vec<u8>) -> Result<()> {
        self.transfer.send_file(peer_id, file_name, data).await
    }

    pub async fn list_files(&self) -> Vec<FileRecord> {
        self.files.snapshot().await
    }

    /// Look up a received file by name.
    pub async fn file(&self, name: &str) -> Option<FileRecord> {
        self.files.get(name).await
    }

    pub fn listener_state(&self) -> ListenerState {
        self.broadcast.listener_state()
    }

    /// Resolves when the gossip listener stops.
    pub async fn listener_stopped(&self) -> ListenerState {
        self.broadcast.stopped().await
    }
}

async fn notify_loop(mut events: mpsc::UnboundedReceiver<NodeEvent>, broadcast: BroadcastChannel) {
    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::FileReceived { name, from } => {
                let notice = format!("Received file: {} from {}", name, from);
                if let Err(e) = broadcast.broadcast(&notice).await {
                    tracing::debug!(error = %e, "file receipt notice not published");
                }
            }
        }
    }
}
