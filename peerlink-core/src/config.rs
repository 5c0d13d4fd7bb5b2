//! Engine tunables. Defaults match the protocol's fixed bounds.

use std::time::Duration;

use crate::protocol::{FILE_PROTOCOL, MESSAGE_TOPIC};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
/// Largest file accepted on either side (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on a single `connect` attempt.
    pub connect_timeout: Duration,
    /// Bound on opening an outbound file stream.
    pub stream_open_timeout: Duration,
    /// Bound on writing a file body.
    pub transfer_timeout: Duration,
    /// Inbound transfers declaring more than this are dropped.
    pub max_file_size: u64,
    pub topic: String,
    pub file_protocol: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream_open_timeout: DEFAULT_STREAM_OPEN_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            topic: MESSAGE_TOPIC.to_string(),
            file_protocol: FILE_PROTOCOL.to_string(),
        }
    }
}
