//! PeerLink daemon pieces: configuration, TCP peer transport and HTTP API.

pub mod api;
pub mod config;
pub mod transport;
