//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use peerlink_core::{EngineConfig, Keypair};

/// Daemon configuration. File: ~/.config/peerlink/config.toml or /etc/peerlink/config.toml.
/// Env overrides: PEERLINK_API_PORT, PEERLINK_LISTEN_PORT, PEERLINK_LISTEN_HOST,
/// PEERLINK_IDENTITY_FILE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP API port (default 8080).
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Interface the peer transport binds to (default 0.0.0.0).
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Peer transport TCP port; 0 picks a free one.
    #[serde(default)]
    pub listen_port: u16,
    /// File holding the node's 32-byte secret key. Created on first start.
    /// Unset means a fresh identity every run.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stream_open_timeout_secs")]
    pub stream_open_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_stream_open_timeout_secs() -> u64 {
    30
}
fn default_transfer_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            listen_host: default_listen_host(),
            listen_port: 0,
            identity_file: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_open_timeout_secs: default_stream_open_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

impl Config {
    /// Engine tunables derived from this config.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stream_open_timeout: Duration::from_secs(self.stream_open_timeout_secs),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            ..EngineConfig::default()
        }
    }

    /// `host:port` the peer transport binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = var("PEERLINK_API_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.api_port = p;
        }
        if let Some(p) = var("PEERLINK_LISTEN_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.listen_port = p;
        }
        if let Some(h) = var("PEERLINK_LISTEN_HOST").filter(|s| !s.trim().is_empty()) {
            self.listen_host = h.trim().to_string();
        }
        if let Some(f) = var("PEERLINK_IDENTITY_FILE").filter(|s| !s.trim().is_empty()) {
            self.identity_file = Some(PathBuf::from(f.trim()));
        }
    }

    /// Node keypair: loaded from `identity_file` when set (and created there
    /// if missing), otherwise freshly generated.
    pub fn keypair(&self) -> anyhow::Result<Keypair> {
        match &self.identity_file {
            Some(path) => load_or_create_keypair(path),
            None => Ok(Keypair::generate()),
        }
    }
}

fn load_or_create_keypair(path: &Path) -> anyhow::Result<Keypair> {
    if path.exists() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read identity file {}", path.display()))?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "identity file {} holds {} bytes, expected 32",
                path.display(),
                bytes.len()
            )
        })?;
        let keypair = Keypair::from_secret_bytes(secret);
        tracing::info!(path = %path.display(), id = %keypair.node_id(), "loaded node identity");
        return Ok(keypair);
    }

    let keypair = Keypair::generate();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create identity directory {}", dir.display()))?;
    }
    write_secret(path, &keypair.secret_bytes())
        .with_context(|| format!("write identity file {}", path.display()))?;
    tracing::info!(path = %path.display(), id = %keypair.node_id(), "created node identity");
    Ok(keypair)
}

fn write_secret(path: &Path, secret: &[u8; 32]) -> std::io::Result<()> {
    use std::io::Write;
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(secret)?;
    file.sync_all()
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerlink/config.toml"));
    out
}

/// First existing file wins; an unreadable or invalid one falls back to defaults.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let path = paths.iter().find(|p| p.exists())?;
    match read_config(path) {
        Ok(c) => {
            tracing::info!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
            None
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&s)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("api_port = 9000\n").unwrap();
        assert_eq!(c.api_port, 9000);
        assert_eq!(c.listen_host, "0.0.0.0");
        assert_eq!(c.listen_port, 0);
        assert_eq!(c.engine().connect_timeout, Duration::from_secs(10));
        assert_eq!(c.engine().transfer_timeout, Duration::from_secs(60));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("PEERLINK_API_PORT", "7000"),
            ("PEERLINK_LISTEN_PORT", "4001"),
            ("PEERLINK_LISTEN_HOST", "127.0.0.1"),
            ("PEERLINK_IDENTITY_FILE", "/var/lib/peerlink/node.key"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.api_port, 7000);
        assert_eq!(c.listen_addr(), "127.0.0.1:4001");
        assert_eq!(
            c.identity_file.as_deref(),
            Some(Path::new("/var/lib/peerlink/node.key"))
        );
    }

    #[test]
    fn bad_env_values_ignored() {
        let mut c = Config::default();
        c.apply_env(|k| match k {
            "PEERLINK_API_PORT" => Some("not-a-port".to_string()),
            "PEERLINK_LISTEN_HOST" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(c.api_port, 8080);
        assert_eq!(c.listen_host, "0.0.0.0");
    }

    #[test]
    fn identity_file_persists_node_id() {
        let dir = std::env::temp_dir().join(format!("peerlink-identity-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let c = Config {
            identity_file: Some(dir.join("keys/node.key")),
            ..Config::default()
        };

        let first = c.keypair().unwrap();
        let second = c.keypair().unwrap();
        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(std::fs::read(dir.join("keys/node.key")).unwrap().len(), 32);

        std::fs::write(dir.join("keys/node.key"), b"short").unwrap();
        assert!(c.keypair().is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn no_identity_file_means_fresh_identity() {
        let c = Config::default();
        assert_ne!(c.keypair().unwrap().node_id(), c.keypair().unwrap().node_id());
    }

    #[test]
    fn first_existing_file_wins() {
        let dir = std::env::temp_dir().join(format!("peerlink-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.toml");
        std::fs::write(&good, "listen_port = 4100\n").unwrap();
        let missing = dir.join("missing.toml");

        let c = load_file(&[missing, good.clone()]).unwrap();
        assert_eq!(c.listen_port, 4100);

        std::fs::write(&good, "listen_port = \"oops\"\n").unwrap();
        assert!(load_file(&[good]).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
