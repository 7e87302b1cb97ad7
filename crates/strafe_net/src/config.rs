//! # Network Configuration
//!
//! Tunables read from a TOML file. Every key is optional; a missing file
//! section falls back to its default.
//!
//! ```toml
//! [channel]
//! show_packets = false
//! show_drop = true
//! compression = "packet"     # off | packet | stream
//!
//! [snapshot]
//! max_delta_age = 29
//! rate = 25000               # bytes per second
//!
//! [transport]
//! bind = "0.0.0.0:27960"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use strafe_shared::constants::PORT_SERVER;

use crate::error::{NetError, NetResult};
use crate::snapshot::MAX_DELTA_AGE;

/// Slowest accepted client rate, bytes per second.
pub const MIN_RATE: u32 = 1000;
/// Fastest accepted client rate, bytes per second.
pub const MAX_RATE: u32 = 90_000;

/// How message payloads are entropy-coded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Payloads go out raw.
    Off,
    /// Fresh Huffman trees for every message; survives packet loss.
    #[default]
    Packet,
    /// Trees persist for the whole connection; any loss is fatal.
    Stream,
}

/// `[channel]` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Log every packet sent and received.
    pub show_packets: bool,
    /// Log drops and rejections.
    pub show_drop: bool,
    /// Payload compression.
    pub compression: CompressionMode,
}

/// `[snapshot]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Oldest acknowledged message still used as a delta baseline.
    pub max_delta_age: i32,
    /// Send budget per client, bytes per second.
    pub rate: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_delta_age: MAX_DELTA_AGE,
            rate: 25_000,
        }
    }
}

/// `[transport]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local socket address.
    pub bind: SocketAddr,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], PORT_SERVER)),
        }
    }
}

/// Full configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Netchan settings.
    pub channel: ChannelConfig,
    /// Snapshot settings.
    pub snapshot: SnapshotConfig,
    /// Socket settings.
    pub transport: TransportConfig,
}

impl NetConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] on syntax errors, unknown values or
    /// out-of-range numbers.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// [`NetError::Io`] if the file exists but cannot be read, otherwise
    /// see [`NetConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            tracing::info!(path = %path.display(), "no network config, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            compression = ?config.channel.compression,
            rate = config.snapshot.rate,
            bind = %config.transport.bind,
            "network config loaded"
        );
        Ok(config)
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> NetResult<()> {
        if !(1..=MAX_DELTA_AGE).contains(&self.snapshot.max_delta_age) {
            return Err(NetError::InvalidConfig(format!(
                "snapshot.max_delta_age must be in 1..={MAX_DELTA_AGE}, got {}",
                self.snapshot.max_delta_age
            )));
        }
        if !(MIN_RATE..=MAX_RATE).contains(&self.snapshot.rate) {
            return Err(NetError::InvalidConfig(format!(
                "snapshot.rate must be in {MIN_RATE}..={MAX_RATE}, got {}",
                self.snapshot.rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.channel.compression, CompressionMode::Packet);
        assert_eq!(config.snapshot.max_delta_age, 29);
        assert_eq!(config.transport.bind.port(), 27960);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = NetConfig::from_toml_str(
            r#"
            [channel]
            show_drop = true
            compression = "stream"

            [snapshot]
            rate = 8000
            "#,
        )
        .unwrap();
        assert!(config.channel.show_drop);
        assert!(!config.channel.show_packets);
        assert_eq!(config.channel.compression, CompressionMode::Stream);
        assert_eq!(config.snapshot.rate, 8000);
        assert_eq!(config.snapshot.max_delta_age, 29);
    }

    #[test]
    fn test_bind_address() {
        let config = NetConfig::from_toml_str("[transport]\nbind = \"127.0.0.1:5000\"\n").unwrap();
        assert_eq!(config.transport.bind, SocketAddr::from(([127, 0, 0, 1], 5000)));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            NetConfig::from_toml_str("[channel]\ncompression = \"zstd\"\n"),
            Err(NetError::InvalidConfig(_))
        ));
        assert!(matches!(
            NetConfig::from_toml_str("[snapshot]\nmax_delta_age = 40\n"),
            Err(NetError::InvalidConfig(msg)) if msg.contains("max_delta_age")
        ));
        assert!(matches!(
            NetConfig::from_toml_str("[snapshot]\nrate = 10\n"),
            Err(NetError::InvalidConfig(msg)) if msg.contains("rate")
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = NetConfig::load("/definitely/not/here/net.toml").unwrap();
        assert_eq!(config, NetConfig::default());
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("strafe_net_config_{}.toml", std::process::id()));
        std::fs::write(&path, "[channel]\nshow_packets = true\n").unwrap();
        let config = NetConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(config.channel.show_packets);
    }
}
