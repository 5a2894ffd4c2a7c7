// Mesh configuration: protocol timing and size limits
//
// Persisted as JSON; every field has a default so partial files load.

use crate::MeshError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bytes an `ExchangeEnvelope` + `ExchangePackage` add around a segment,
/// not counting the sender's full name.
pub const ENVELOPE_OVERHEAD: usize = 36;

/// Longest full name the envelope header must be able to carry
/// (64-byte display name, separator, 36-char UUID, rounded up).
pub const MAX_FULL_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Largest payload a single transport send accepts (bytes)
    pub max_transport_payload: usize,

    /// Snapshot bytes carried per exchange package
    pub max_segment_size: usize,

    /// How often neighbors are checked for staleness (seconds)
    pub liveness_sweep_secs: u64,

    /// A neighbor silent for longer than this gets pinged (seconds)
    pub last_connection_interval_secs: u64,

    /// An unanswered ping evicts the neighbor after this long (seconds)
    pub ping_timeout_secs: u64,

    /// How often exchange bookkeeping runs (seconds)
    pub exchange_sweep_secs: u64,

    /// Neighbors whose graph we have not received for this long are asked again (seconds)
    pub last_exchange_interval_secs: u64,

    /// An unacknowledged segment idle this long is sent again (seconds)
    pub segment_resend_secs: u64,

    /// A pending exchange idle this long is abandoned (seconds)
    pub pending_cleanup_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_transport_payload: 512,
            max_segment_size: 320,
            liveness_sweep_secs: 30,
            last_connection_interval_secs: 30,
            ping_timeout_secs: 10,
            exchange_sweep_secs: 30,
            last_exchange_interval_secs: 60,
            segment_resend_secs: 30,
            pending_cleanup_secs: 120,
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), MeshError> {
        let intervals = [
            ("liveness_sweep_secs", self.liveness_sweep_secs),
            (
                "last_connection_interval_secs",
                self.last_connection_interval_secs,
            ),
            ("ping_timeout_secs", self.ping_timeout_secs),
            ("exchange_sweep_secs", self.exchange_sweep_secs),
            ("last_exchange_interval_secs", self.last_exchange_interval_secs),
            ("segment_resend_secs", self.segment_resend_secs),
            ("pending_cleanup_secs", self.pending_cleanup_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(MeshError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }

        if self.max_segment_size == 0 {
            return Err(MeshError::InvalidConfig(
                "max_segment_size must be > 0".to_string(),
            ));
        }

        let framed = self.max_segment_size + ENVELOPE_OVERHEAD + MAX_FULL_NAME_LEN;
        if framed > self.max_transport_payload {
            return Err(MeshError::InvalidConfig(format!(
                "max_segment_size {} does not fit a {} byte transport payload ({} bytes framed)",
                self.max_segment_size, self.max_transport_payload, framed
            )));
        }

        Ok(())
    }

    pub fn liveness_sweep(&self) -> Duration {
        Duration::from_secs(self.liveness_sweep_secs)
    }

    pub fn exchange_sweep(&self) -> Duration {
        Duration::from_secs(self.exchange_sweep_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub(crate) fn last_connection_interval_ms(&self) -> u64 {
        self.last_connection_interval_secs * 1000
    }

    pub(crate) fn last_exchange_interval_ms(&self) -> u64 {
        self.last_exchange_interval_secs * 1000
    }

    pub(crate) fn segment_resend_ms(&self) -> u64 {
        self.segment_resend_secs * 1000
    }

    pub(crate) fn pending_cleanup_ms(&self) -> u64 {
        self.pending_cleanup_secs * 1000
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: MeshConfig =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        assert!(MeshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MeshConfig {
            ping_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MeshError::InvalidConfig(msg)) if msg.contains("ping_timeout_secs")
        ));
    }

    #[test]
    fn test_segment_must_fit_payload() {
        let config = MeshConfig {
            max_segment_size: 400,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MeshConfig {
            max_segment_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mesh.json");

        let config = MeshConfig {
            liveness_sweep_secs: 5,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = MeshConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mesh.json");
        std::fs::write(&path, r#"{ "ping_timeout_secs": 3 }"#).unwrap();

        let loaded = MeshConfig::load(&path).unwrap();
        assert_eq!(loaded.ping_timeout_secs, 3);
        assert_eq!(loaded.max_segment_size, 320);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mesh.json");
        std::fs::write(&path, r#"{ "exchange_sweep_secs": 0 }"#).unwrap();
        assert!(MeshConfig::load(&path).is_err());
    }
}
