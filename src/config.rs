use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

use crate::booking::SelectionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process-wide settings, read once from `ROOMSLOT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub utc_offset: FixedOffset,
    pub selection_policy: SelectionPolicy,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            utc_offset: Utc.fix(),
            selection_policy: SelectionPolicy::Incremental,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(dir) = lookup("ROOMSLOT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("ROOMSLOT_UTC_OFFSET_MINUTES") {
            config.utc_offset = raw
                .parse::<i32>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::Invalid {
                    var: "ROOMSLOT_UTC_OFFSET_MINUTES",
                    value: raw,
                })?;
        }
        if let Some(raw) = lookup("ROOMSLOT_SELECTION_POLICY") {
            config.selection_policy = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "ROOMSLOT_SELECTION_POLICY",
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("ROOMSLOT_COMPACT_THRESHOLD") {
            config.compact_threshold = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "ROOMSLOT_COMPACT_THRESHOLD",
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("ROOMSLOT_METRICS_PORT") {
            config.metrics_port = Some(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "ROOMSLOT_METRICS_PORT",
                value: raw,
            })?);
        }

        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomslot.wal")
    }
}
