//! Coordinator configuration.

use serde::Deserialize;
use std::path::PathBuf;

fn default_mk_dir_mode() -> u32 {
    0o750
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_idle_check_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Data directory root. Every table is a subdirectory of this
    /// path.
    pub root: PathBuf,

    /// Permission bits applied to directories this crate creates.
    #[serde(default = "default_mk_dir_mode")]
    pub mk_dir_mode: u32,

    /// Capacity of the telemetry ring.
    #[serde(default = "default_queue_capacity")]
    pub telemetry_queue_capacity: usize,

    /// Maintenance-job cadence, in milliseconds.
    #[serde(default = "default_idle_check_interval_ms")]
    pub idle_check_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            mk_dir_mode: default_mk_dir_mode(),
            telemetry_queue_capacity: default_queue_capacity(),
            idle_check_interval_ms: default_idle_check_interval_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.telemetry_queue_capacity == 0 {
            return Err("telemetry_queue_capacity must be at least 1".to_string());
        }
        if self.idle_check_interval_ms == 0 {
            return Err("idle_check_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let config = CoordinatorConfig {
            telemetry_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overriding_root_keeps_other_fields_at_default() {
        let config = CoordinatorConfig {
            root: PathBuf::from("/data"),
            ..Default::default()
        };
        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.mk_dir_mode, 0o750);
    }
}
