//! Cluster configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use havg_types::{make_error_msg, Duration, Result, StatusCode};

/// Per-process configuration for a coordination node.
///
/// Durations are plain milliseconds so the struct round-trips cleanly
/// through TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Stable name this node registers under.
    pub host_name: String,

    /// Heartbeat publish period.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A node is declared dead after `heartbeat_interval * dead_multiple`
    /// without a heartbeat.
    #[serde(default = "default_dead_multiple")]
    pub dead_multiple: u32,

    /// Consecutive heartbeat failures before the node fences itself.
    #[serde(default = "default_max_heartbeat_misses")]
    pub max_heartbeat_misses: u32,

    /// Wall-clock budget for any single store operation.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Script invoked as `script up|down <vg> <ip> <mask> <nic>`.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,

    /// Budget for one script invocation.
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,

    /// Capacity of the watcher-to-controller event channel.
    #[serde(default = "default_event_queue_len")]
    pub event_queue_len: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

fn default_dead_multiple() -> u32 {
    10
}

fn default_max_heartbeat_misses() -> u32 {
    3
}

fn default_op_timeout_ms() -> u64 {
    5_000
}

fn default_script_path() -> PathBuf {
    PathBuf::from("/usr/libexec/havg/vg_up_down.sh")
}

fn default_script_timeout_ms() -> u64 {
    30_000
}

fn default_event_queue_len() -> usize {
    256
}

impl ClusterConfig {
    /// Defaults for the given host name.
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            dead_multiple: default_dead_multiple(),
            max_heartbeat_misses: default_max_heartbeat_misses(),
            op_timeout_ms: default_op_timeout_ms(),
            script_path: default_script_path(),
            script_timeout_ms: default_script_timeout_ms(),
            event_queue_len: default_event_queue_len(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_name.is_empty() {
            return make_error_msg(StatusCode::INVALID_CONFIG, "host_name must not be empty");
        }
        if self.host_name.contains(':') {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "host_name must not contain ':'",
            );
        }
        if self.heartbeat_interval_ms == 0 {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "heartbeat_interval_ms must be positive",
            );
        }
        if self.dead_multiple < 2 {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "dead_multiple must be at least 2",
            );
        }
        if self.max_heartbeat_misses == 0 {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "max_heartbeat_misses must be positive",
            );
        }
        if self.op_timeout_ms == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "op_timeout_ms must be positive");
        }
        if self.event_queue_len == 0 {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "event_queue_len must be positive",
            );
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence longer than this marks a node dead.
    pub fn dead_threshold(&self) -> Duration {
        self.heartbeat_interval().mul(self.dead_multiple)
    }

    /// Lease time-to-live: aligned with the dead threshold so the store's
    /// fail-stop and the peers' verdict agree.
    pub fn lease_ttl(&self) -> Duration {
        self.dead_threshold()
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ClusterConfig::new("node-1");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.heartbeat_interval().as_millis(), 1_000);
        assert_eq!(cfg.dead_threshold().as_secs(), 10);
        assert_eq!(cfg.op_timeout().as_secs(), 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = ClusterConfig::new("");
        assert!(cfg.validate().is_err());

        cfg.host_name = "a:b".into();
        assert!(cfg.validate().is_err());

        cfg.host_name = "ok".into();
        cfg.dead_multiple = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_defaults() {
        let cfg: ClusterConfig = toml::from_str("host_name = \"node-2\"").unwrap();
        assert_eq!(cfg.host_name, "node-2");
        assert_eq!(cfg.heartbeat_interval_ms, 1_000);
        assert_eq!(cfg.dead_multiple, 10);
        assert_eq!(cfg.max_heartbeat_misses, 3);

        let text = toml::to_string(&cfg).unwrap();
        let back: ClusterConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.host_name, cfg.host_name);
        assert_eq!(back.op_timeout_ms, cfg.op_timeout_ms);
    }
}
