//! Logging setup for the havg binaries.
//!
//! Console output is always structured through `tracing`; a rolling file
//! layer is added when a log directory is configured. `RUST_LOG` overrides
//! the configured level filter.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files; console-only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Prefix for rolled log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Roll files daily; `false` keeps a single file.
    #[serde(default = "default_daily")]
    pub daily: bool,

    /// Emit JSON instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "havg".into()
}

fn default_daily() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            file_prefix: default_prefix(),
            daily: default_daily(),
            json: false,
        }
    }
}

/// Install the global subscriber. Call once at startup; the returned guard
/// must live as long as the process so buffered file output is flushed.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let rotation = if config.daily {
                rolling::Rotation::DAILY
            } else {
                rolling::Rotation::NEVER
            };
            let appender = rolling::RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .expect("failed to create rolling file appender");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
                Box::new(fmt::layer().json().with_ansi(false).with_writer(writer))
            } else {
                Box::new(fmt::layer().with_ansi(false).with_writer(writer))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
        Box::new(fmt::layer().json())
    } else {
        Box::new(fmt::layer())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.file_prefix, "havg");
        assert!(cfg.daily);
        assert!(cfg.dir.is_none());
        assert!(!cfg.json);
    }

    #[test]
    fn test_toml_partial_config() {
        let cfg: LoggingConfig = toml::from_str("level = \"debug\"\njson = true").unwrap();
        assert_eq!(cfg.level, "debug");
        assert!(cfg.json);
        assert_eq!(cfg.file_prefix, "havg");
    }
}
