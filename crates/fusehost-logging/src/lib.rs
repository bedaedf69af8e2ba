//! Logging setup shared by fusehost binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! binary's decision, made once through [`init_logging`].

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

pub use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive (`info`, `fusehost=debug`, ...). `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rolling log files. No file output when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// "hourly", "daily" or "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    /// Mirror events to stderr. A mounted filesystem usually has no terminal
    /// to write stdout to once the shell returns.
    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "fusehost".into()
}

fn default_rotation() -> String {
    "daily".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    fn rotation(&self) -> rolling::Rotation {
        match self.rotation.as_str() {
            "hourly" => rolling::Rotation::HOURLY,
            "never" => rolling::Rotation::NEVER,
            _ => rolling::Rotation::DAILY,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(writer: W, json: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_writer(writer).boxed()
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the program. Calling this twice is harmless: the second
/// subscriber is discarded.
pub fn init_logging(config: &LogConfig) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.console_output {
        layers.push(format_layer(io::stderr, config.json_format));
    }

    let guard = match config.log_dir {
        Some(ref dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .map_err(io::Error::other)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(format_layer(writer, config.json_format));
            Some(guard)
        }
        None => None,
    };

    // `try_init` so a host embedded in a process that already set up
    // tracing keeps the existing subscriber.
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.file_prefix, "fusehost");
        assert!(cfg.console_output);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: LogConfig = toml::from_str("level = \"debug\"\njson_format = true\n").unwrap();
        assert_eq!(cfg.level, "debug");
        assert!(cfg.json_format);
        assert_eq!(cfg.rotation, "daily");
    }

    #[test]
    fn test_rotation_mapping() {
        let mut cfg = LogConfig::default();
        cfg.rotation = "hourly".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::HOURLY);
        cfg.rotation = "bogus".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::DAILY);
    }

    #[test]
    fn test_init_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig {
            log_dir: Some(dir.path().to_path_buf()),
            console_output: false,
            ..Default::default()
        };
        let guard = init_logging(&cfg).unwrap();
        assert!(guard.is_some());
        tracing::info!("written to file");
        drop(guard);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
    }
}
