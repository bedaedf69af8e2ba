//! Host configuration.
//!
//! Everything here can also be set programmatically; the TOML form exists
//! so binaries can keep mount settings next to their logging settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capability::Capabilities;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// `argv[0]` handed to the native library; shows up in its messages.
    #[serde(default = "default_program_name")]
    pub program_name: String,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default)]
    pub readdir_plus: bool,

    #[serde(default)]
    pub delete_access: bool,

    #[serde(default)]
    pub open_trunc: bool,

    /// Mark every opened file `direct_io`, bypassing the kernel page cache.
    #[serde(default)]
    pub direct_io: bool,

    /// Unmount on SIGINT / SIGTERM while mounted (POSIX only).
    #[serde(default = "default_true")]
    pub signal_unmount: bool,

    /// Extra native options appended after the caller's options.
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_program_name() -> String {
    std::env::args()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "fusehost".into())
}

fn default_true() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            program_name: default_program_name(),
            case_insensitive: false,
            readdir_plus: false,
            delete_access: false,
            open_trunc: false,
            direct_io: false,
            signal_unmount: true,
            options: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The capability set an implementation asks for at `init`.
    pub fn requested_capabilities(&self) -> Capabilities {
        Capabilities {
            case_insensitive: self.case_insensitive,
            readdir_plus: self.readdir_plus,
            delete_access: self.delete_access,
            open_trunc: self.open_trunc,
            stat_ex: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = HostConfig::default();
        assert!(cfg.signal_unmount);
        assert!(!cfg.direct_io);
        assert!(!cfg.program_name.is_empty());
        assert_eq!(cfg.requested_capabilities(), Capabilities::default());
    }

    #[test]
    fn test_from_toml() {
        let cfg = HostConfig::from_toml_str(
            r#"
            program_name = "memfs"
            case_insensitive = true
            direct_io = true
            signal_unmount = false
            options = ["-o", "ro"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.program_name, "memfs");
        assert!(cfg.direct_io);
        assert!(!cfg.signal_unmount);
        assert_eq!(cfg.options, vec!["-o", "ro"]);
        assert!(cfg.requested_capabilities().case_insensitive);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "readdir_plus = true").unwrap();
        let cfg = HostConfig::load(file.path()).unwrap();
        assert!(cfg.readdir_plus);
        assert!(cfg.signal_unmount);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            HostConfig::from_toml_str("direct_io = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            HostConfig::load("/nonexistent/fusehost.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
