//! Configuration for the domkit runtime.

use crate::runtime::constants::{defaults, envs as const_envs};
use dirs::home_dir;
use domkit_shared::errors::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Logging Options
// ============================================================================

/// Where and how verbosely the runtime logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingOptions {
    /// Default filter directive when `RUST_LOG` is not set.
    ///
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to a daily-rolling file under `<home_dir>/logs` instead of stderr.
    ///
    /// Default: false
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

// ============================================================================
// Runtime Options
// ============================================================================

/// Options shared by every domain the runtime constructs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Runtime home directory (logs live here).
    ///
    /// Default: `$DOMKIT_HOME`, else `~/.domkit`
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// Verify kernel and ramdisk files exist before building a new domain.
    ///
    /// Default: true
    #[serde(default = "default_check_boot_files")]
    pub check_boot_files: bool,

    /// Kernel command lines at or above this length are logged as too long.
    ///
    /// Default: 256
    #[serde(default = "default_max_cmdline_len")]
    pub max_cmdline_len: usize,

    #[serde(default)]
    pub logging: LoggingOptions,
}

fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(const_envs::DOMKIT_HOME) {
        return PathBuf::from(home);
    }
    home_dir()
        .map(|home| home.join(defaults::HOME_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp").join(defaults::HOME_DIR_NAME))
}

fn default_check_boot_files() -> bool {
    true
}

fn default_max_cmdline_len() -> usize {
    defaults::MAX_CMDLINE_LEN
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            check_boot_files: default_check_boot_files(),
            max_cmdline_len: default_max_cmdline_len(),
            logging: LoggingOptions::default(),
        }
    }
}

impl RuntimeOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> DomainResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|e| {
            DomainError::Internal(format!("invalid options file {}: {}", path.display(), e))
        })
    }

    /// Parse options from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Directory for log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(defaults::LOGS_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = RuntimeOptions::default();
        assert!(options.check_boot_files);
        assert_eq!(options.max_cmdline_len, 256);
        assert_eq!(options.logging.level, "info");
        assert!(!options.logging.to_file);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let options =
            RuntimeOptions::from_json_str(r#"{"check_boot_files": false, "logging": {"to_file": true}}"#)
                .unwrap();
        assert!(!options.check_boot_files);
        assert_eq!(options.max_cmdline_len, 256);
        assert!(options.logging.to_file);
        assert_eq!(options.logging.level, "info");
    }

    #[test]
    fn test_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("domkit.json");
        std::fs::write(
            &path,
            format!(r#"{{"home_dir": "{}", "max_cmdline_len": 128}}"#, dir.path().display()),
        )
        .unwrap();

        let options = RuntimeOptions::from_json_file(&path).unwrap();
        assert_eq!(options.home_dir, dir.path());
        assert_eq!(options.max_cmdline_len, 128);
        assert_eq!(options.logs_dir(), dir.path().join("logs"));
    }

    #[test]
    fn test_invalid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = RuntimeOptions::from_json_file(&path).unwrap_err();
        assert!(err.to_string().contains("invalid options file"));
    }
}
