//! Daemon configuration (SPEC_FULL.md's ambient-stack section): a TOML
//! file read once at startup, parsed with `serde`/`toml` the way the
//! teacher's own config module does, with defaults for everything so a
//! missing file still runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_variable_store_timeout_ms() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_grab_retries() -> u32 {
    3
}
fn default_grab_retry_backoff_ms() -> u64 {
    100
}
fn default_panic_codeword() -> String {
    "inputremapperpanicquit".to_string()
}
fn default_panic_escalation_interval_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Bounds `VariableStore::get`/`is_alive` (spec.md §4.8, default 20ms).
    pub variable_store_timeout_ms: u64,
    /// Overridden by `RUST_LOG` if set; this is only the fallback.
    pub log_level: String,
    /// Devnode grab retry count before `InjectionError::NoGrab` (spec.md §7).
    pub grab_retries: u32,
    pub grab_retry_backoff_ms: u64,
    /// The fixed key sequence the panic watchdog listens for.
    pub panic_codeword: String,
    /// Grace interval between SIGTERM and SIGKILL escalation.
    pub panic_escalation_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            variable_store_timeout_ms: default_variable_store_timeout_ms(),
            log_level: default_log_level(),
            grab_retries: default_grab_retries(),
            grab_retry_backoff_ms: default_grab_retry_backoff_ms(),
            panic_codeword: default_panic_codeword(),
            panic_escalation_interval_secs: default_panic_escalation_interval_secs(),
        }
    }
}

impl DaemonConfig {
    /// Reads and parses a TOML config file. A missing file is not an
    /// error — the caller is expected to fall back to `default()`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn variable_store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.variable_store_timeout_ms)
    }

    pub fn grab_retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.grab_retry_backoff_ms)
    }

    pub fn panic_escalation_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.panic_escalation_interval_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = DaemonConfig::default();
        assert_eq!(config.variable_store_timeout_ms, 20);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.panic_codeword, "inputremapperpanicquit");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: DaemonConfig = toml::from_str("log_level = \"debug\"\n").unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.grab_retries, 3);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = DaemonConfig::load(Path::new("/nonexistent/inputremapd.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
