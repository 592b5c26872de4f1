//! Configuration management for Jot.
//!
//! Loads and saves engine configuration to a JSON file under a caller
//! supplied config directory. Unknown or missing fields fall back to
//! defaults, so config files from older versions keep working.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JotError, JotResult};

fn default_guest_notes_key() -> String {
    "guest_notes".to_string()
}

fn default_pending_notes_key() -> String {
    "pending_notes".to_string()
}

fn default_base_url() -> String {
    "https://api.jot.example".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_autosave_delay_ms() -> u64 {
    750
}

/// Persisted configuration values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Directory for the local key-value stores. Empty means a
    /// `storage` directory next to the config file.
    #[serde(default)]
    pub storage_dir: String,
    /// Storage key for the guest note collection.
    #[serde(default = "default_guest_notes_key")]
    pub guest_notes_key: String,
    /// Storage key for the pending (awaiting sync) note collection.
    #[serde(default = "default_pending_notes_key")]
    pub pending_notes_key: String,
    /// Base URL of the remote note API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Editor autosave debounce window in milliseconds.
    #[serde(default = "default_autosave_delay_ms")]
    pub autosave_delay_ms: u64,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            storage_dir: String::new(),
            guest_notes_key: default_guest_notes_key(),
            pending_notes_key: default_pending_notes_key(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            autosave_delay_ms: default_autosave_delay_ms(),
        }
    }
}

/// Configuration manager.
pub struct JotConfig {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl JotConfig {
    /// Open (or initialize) the configuration under `config_dir`. A
    /// missing or unreadable file yields defaults, written back so the
    /// file exists for the next run.
    pub fn open(config_dir: impl Into<PathBuf>) -> JotResult<Self> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => ConfigData::default(),
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };
        if !config.config_file.exists() {
            config.save()?;
        }
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> JotResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory for the local key-value stores.
    pub fn storage_dir(&self) -> PathBuf {
        if self.data.storage_dir.is_empty() {
            self.config_dir.join("storage")
        } else {
            PathBuf::from(&self.data.storage_dir)
        }
    }

    pub fn set_storage_dir(&mut self, dir: &str) -> JotResult<()> {
        self.data.storage_dir = dir.to_string();
        self.save()
    }

    pub fn guest_notes_key(&self) -> &str {
        &self.data.guest_notes_key
    }

    pub fn pending_notes_key(&self) -> &str {
        &self.data.pending_notes_key
    }

    pub fn base_url(&self) -> &str {
        &self.data.base_url
    }

    pub fn set_base_url(&mut self, url: &str) -> JotResult<()> {
        if url.is_empty() {
            return Err(JotError::Config("base_url must not be empty".to_string()));
        }
        self.data.base_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.data.request_timeout_secs)
    }

    pub fn set_request_timeout_secs(&mut self, secs: u64) -> JotResult<()> {
        if secs == 0 {
            return Err(JotError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.data.request_timeout_secs = secs;
        self.save()
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.data.autosave_delay_ms)
    }

    pub fn set_autosave_delay_ms(&mut self, ms: u64) -> JotResult<()> {
        self.data.autosave_delay_ms = ms;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = JotConfig::open(temp_dir.path()).unwrap();

        assert_eq!(config.guest_notes_key(), "guest_notes");
        assert_eq!(config.pending_notes_key(), "pending_notes");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.autosave_delay(), Duration::from_millis(750));
        assert_eq!(config.storage_dir(), temp_dir.path().join("storage"));
        assert!(temp_dir.path().join("config.json").exists());
    }

    #[test]
    fn test_config_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut config = JotConfig::open(temp_dir.path()).unwrap();
            config.set_base_url("https://notes.example.net/").unwrap();
            config.set_autosave_delay_ms(300).unwrap();
        }

        {
            let config = JotConfig::open(temp_dir.path()).unwrap();
            assert_eq!(config.base_url(), "https://notes.example.net");
            assert_eq!(config.autosave_delay(), Duration::from_millis(300));
        }
    }

    #[test]
    fn test_rejects_empty_base_url() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = JotConfig::open(temp_dir.path()).unwrap();
        assert!(config.set_base_url("").is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = JotConfig::open(temp_dir.path()).unwrap();
        assert!(config.set_request_timeout_secs(0).is_err());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("config.json"), "not json").unwrap();

        let config = JotConfig::open(temp_dir.path()).unwrap();
        assert_eq!(config.guest_notes_key(), "guest_notes");
    }

    #[test]
    fn test_partial_file_fills_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("config.json"),
            r#"{"base_url": "https://other.example"}"#,
        )
        .unwrap();

        let config = JotConfig::open(temp_dir.path()).unwrap();
        assert_eq!(config.base_url(), "https://other.example");
        assert_eq!(config.pending_notes_key(), "pending_notes");
    }
}
