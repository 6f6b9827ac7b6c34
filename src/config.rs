/// Runtime configuration, read from a TOML file.
///
/// Every field has a default, so an empty or partial file is valid and a
/// missing file simply means "all defaults". The file is never written back.
///
/// Example:
///
///   log_path         = "C:/Users/me/AppData/Roaming/zaap/wakfu/logs/wakfu_chat.log"
///   definitions_path = "combos.json"
///   poll_interval_ms = 100
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// The chat/combat log to tail (empty = nothing configured yet)
    #[serde(default)]
    pub log_path: PathBuf,

    /// Action and combo definitions (JSON). Missing or broken falls back to
    /// the built-in set.
    #[serde(default = "default_definitions_path")]
    pub definitions_path: PathBuf,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Identical lines inside this window are processed once
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Where the rolling diagnostic log is written
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Skip whatever the log already holds at start-up
    #[serde(default = "default_start_at_end")]
    pub start_at_end: bool,
}

fn default_definitions_path() -> PathBuf { PathBuf::from("combos.json") }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_dedup_window_ms() -> u64 { 500 }
fn default_start_at_end() -> bool { true }

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("combo-watch").join("logs")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path:         PathBuf::new(),
            definitions_path: default_definitions_path(),
            poll_interval_ms: default_poll_interval_ms(),
            dedup_window_ms:  default_dedup_window_ms(),
            log_dir:          default_log_dir(),
            start_at_end:     default_start_at_end(),
        }
    }
}

impl AppConfig {
    /// Never zero: `tokio::time::interval` panics on a zero period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let cfg: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Config parse error in {}: {}", path.display(), e))?;
        Ok(cfg)
    } else {
        Ok(AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempdir().unwrap();
        let cfg = load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert!(cfg.log_path.as_os_str().is_empty());
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
        assert_eq!(cfg.dedup_window(), Duration::from_millis(500));
        assert!(cfg.start_at_end);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_path = \"/tmp/wakfu_chat.log\"\npoll_interval_ms = 250\n").unwrap();

        let cfg = load_or_default(&path).unwrap();
        assert_eq!(cfg.log_path, PathBuf::from("/tmp/wakfu_chat.log"));
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.definitions_path, PathBuf::from("combos.json"));
        assert_eq!(cfg.dedup_window_ms, 500);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = \"fast\"").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let cfg = AppConfig { poll_interval_ms: 0, ..AppConfig::default() };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1));
    }
}
