use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "keylog_config.json";
pub const LOG_DIR: &str = "logs";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeylogConfig {
    pub dedup_window_ms: u64,
    pub log_dir: Option<String>,
    pub status_poll_ms: u64,
    pub coordinator_poll_ms: u64,
    pub relay_warn_depth: usize,
    pub raw_keys_mode: String,
    pub ignore_injected: bool,
    pub hotkeys_enabled: bool,
    pub log_level: String,
}

impl Default for KeylogConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 30,
            log_dir: None,
            status_poll_ms: 50,
            coordinator_poll_ms: 25,
            relay_warn_depth: 10_000,
            raw_keys_mode: "down".to_string(),
            ignore_injected: true,
            hotkeys_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl KeylogConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn coordinator_poll_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator_poll_ms)
    }

    pub fn raw_keys_mode(&self) -> RawKeysMode {
        parse_raw_keys_mode(&self.raw_keys_mode)
    }

    /// Resolves the directory holding the dated log files.
    pub fn resolve_log_dir(&self, base_dir: &Path) -> PathBuf {
        match self.log_dir.as_deref() {
            Some(dir) => {
                let path = PathBuf::from(dir);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            }
            None => base_dir.join(LOG_DIR),
        }
    }
}

/// Which key transitions reach the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKeysMode {
    Down,
    Up,
    Both,
}

pub fn parse_raw_keys_mode(value: &str) -> RawKeysMode {
    match value.trim().to_ascii_lowercase().as_str() {
        "up" => RawKeysMode::Up,
        "both" => RawKeysMode::Both,
        _ => RawKeysMode::Down,
    }
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub log_dir: Option<String>,
    pub dedup_window_ms: Option<u64>,
    pub raw_keys_mode: Option<String>,
    pub hotkeys_enabled: Option<bool>,
}

pub fn load_config(base_dir: &Path, overrides: &CliOverrides) -> Result<KeylogConfig, ConfigError> {
    let config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE));
    let mut config = load_or_create_config(&config_path)?;
    apply_overrides(&mut config, overrides);
    Ok(normalize_config(config))
}

pub fn load_or_create_config(path: &Path) -> Result<KeylogConfig, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parse_err = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        let contents = fs::read_to_string(path).map_err(io_err)?;
        let user: Value = serde_json::from_str(&contents).map_err(parse_err)?;
        return refresh_config_defaults(&user).map_err(parse_err);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let config = KeylogConfig::default();
    let payload = serde_json::to_string_pretty(&config).map_err(parse_err)?;
    fs::write(path, payload).map_err(io_err)?;
    Ok(config)
}

fn apply_overrides(config: &mut KeylogConfig, overrides: &CliOverrides) {
    if let Some(log_dir) = overrides.log_dir.clone() {
        config.log_dir = Some(log_dir);
    }
    if let Some(window) = overrides.dedup_window_ms {
        config.dedup_window_ms = window;
    }
    if let Some(mode) = overrides.raw_keys_mode.clone() {
        config.raw_keys_mode = mode;
    }
    if let Some(enabled) = overrides.hotkeys_enabled {
        config.hotkeys_enabled = enabled;
    }
}

pub fn normalize_config(mut config: KeylogConfig) -> KeylogConfig {
    config.dedup_window_ms = config.dedup_window_ms.min(1_000);
    config.status_poll_ms = config.status_poll_ms.clamp(10, 1_000);
    config.coordinator_poll_ms = config.coordinator_poll_ms.clamp(5, 500);
    config.relay_warn_depth = config.relay_warn_depth.max(64);
    config.raw_keys_mode = match parse_raw_keys_mode(&config.raw_keys_mode) {
        RawKeysMode::Down => "down",
        RawKeysMode::Up => "up",
        RawKeysMode::Both => "both",
    }
    .to_string();
    if let Some(dir) = config.log_dir.as_ref() {
        if dir.trim().is_empty() {
            config.log_dir = None;
        }
    }
    if config.log_level.trim().is_empty() {
        config.log_level = "info".to_string();
    }
    config
}

/// Fills keys missing from an older config file with current defaults.
fn refresh_config_defaults(user: &Value) -> Result<KeylogConfig, serde_json::Error> {
    let mut merged = serde_json::to_value(KeylogConfig::default())?;
    merge_config_value(&mut merged, user);
    serde_json::from_value(merged)
}

fn merge_config_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_config_value(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_value, source_value) => {
            *target_value = source_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(config, KeylogConfig::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn partial_file_keeps_user_values_and_fills_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "dedup_window_ms": 45 }"#).unwrap();
        let config = load_config(dir.path(), &CliOverrides::default()).unwrap();
        assert_eq!(config.dedup_window_ms, 45);
        assert_eq!(config.status_poll_ms, 50);
        assert_eq!(config.raw_keys_mode(), RawKeysMode::Down);
    }

    #[test]
    fn overrides_win_and_get_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = CliOverrides {
            dedup_window_ms: Some(5_000),
            raw_keys_mode: Some(" BOTH ".to_string()),
            log_dir: Some("  ".to_string()),
            ..Default::default()
        };
        let config = load_config(dir.path(), &overrides).unwrap();
        assert_eq!(config.dedup_window_ms, 1_000);
        assert_eq!(config.raw_keys_mode, "both");
        assert_eq!(config.log_dir, None);
        assert_eq!(config.resolve_log_dir(dir.path()), dir.path().join(LOG_DIR));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        let err = load_config(dir.path(), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
