//! Ledger configuration loaded from `<state_root>/capture.toml`.
//!
//! A missing file is not an error: every field has a default relative to the
//! state root. A malformed file is.

use crate::core::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::core::error::LedgerError;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PARTIAL_FINGERPRINT_BYTES: u64 = 4 * 1024 * 1024;

/// On-disk shape; everything optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    vault_root: Option<PathBuf>,
    note_extension: Option<String>,
    busy_timeout_ms: Option<u64>,
    transcription_timeout_secs: Option<u64>,
    transcription_command: Option<Vec<String>>,
    partial_fingerprint_bytes: Option<u64>,
    backup_dir: Option<PathBuf>,
    backup_interval_secs: Option<u64>,
    backup_keep: Option<usize>,
    retention_days: Option<u32>,
}

/// Resolved configuration with absolute paths.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerConfig {
    pub state_root: PathBuf,
    pub vault_root: PathBuf,
    pub note_extension: String,
    pub busy_timeout_ms: u64,
    pub transcription_timeout: Duration,
    /// Program followed by its arguments; the audio path is appended.
    pub transcription_command: Option<Vec<String>>,
    pub partial_fingerprint_bytes: u64,
    pub backup_dir: PathBuf,
    pub backup_interval: Duration,
    pub backup_keep: usize,
    pub retention_days: u32,
}

impl LedgerConfig {
    pub fn defaults(state_root: &Path) -> Self {
        Self::resolve(state_root, RawConfig::default())
    }

    fn resolve(state_root: &Path, raw: RawConfig) -> Self {
        let rooted = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                state_root.join(p)
            }
        };
        Self {
            state_root: state_root.to_path_buf(),
            vault_root: rooted(raw.vault_root.unwrap_or_else(|| PathBuf::from("vault"))),
            note_extension: raw.note_extension.unwrap_or_else(|| "md".to_string()),
            busy_timeout_ms: raw.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            transcription_timeout: Duration::from_secs(
                raw.transcription_timeout_secs.unwrap_or(300),
            ),
            transcription_command: raw.transcription_command,
            partial_fingerprint_bytes: raw
                .partial_fingerprint_bytes
                .unwrap_or(DEFAULT_PARTIAL_FINGERPRINT_BYTES),
            backup_dir: rooted(raw.backup_dir.unwrap_or_else(|| PathBuf::from("backups"))),
            backup_interval: Duration::from_secs(raw.backup_interval_secs.unwrap_or(3600)),
            backup_keep: raw.backup_keep.unwrap_or(24),
            retention_days: raw.retention_days.unwrap_or(90),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_root.join(schemas::LEDGER_DB_NAME)
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_root.join(schemas::LEDGER_EVENTS_NAME)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.note_extension.is_empty()
            || !self
                .note_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LedgerError::Config(format!(
                "note_extension must be non-empty ASCII alphanumeric, got '{}'",
                self.note_extension
            )));
        }
        if self.backup_keep == 0 {
            return Err(LedgerError::Config("backup_keep must be at least 1".into()));
        }
        if let Some(cmd) = &self.transcription_command {
            if cmd.is_empty() {
                return Err(LedgerError::Config(
                    "transcription_command must name a program".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Load config from `<state_root>/capture.toml`, falling back to defaults.
pub fn load_config(state_root: &Path) -> Result<LedgerConfig, LedgerError> {
    let config_path = state_root.join(schemas::CONFIG_FILE_NAME);
    let raw = if config_path.exists() {
        let content = fs::read_to_string(&config_path)?;
        toml::from_str::<RawConfig>(&content)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", config_path.display())))?
    } else {
        RawConfig::default()
    };
    let config = LedgerConfig::resolve(state_root, raw);
    config.validate()?;
    Ok(config)
}

const DEFAULT_CONFIG_TOML: &str = r#"# Capture ledger configuration. Every key is optional.
# Relative paths resolve against the directory holding this file.

# vault_root = "vault"
# note_extension = "md"
# busy_timeout_ms = 5000
# transcription_timeout_secs = 300
# transcription_command = ["whisper-cli", "--output-txt"]
# partial_fingerprint_bytes = 4194304
# backup_dir = "backups"
# backup_interval_secs = 3600
# backup_keep = 24
# retention_days = 90
"#;

/// Write a commented default `capture.toml` unless one exists.
/// Returns whether a file was written.
pub fn write_default_config(state_root: &Path) -> Result<bool, LedgerError> {
    let config_path = state_root.join(schemas::CONFIG_FILE_NAME);
    if config_path.exists() {
        return Ok(false);
    }
    fs::create_dir_all(state_root)?;
    fs::write(&config_path, DEFAULT_CONFIG_TOML)?;
    Ok(true)
}
