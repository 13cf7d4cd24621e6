//! Store handle: the on-disk locations one ledger instance owns.
//!
//! A store is a state root (ledger file, event trail, config, backups) plus a
//! vault root (exported notes). Both are exclusively owned by one process.

use crate::core::config::LedgerConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Subdirectory of the vault that receives exported notes.
pub const INBOX_DIR: &str = "inbox";
/// Staging subdirectory for temp files; same filesystem as `inbox/`.
pub const STAGING_DIR: &str = ".trash";

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the state root directory
    pub root: PathBuf,
    /// Absolute path to the vault the notes are exported into
    pub vault_root: PathBuf,
}

impl Store {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            root: config.state_root.clone(),
            vault_root: config.vault_root.clone(),
        }
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.vault_root.join(INBOX_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.vault_root.join(STAGING_DIR)
    }

    /// Vault-relative export path (`inbox/<id>.<ext>`), as stored in the audit table.
    pub fn relative_note_path(capture_id: &str, extension: &str) -> String {
        format!("{INBOX_DIR}/{capture_id}.{extension}")
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.vault_root.join(Path::new(relative))
    }

    /// Create the state root, vault, inbox and staging directories.
    /// Returns the ones that did not exist yet.
    pub fn ensure_layout(&self) -> io::Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for dir in [
            self.root.clone(),
            self.vault_root.clone(),
            self.inbox_dir(),
            self.staging_dir(),
        ] {
            if !dir.is_dir() {
                fs::create_dir_all(&dir)?;
                created.push(dir);
            }
        }
        Ok(created)
    }
}
