//! Deduplication engine.
//!
//! Two checks, both idempotent:
//! - content: another capture already holds the same fingerprint (ledger index);
//! - destination: the capture's own note file already exists on disk. The
//!   filesystem, not the audit table, is the source of truth here, so a note
//!   deleted outside the ledger is simply written again.
//!
//! Native-id duplicates never reach this module; the ledger's unique
//! constraint rejects them at insert time.

use crate::core::error::LedgerError;
use crate::core::store::Store;
use crate::plugins::ledger::{Capture, Ledger};
use crate::plugins::normalize;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DedupDecision {
    /// No file at the destination; safe to write.
    NoCollision,
    /// The destination already holds exactly this content.
    Duplicate,
    /// The destination holds different content under the same id. Never overwrite.
    Conflict { found_hash: String },
}

pub struct DedupEngine<'a> {
    store: &'a Store,
    extension: &'a str,
}

impl<'a> DedupEngine<'a> {
    pub fn new(store: &'a Store, extension: &'a str) -> Self {
        Self { store, extension }
    }

    pub fn destination(&self, capture_id: &str) -> PathBuf {
        self.store
            .resolve(&Store::relative_note_path(capture_id, self.extension))
    }

    /// Compare the capture's destination note against the pending fingerprint.
    pub fn check(&self, capture_id: &str, pending_hash: &str) -> io::Result<DedupDecision> {
        let path = self.destination(capture_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DedupDecision::NoCollision),
            Err(e) => return Err(e),
        };
        // Not a note this exporter could have written.
        let Ok(content) = std::str::from_utf8(&bytes) else {
            return Ok(DedupDecision::Conflict {
                found_hash: normalize::fingerprint(&bytes),
            });
        };
        let found_hash = note_body_fingerprint(content);
        if found_hash == pending_hash {
            Ok(DedupDecision::Duplicate)
        } else {
            Ok(DedupDecision::Conflict { found_hash })
        }
    }
}

/// Another capture already holding `hash`, if any.
pub fn prior_holder(
    ledger: &Ledger,
    capture_id: &str,
    hash: &str,
) -> Result<Option<Capture>, LedgerError> {
    Ok(ledger
        .find_by_hash(hash)?
        .filter(|holder| holder.id != capture_id))
}

/// Fingerprint of a note file's body, ignoring its front-matter header.
/// A file without a recognizable header is fingerprinted whole.
pub fn note_body_fingerprint(note: &str) -> String {
    let body = split_front_matter(note).map_or(note, |(_, body)| body);
    normalize::fingerprint(normalize::normalize(body).as_bytes())
}

/// Splits `---\n<header>\n---\n<body>` into `(header, body)`.
pub fn split_front_matter(note: &str) -> Option<(&str, &str)> {
    let rest = note.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    Some((&rest[..end], &rest[end + "\n---\n".len()..]))
}
