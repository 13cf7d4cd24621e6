//! Content normalizer and fingerprinting.
//!
//! Canonical form: `\r\n` and lone `\r` become `\n`, trailing whitespace is
//! trimmed from every line, and leading/trailing blank space is trimmed from
//! the whole body. Quoted-reply stripping for email is not applied.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Algorithm tag persisted in the ledger; bump when the digest changes.
pub const FINGERPRINT_ALGORITHM: &str = "sha256-v1";
/// Hex digest length produced by [`fingerprint`].
pub const FINGERPRINT_LEN: usize = 64;

pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

pub fn fingerprint(canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    format!("{:x}", hasher.finalize())
}

/// Normalizes and fingerprints in one step, returning `(canonical, hash)`.
pub fn canonicalize(raw: &str) -> (String, String) {
    let canonical = normalize(raw);
    let hash = fingerprint(canonical.as_bytes());
    (canonical, hash)
}

pub fn is_fingerprint(candidate: &str) -> bool {
    candidate.len() == FINGERPRINT_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Early fingerprint over at most `limit` leading bytes of an audio file,
/// available before any transcript exists.
pub fn partial_fingerprint(path: &Path, limit: u64) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = file.take(limit);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
