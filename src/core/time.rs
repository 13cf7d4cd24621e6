//! Shared timestamp and identifier helpers.
//!
//! All ledger timestamps are fixed-width RFC 3339 UTC strings, so string order
//! equals chronological order in SQL comparisons.

use crate::core::error::LedgerError;
use chrono::{DateTime, SecondsFormat, Utc};
use ulid::{Generator, Ulid};

/// Returns the current UTC time as `2026-10-16T08:15:02.123Z`.
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Capture id allocator (26-char ULIDs).
///
/// Ids from one allocator are strictly increasing even within a single
/// millisecond, so id order is staging order.
pub struct CaptureIds {
    generator: Generator,
}

impl Default for CaptureIds {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureIds {
    pub fn new() -> Self {
        Self {
            generator: Generator::new(),
        }
    }

    pub fn next_id(&mut self) -> Result<String, LedgerError> {
        Ok(self.generator.generate()?.to_string())
    }
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Compact UTC stamp for file names (`20261016T081502123Z`).
pub fn file_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%3fZ").to_string()
}
