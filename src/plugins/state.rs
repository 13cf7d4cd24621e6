//! Capture lifecycle state machine.
//!
//! ```text
//! staged ──► transcribed ──────────► exported
//!   │  └───► failed_transcription ─► exported_placeholder
//!   └─────────────────────────────► exported_duplicate   (from any non-terminal state)
//! ```
//!
//! Terminal states never change once reached. A terminal capture may still
//! receive further audit rows (idempotent re-export, self-healing), but its
//! status, hash and meta stay fixed until the retention sweep deletes the row.

use crate::core::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Staged,
    Transcribed,
    FailedTranscription,
    Exported,
    ExportedDuplicate,
    ExportedPlaceholder,
}

impl CaptureStatus {
    pub const ALL: [CaptureStatus; 6] = [
        CaptureStatus::Staged,
        CaptureStatus::Transcribed,
        CaptureStatus::FailedTranscription,
        CaptureStatus::Exported,
        CaptureStatus::ExportedDuplicate,
        CaptureStatus::ExportedPlaceholder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureStatus::Staged => "staged",
            CaptureStatus::Transcribed => "transcribed",
            CaptureStatus::FailedTranscription => "failed_transcription",
            CaptureStatus::Exported => "exported",
            CaptureStatus::ExportedDuplicate => "exported_duplicate",
            CaptureStatus::ExportedPlaceholder => "exported_placeholder",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureStatus::Exported
                | CaptureStatus::ExportedDuplicate
                | CaptureStatus::ExportedPlaceholder
        )
    }

    /// The transition table. Anything not listed here is illegal.
    pub fn can_transition_to(self, next: CaptureStatus) -> bool {
        use CaptureStatus::*;
        matches!(
            (self, next),
            (Staged, Transcribed)
                | (Staged, FailedTranscription)
                | (Transcribed, Exported)
                | (FailedTranscription, ExportedPlaceholder)
                | (Staged, ExportedDuplicate)
                | (Transcribed, ExportedDuplicate)
                | (FailedTranscription, ExportedDuplicate)
        )
    }

    /// What the pipeline must do next for a capture in this state.
    pub fn next_step(self) -> NextStep {
        match self {
            CaptureStatus::Staged => NextStep::Finalize,
            CaptureStatus::Transcribed => NextStep::Export,
            CaptureStatus::FailedTranscription => NextStep::ExportPlaceholder,
            _ => NextStep::Done,
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaptureStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LedgerError::ValidationError(format!("Unknown capture status '{s}'")))
    }
}

/// Pipeline re-entry point derived from the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Transcribe (voice) or normalize (email), then export.
    Finalize,
    Export,
    ExportPlaceholder,
    Done,
}

/// Validates `from -> to` for capture `id`, failing with `IllegalTransition`.
pub fn ensure_transition(
    id: &str,
    from: CaptureStatus,
    to: CaptureStatus,
) -> Result<(), LedgerError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::IllegalTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// The status an export outcome drives a capture to.
pub fn terminal_for(from: CaptureStatus, mode: ExportMode) -> CaptureStatus {
    match (from, mode) {
        (_, ExportMode::DuplicateSkip) => CaptureStatus::ExportedDuplicate,
        (CaptureStatus::FailedTranscription, ExportMode::Initial) => {
            CaptureStatus::ExportedPlaceholder
        }
        _ => CaptureStatus::Exported,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    Initial,
    DuplicateSkip,
}

impl ExportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportMode::Initial => "initial",
            ExportMode::DuplicateSkip => "duplicate_skip",
        }
    }
}

impl FromStr for ExportMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(ExportMode::Initial),
            "duplicate_skip" => Ok(ExportMode::DuplicateSkip),
            other => Err(LedgerError::ValidationError(format!(
                "Unknown export mode '{other}'"
            ))),
        }
    }
}
