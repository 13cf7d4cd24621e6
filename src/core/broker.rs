use crate::core::error;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// The event broker is the audit trail for ledger mutations.
/// Every committed (or failed) mutation appends one JSON line; nothing reads
/// it back for control flow.
#[derive(Debug, Clone)]
pub struct EventBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub capture_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventBroker {
    pub fn new(audit_log_path: &Path) -> Self {
        Self {
            audit_log_path: audit_log_path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Run a ledger operation and record its outcome.
    pub fn observe<F, R>(
        &self,
        op_name: &str,
        capture_id: Option<&str>,
        f: F,
    ) -> Result<R, error::LedgerError>
    where
        F: FnOnce() -> Result<R, error::LedgerError>,
    {
        let result = f();
        let (status, detail) = match &result {
            Ok(_) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        // The trail is diagnostic; losing a line must not fail a committed write.
        if let Err(e) = self.log_event(op_name, capture_id, status, detail) {
            tracing::warn!(op = op_name, error = %e, "failed to append ledger event");
        }
        result
    }

    fn log_event(
        &self,
        op: &str,
        capture_id: Option<&str>,
        status: &str,
        detail: Option<String>,
    ) -> Result<(), error::LedgerError> {
        let ev = BrokerEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            capture_id: capture_id.map(|s| s.to_string()),
            status: status.to_string(),
            detail,
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    /// Read back the trail, skipping lines that fail to parse (torn final write).
    pub fn read_events(&self) -> Result<Vec<BrokerEvent>, error::LedgerError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let f = std::fs::File::open(&self.audit_log_path)?;
        let mut out = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            if let Ok(ev) = serde_json::from_str::<BrokerEvent>(&line) {
                out.push(ev);
            }
        }
        Ok(out)
    }
}
