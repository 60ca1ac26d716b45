use std::path::Path;

use serde::Serialize;

use crate::domain::AccessionState;
use crate::error::BgdError;
use crate::layout::write_bytes_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub accession: String,
    /// State the accession was in when it failed.
    pub stage: AccessionState,
    pub kind: String,
    pub message: String,
}

/// Accessions that failed during one run, in the order they failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureLedger {
    entries: Vec<FailureEntry>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, accession: &str, stage: AccessionState, error: &BgdError) {
        self.entries.push(FailureEntry {
            accession: accession.to_string(),
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, accession: &str) -> bool {
        self.entries.iter().any(|entry| entry.accession == accession)
    }

    /// One accession per line, trailing newline included.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.accession);
            out.push('\n');
        }
        out
    }

    /// Writes the report; returns `false` without touching disk when empty.
    pub fn write_report(&self, path: &Path) -> Result<bool, BgdError> {
        if self.is_empty() {
            return Ok(false);
        }
        write_bytes_atomic(path, self.render().as_bytes())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ledger_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("troublesome_assemblies.csv");
        let ledger = FailureLedger::new();
        assert!(!ledger.write_report(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn report_keeps_failure_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("troublesome_assemblies.csv");
        let mut ledger = FailureLedger::new();
        ledger.record(
            "GCA_000000003.1",
            AccessionState::Downloading,
            &BgdError::DownloadFailed("timeout".to_string()),
        );
        ledger.record(
            "bogus",
            AccessionState::Pending,
            &BgdError::MalformedIdentifier("bogus".to_string()),
        );

        assert!(ledger.write_report(&path).unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "GCA_000000003.1\nbogus\n"
        );
        assert_eq!(ledger.entries()[1].kind, "malformed-identifier");
        assert!(ledger.contains("bogus"));
    }
}
