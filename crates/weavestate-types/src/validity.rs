//! Per-contract interaction outcome log.

use serde::{Deserialize, Serialize};

/// One replayed interaction's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityRecord {
    pub entry_id: String,
    pub valid: bool,
}

/// Insertion-ordered, append-only record of which interactions a contract
/// accepted vs rejected.
///
/// Every key corresponds to an entry that was actually replayed for the
/// contract; silently skipped entries (untracked, malformed input) never
/// appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidityLog {
    records: Vec<ValidityRecord>,
}

impl ValidityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome. Replay order guarantees each entry id is recorded
    /// at most once.
    pub fn record(&mut self, entry_id: impl Into<String>, valid: bool) {
        self.records.push(ValidityRecord {
            entry_id: entry_id.into(),
            valid,
        });
    }

    pub fn get(&self, entry_id: &str) -> Option<bool> {
        self.records
            .iter()
            .find(|r| r.entry_id == entry_id)
            .map(|r| r.valid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidityRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut log = ValidityLog::new();
        log.record("b", true);
        log.record("a", false);
        log.record("c", true);

        let order: Vec<&str> = log.iter().map(|r| r.entry_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(log.get("a"), Some(false));
        assert_eq!(log.get("missing"), None);
    }

    #[test]
    fn serializes_as_a_record_array() {
        let mut log = ValidityLog::new();
        log.record("entry10", true);
        let json = serde_json::to_string(&log).unwrap();
        assert_eq!(json, r#"[{"entry_id":"entry10","valid":true}]"#);
        let back: ValidityLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}
