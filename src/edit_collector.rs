//! Edit collector: pluggable `workspace/applyEdit` strategy.
//!
//! A caller can swap the active collector for the duration of a scoped
//! closure (see `Connection::collect_apply_edits`) to capture edits a
//! server sends while, say, running a refactor command.

use serde_json::Value;
use std::sync::Mutex;

pub trait EditCollector: Send + Sync {
    /// Returns whether the edit was applied.
    fn apply_edit(&self, edit: &Value) -> bool;
}

/// Default collector: rejects every edit.
#[derive(Debug, Default)]
pub struct RejectingEditCollector;

impl EditCollector for RejectingEditCollector {
    fn apply_edit(&self, _edit: &Value) -> bool {
        false
    }
}

/// Records edits instead of rejecting them, for feature commands that
/// want to inspect server-initiated edits.
#[derive(Debug, Default)]
pub struct RecordingEditCollector {
    edits: Mutex<Vec<Value>>,
}

impl RecordingEditCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_edits(&self) -> Vec<Value> {
        std::mem::take(&mut *self.edits.lock().expect("edit collector poisoned"))
    }
}

impl EditCollector for RecordingEditCollector {
    fn apply_edit(&self, edit: &Value) -> bool {
        self.edits.lock().expect("edit collector poisoned").push(edit.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejecting_collector_always_reports_not_applied() {
        let collector = RejectingEditCollector;
        assert!(!collector.apply_edit(&json!({"changes": {}})));
    }

    #[test]
    fn recording_collector_captures_and_reports_applied() {
        let collector = RecordingEditCollector::new();
        assert!(collector.apply_edit(&json!({"a": 1})));
        assert!(collector.apply_edit(&json!({"b": 2})));
        let edits = collector.take_edits();
        assert_eq!(edits, vec![json!({"a": 1}), json!({"b": 2})]);
        assert!(collector.take_edits().is_empty());
    }
}
