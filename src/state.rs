//! Dispatcher-owned mutable state (§3 "Last-Run Record", §5 "Global state"):
//! the last-run record and the baseline session memo are the only mutable
//! module-level values, and both are injected with a state directory for
//! isolation rather than kept as ambient globals.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::baseline_cache::BaselineCache;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LastRunRecord {
    pub action: String,
    pub generated_at: String,
    pub envelope: serde_json::Value,
}

/// Owns the last-run record and the baseline cache (which in turn owns the
/// session-resolved-commit memo). One instance is constructed per server
/// process and handed to the dispatcher; tests construct their own with a
/// throwaway `state_dir` for isolation.
pub struct ServiceState {
    state_dir: PathBuf,
    last_run: Mutex<Option<LastRunRecord>>,
    pub baseline_cache: BaselineCache,
}

impl ServiceState {
    pub fn new(state_dir: PathBuf, baseline_cache_root: PathBuf) -> Self {
        let last_run = Self::load_last_run(&state_dir);
        Self { state_dir, last_run: Mutex::new(last_run), baseline_cache: BaselineCache::new(baseline_cache_root) }
    }

    fn last_run_path(state_dir: &std::path::Path) -> PathBuf {
        state_dir.join("last_run.json")
    }

    fn load_last_run(state_dir: &std::path::Path) -> Option<LastRunRecord> {
        let text = std::fs::read_to_string(Self::last_run_path(state_dir)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Record the envelope of the most recently dispatched action. Used only
    /// by the explain/`orient` pathway, never by retrieval itself.
    pub fn record_run(&self, action: &str, generated_at: &str, envelope: serde_json::Value) {
        let record = LastRunRecord { action: action.to_string(), generated_at: generated_at.to_string(), envelope };
        if std::fs::create_dir_all(&self.state_dir).is_ok() {
            if let Ok(text) = serde_json::to_string_pretty(&record) {
                let _ = std::fs::write(Self::last_run_path(&self.state_dir), text);
            }
        }
        *self.last_run.lock().unwrap() = Some(record);
    }

    pub fn last_run(&self) -> Option<LastRunRecord> {
        self.last_run.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back_last_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = ServiceState::new(tmp.path().join("state"), tmp.path().join("baseline"));
        assert!(state.last_run().is_none());
        state.record_run("search", "2026-07-28T00:00:00Z", serde_json::json!({"ok": true}));
        let record = state.last_run().unwrap();
        assert_eq!(record.action, "search");
    }

    #[test]
    fn last_run_persists_across_instances() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state_dir = tmp.path().join("state");
        let baseline_dir = tmp.path().join("baseline");
        {
            let state = ServiceState::new(state_dir.clone(), baseline_dir.clone());
            state.record_run("catalog", "2026-07-28T00:00:00Z", serde_json::json!({"count": 3}));
        }
        let reloaded = ServiceState::new(state_dir, baseline_dir);
        assert_eq!(reloaded.last_run().unwrap().action, "catalog");
    }
}
