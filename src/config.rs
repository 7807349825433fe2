//! Configuration (§10.3): `.epistemic.json` in the repo root, with
//! `#[serde(default)]` sections so a partial or missing file still produces
//! sane defaults — same loading shape as the teacher's `.cortexast.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Remote governance corpus, e.g. "https://github.com/org/baseline-docs".
    /// Empty means no baseline: the service runs local-only.
    pub url: String,
    pub branch: String,
    /// Where resolved-commit snapshots are cached on disk.
    pub cache_root: PathBuf,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self { url: String::new(), branch: "main".to_string(), cache_root: PathBuf::from(".epistemic/baseline") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Top-level directory names eligible for indexing.
    pub include_prefixes: Vec<String>,
    pub schema_version: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include_prefixes: vec!["canon".into(), "odd".into(), "docs".into(), "writings".into()],
            schema_version: crate::index_builder::SCHEMA_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub k1: f64,
    pub b: f64,
    pub confidence_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, confidence_threshold: 0.6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory where the last-run record and session memo persist.
    /// Overridable via `EPISTEMIC_STATE_DIR` for isolated test harnesses.
    pub state_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { state_dir: PathBuf::from(".epistemic/state") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub baseline: BaselineConfig,
    pub index: IndexConfig,
    pub scoring: ScoringConfig,
    pub state: StateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseline: BaselineConfig::default(),
            index: IndexConfig::default(),
            scoring: ScoringConfig::default(),
            state: StateConfig::default(),
        }
    }
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".epistemic.json");
    let text = std::fs::read_to_string(&primary);
    let mut config = match text {
        Ok(text) => serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default()),
        Err(_) => Config::default(),
    };

    if let Ok(dir) = std::env::var("EPISTEMIC_STATE_DIR") {
        config.state.state_dir = PathBuf::from(dir);
    }
    if let Ok(url) = std::env::var("EPISTEMIC_BASELINE_URL") {
        config.baseline.url = url;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(tmp.path());
        assert_eq!(config.index.schema_version, crate::index_builder::SCHEMA_VERSION);
        assert_eq!(config.baseline.branch, "main");
    }

    #[test]
    fn partial_config_fills_defaults_for_missing_sections() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".epistemic.json"), r#"{"baseline": {"url": "https://example.com/docs"}}"#).unwrap();
        let config = load_config(tmp.path());
        assert_eq!(config.baseline.url, "https://example.com/docs");
        assert_eq!(config.baseline.branch, "main");
        assert_eq!(config.scoring.k1, 1.2);
    }
}
