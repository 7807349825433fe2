//! Content-addressed baseline cache (§4.2).
//!
//! Layout: `<root>/<repo-name>/<commit_id>/...`. A commit directory, once
//! present with a valid working-copy marker, is immutable and read-only —
//! there is no TTL and no overwrite. Offline sessions fall back to the most
//! recently modified existing commit directory for the same `(url, branch)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CoreError;
use crate::git;

/// Per-process memo of resolved commit ids, keyed by `(url, branch)` per
/// SPEC_FULL / spec.md §9 open question (a) — the branch alone is not a
/// sufficient key because a caller may swap the baseline URL mid-process.
#[derive(Default)]
pub struct SessionMemo {
    resolved: Mutex<HashMap<(String, String), String>>,
}

impl SessionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, url: &str, branch: &str) -> Option<String> {
        self.resolved
            .lock()
            .unwrap()
            .get(&(url.to_string(), branch.to_string()))
            .cloned()
    }

    fn put(&self, url: &str, branch: &str, commit: &str) {
        self.resolved
            .lock()
            .unwrap()
            .insert((url.to_string(), branch.to_string()), commit.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct EnsureOptions {
    pub check_only: bool,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self { check_only: false }
    }
}

#[derive(Debug, Clone)]
pub struct EnsureResult {
    pub root: PathBuf,
    pub commit_id: String,
}

#[derive(Debug, Clone)]
pub struct CheckOnlyResult {
    pub changed: bool,
    pub current_commit_id: Option<String>,
}

pub struct BaselineCache {
    pub cache_root: PathBuf,
    memo: SessionMemo,
}

impl BaselineCache {
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root, memo: SessionMemo::new() }
    }

    fn repo_name(url: &str) -> String {
        url.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("baseline")
            .trim_end_matches(".git")
            .to_string()
    }

    fn repo_dir(&self, url: &str) -> PathBuf {
        self.cache_root.join(Self::repo_name(url))
    }

    fn is_valid_commit_dir(dir: &Path) -> bool {
        dir.is_dir() && dir.join(".git").exists()
    }

    /// `checkOnly` mode: report whether the remote has moved past the
    /// session-memoized (or most-recent on-disk) commit, without fetching.
    pub fn check_only(&self, url: &str, branch: &str) -> CheckOnlyResult {
        let current = git::ls_remote_commit(url, branch);
        let cached = self
            .memo
            .get(url, branch)
            .or_else(|| self.most_recent_commit_dir(url, branch).and_then(|(id, _)| Some(id)));
        match &current {
            Some(c) => CheckOnlyResult {
                changed: cached.as_deref() != Some(c.as_str()),
                current_commit_id: Some(c.clone()),
            },
            None => CheckOnlyResult { changed: false, current_commit_id: cached },
        }
    }

    /// Core algorithm per §4.2: resolve → exact-identity check → fetch →
    /// offline fallback.
    pub fn ensure(&self, url: &str, branch: &str, opts: &EnsureOptions) -> Result<EnsureResult, CoreError> {
        if opts.check_only {
            let check = self.check_only(url, branch);
            return match check.current_commit_id {
                Some(id) => Ok(EnsureResult { root: self.repo_dir(url).join(&id), commit_id: id }),
                None => Err(CoreError::CanonTargetUnknown(format!("{url}@{branch}"))),
            };
        }

        // Local path baselines bypass fetch entirely.
        let local_path = Path::new(url);
        if local_path.is_dir() && !url.contains("://") {
            return self.ensure_local(local_path);
        }

        // Step 1: resolve current commit id (memoized within the process).
        let resolved = self
            .memo
            .get(url, branch)
            .or_else(|| git::ls_remote_commit(url, branch));

        let Some(commit_id) = resolved else {
            // Step 4: offline fallback — no network, no memo.
            return self
                .most_recent_commit_dir(url, branch)
                .map(|(commit_id, root)| EnsureResult { root, commit_id })
                .ok_or_else(|| CoreError::CanonTargetUnknown(format!("{url}@{branch}")));
        };
        self.memo.put(url, branch, &commit_id);

        // Step 2: exact-identity cache check.
        let dest = self.repo_dir(url).join(&commit_id);
        if Self::is_valid_commit_dir(&dest) {
            return Ok(EnsureResult { root: dest, commit_id });
        }

        // Step 3: fetch-and-store. Fresh materializations are additive; a
        // partial directory left by a cancelled/failed clone is removed so
        // it is never mistaken for valid commit content (§5 Cancellation).
        std::fs::create_dir_all(self.repo_dir(url)).map_err(CoreError::Io)?;
        match git::shallow_clone(url, branch, &dest) {
            Ok(true) if Self::is_valid_commit_dir(&dest) => {
                Ok(EnsureResult { root: dest, commit_id })
            }
            _ => {
                let _ = std::fs::remove_dir_all(&dest);
                // Step 4: offline/fetch-failure fallback.
                self.most_recent_commit_dir(url, branch)
                    .map(|(commit_id, root)| EnsureResult { root, commit_id })
                    .ok_or_else(|| CoreError::FetchFailed(format!("{url}@{branch}")))
            }
        }
    }

    fn ensure_local(&self, path: &Path) -> Result<EnsureResult, CoreError> {
        let commit_id = git::local_head_commit(path).unwrap_or_else(|| "working-tree".to_string());
        Ok(EnsureResult { root: path.to_path_buf(), commit_id })
    }

    /// Scan existing commit directories for `(url, branch)` and return the
    /// most recently modified one, if any. Offline resilience per §4.2 step 4.
    ///
    /// Branch is not recorded in the directory layout (only commit id is),
    /// so in practice this returns the newest commit dir under the repo's
    /// cache directory regardless of which branch produced it — acceptable
    /// because a stale-but-present directory is always better than none, and
    /// the next successful resolve will re-key on the correct branch.
    fn most_recent_commit_dir(&self, url: &str, _branch: &str) -> Option<(String, PathBuf)> {
        let repo_dir = self.repo_dir(url);
        let mut best: Option<(std::time::SystemTime, String, PathBuf)> = None;
        let entries = std::fs::read_dir(&repo_dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !Self::is_valid_commit_dir(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let commit_id = path.file_name()?.to_string_lossy().to_string();
            if best.as_ref().map(|(t, _, _)| modified > *t).unwrap_or(true) {
                best = Some((modified, commit_id, path));
            }
        }
        best.map(|(_, id, path)| (id, path))
    }

    /// Storage hygiene (`cleanup` action, §4.10): remove cache entries that
    /// don't match the currently resolved commit id for this `(url, branch)`.
    /// Never required for correctness.
    pub fn cleanup_stale(&self, url: &str, branch: &str, keep_commit_id: &str) -> std::io::Result<usize> {
        let repo_dir = self.repo_dir(url);
        let mut removed = 0;
        let Ok(entries) = std::fs::read_dir(&repo_dir) else { return Ok(0) };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().map(|n| n.to_string_lossy().to_string());
            if name.as_deref() != Some(keep_commit_id) && Self::is_valid_commit_dir(&path) {
                std::fs::remove_dir_all(&path)?;
                removed += 1;
            }
        }
        let _ = branch;
        Ok(removed)
    }
}
