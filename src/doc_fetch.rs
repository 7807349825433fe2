//! Document fetch by symbolic ref (§4.3): resolve a normalized ref to file
//! bytes in a specific corpus revision (local root or a baseline cache root).

use std::path::{Path, PathBuf};

use crate::baseline_cache::{BaselineCache, EnsureOptions};
use crate::error::CoreError;
use crate::refs::{self, SCHEME_K};
use crate::index_builder::content_hash_hex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct FetchedDoc {
    pub content: String,
    pub content_hash: String,
    pub canon_commit: Option<String>,
}

/// `k-scheme` refs resolve against the baseline corpus; `o-scheme` refs
/// resolve against the local repository root.
pub fn get_doc_by_ref(
    raw_ref: &str,
    local_root: &Path,
    baseline: &BaselineCache,
    baseline_url: &str,
    baseline_branch: &str,
) -> Result<FetchedDoc, CoreError> {
    let canonical = refs::normalize(raw_ref)?;

    let (corpus_root, canon_commit) = if canonical.scheme == SCHEME_K {
        if baseline_url.is_empty() {
            return Err(CoreError::CanonTargetUnknown(raw_ref.to_string()));
        }
        let ensured = baseline.ensure(baseline_url, baseline_branch, &EnsureOptions::default())?;
        (ensured.root, Some(ensured.commit_id))
    } else {
        (local_root.to_path_buf(), None)
    };

    let resolved = resolve_within_root(&corpus_root, &canonical.path)?;
    let bytes = read_with_md_fallback(&resolved)?;

    Ok(FetchedDoc { content_hash: content_hash_hex(&bytes), content: bytes, canon_commit })
}

/// Join `rel_path` under `root`, re-asserting the traversal guard against the
/// canonicalized root so a symlink or `..` smuggled past ref normalization
/// still cannot escape the corpus (§4.3 step 2).
fn resolve_within_root(root: &Path, rel_path: &str) -> Result<PathBuf, CoreError> {
    if rel_path.split('/').any(|seg| seg == "..") {
        return Err(CoreError::TraversalBlocked(rel_path.to_string()));
    }
    let joined = root.join(rel_path);
    let root_real = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let parent_real = joined
        .parent()
        .and_then(|p| p.canonicalize().ok())
        .unwrap_or_else(|| root_real.clone());
    if !parent_real.starts_with(&root_real) {
        return Err(CoreError::TraversalBlocked(rel_path.to_string()));
    }
    Ok(joined)
}

fn read_with_md_fallback(path: &Path) -> Result<String, CoreError> {
    if let Ok(bytes) = std::fs::read_to_string(path) {
        return Ok(bytes);
    }
    let with_md = path.with_extension("md");
    std::fs::read_to_string(&with_md).map_err(|_| CoreError::DocNotFound(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolves_local_ref_with_md_fallback() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("auth.md"), "# Auth\nbody\n").unwrap();
        let baseline = BaselineCache::new(tmp.path().join("baseline-cache"));
        let result = get_doc_by_ref("o-scheme://auth", tmp.path(), &baseline, "", "main").unwrap();
        assert!(result.content.contains("body"));
    }

    #[test]
    fn rejects_traversal_even_after_normalization() {
        let tmp = TempDir::new().unwrap();
        let baseline = BaselineCache::new(tmp.path().join("baseline-cache"));
        let err = get_doc_by_ref("o-scheme://../../etc/passwd", tmp.path(), &baseline, "", "main").unwrap_err();
        assert_eq!(err.code(), "TRAVERSAL_BLOCKED");
    }

    #[test]
    fn missing_doc_reports_doc_not_found() {
        let tmp = TempDir::new().unwrap();
        let baseline = BaselineCache::new(tmp.path().join("baseline-cache"));
        let err = get_doc_by_ref("o-scheme://nope", tmp.path(), &baseline, "", "main").unwrap_err();
        assert_eq!(err.code(), "DOC_NOT_FOUND");
    }
}
