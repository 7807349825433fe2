//! Symbolic ref normalization (§4.1).
//!
//! `scheme://path` where scheme is one of the two configured schemes.
//! Deterministic, no I/O — a traversal guard runs after normalization so it
//! cannot be bypassed by encoding tricks (`scheme://a/../../b`).

use crate::error::CoreError;

pub const SCHEME_K: &str = "k-scheme";
pub const SCHEME_O: &str = "o-scheme";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalRef {
    pub scheme: String,
    pub path: String,
}

impl CanonicalRef {
    pub fn as_uri(&self) -> String {
        format!("{}://{}", self.scheme, self.path)
    }
}

/// Normalize a raw symbolic ref string into a `CanonicalRef`.
///
/// Operations, in order: lowercase scheme, strip `.md` suffix, collapse
/// repeated `/`, strip trailing `/`. The traversal guard runs last, against
/// the collapsed path, so `..` cannot hide inside doubled slashes.
pub fn normalize(raw: &str) -> Result<CanonicalRef, CoreError> {
    let Some((scheme_raw, path_raw)) = raw.split_once("://") else {
        return Err(CoreError::InvalidRef(raw.to_string()));
    };

    let scheme = scheme_raw.to_ascii_lowercase();
    if scheme != SCHEME_K && scheme != SCHEME_O {
        return Err(CoreError::InvalidRef(raw.to_string()));
    }

    if path_raw.is_empty() {
        return Err(CoreError::InvalidRef(raw.to_string()));
    }

    let stripped = path_raw.strip_suffix(".md").unwrap_or(path_raw);
    let collapsed = collapse_slashes(stripped);
    let trimmed = collapsed.trim_end_matches('/').to_string();

    if trimmed.is_empty() {
        return Err(CoreError::InvalidRef(raw.to_string()));
    }

    if has_traversal_segment(&trimmed) {
        return Err(CoreError::TraversalBlocked(raw.to_string()));
    }

    Ok(CanonicalRef { scheme, path: trimmed })
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for ch in s.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
            out.push(ch);
        } else {
            prev_slash = false;
            out.push(ch);
        }
    }
    out
}

fn has_traversal_segment(path: &str) -> bool {
    path.split('/').any(|seg| seg == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_case_and_md_suffix() {
        let r = normalize("K-SCHEME://canon/auth.md").unwrap();
        assert_eq!(r.scheme, "k-scheme");
        assert_eq!(r.path, "canon/auth");
    }

    #[test]
    fn collapses_repeated_and_trailing_slashes() {
        let r = normalize("o-scheme://a//b///c/").unwrap();
        assert_eq!(r.path, "a/b/c");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            normalize("http://example.com/x"),
            Err(CoreError::InvalidRef(_))
        ));
    }

    #[test]
    fn rejects_empty_path() {
        assert!(matches!(normalize("k-scheme://"), Err(CoreError::InvalidRef(_))));
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        assert!(matches!(normalize("not-a-ref"), Err(CoreError::InvalidRef(_))));
    }

    #[test]
    fn rejects_traversal_even_when_circuitous() {
        assert!(matches!(
            normalize("k-scheme://a/../../b"),
            Err(CoreError::TraversalBlocked(_))
        ));
        // collapsing repeated slashes must not hide a traversal segment
        assert!(matches!(
            normalize("k-scheme://a//..//b"),
            Err(CoreError::TraversalBlocked(_))
        ));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("K-SCHEME://canon//auth.md/").unwrap();
        let twice = normalize(&once.as_uri()).unwrap();
        assert_eq!(once, twice);
    }
}
