//! Document index pipeline (§3 Document/Index, §4.4 Index Builder).
//!
//! Discovery walks each corpus root for `.md` files under the configured
//! include-prefix directories, honoring the `.noindex` hierarchical
//! exclusion sentinel, then parses frontmatter and headings per file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::scorer::{tokenize, Bm25Stats};

pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorityBand {
    Governing,
    Operational,
    NonGoverning,
}

/// Durability tier. Total order per §3: workaround < experiment <
/// operational < pattern < promoted. Derive(Ord) follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Intent {
    Workaround,
    Experiment,
    Operational,
    Pattern,
    Promoted,
}

impl Intent {
    pub fn multiplier(self) -> f64 {
        match self {
            Intent::Workaround => 0.6,
            Intent::Experiment => 0.7,
            Intent::Operational => 1.0,
            Intent::Pattern => 1.3,
            Intent::Promoted => 1.5,
        }
    }

    fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "workaround" => Some(Intent::Workaround),
            "experiment" => Some(Intent::Experiment),
            "operational" => Some(Intent::Operational),
            "pattern" => Some(Intent::Pattern),
            "promoted" => Some(Intent::Promoted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Evidence {
    None,
    Weak,
    Medium,
    Strong,
}

impl Evidence {
    pub fn multiplier(self) -> f64 {
        match self {
            Evidence::None => 0.8,
            Evidence::Weak => 0.9,
            Evidence::Medium => 1.0,
            Evidence::Strong => 1.2,
        }
    }

    fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Some(Evidence::None),
            "weak" => Some(Evidence::Weak),
            "medium" => Some(Evidence::Medium),
            "strong" => Some(Evidence::Strong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub origin: Origin,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub authority_band: AuthorityBand,
    pub intent: Intent,
    pub evidence: Evidence,
    pub supersedes: Vec<String>,
    pub content_hash: String,
    pub headings: Vec<Heading>,
    pub content_preview: String,
    pub frontmatter: serde_json::Map<String, serde_json::Value>,
    pub body: String,
}

impl Document {
    /// Identity per §3: `uri` if present, else `path#content_hash`.
    pub fn identity(&self) -> String {
        match &self.uri {
            Some(u) => u.clone(),
            None => format!("{}#{}", self.path, self.content_hash),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorityCounts {
    pub governing: usize,
    pub operational: usize,
    pub non_governing: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total: usize,
    pub local: usize,
    pub baseline: usize,
    pub excluded_by_noindex: usize,
    pub by_authority: AuthorityCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub version: String,
    pub generated_at: String,
    pub stats: IndexStats,
    pub documents: Vec<Document>,
    #[serde(skip)]
    pub bm25: Bm25Stats,
    /// Whether this index was built with a baseline corpus present — used
    /// to detect staleness when baseline availability changes (§4.4).
    pub has_baseline: bool,
}

#[derive(Debug, Clone)]
pub struct IndexBuildOptions {
    pub include_prefixes: Vec<String>,
}

impl Default for IndexBuildOptions {
    fn default() -> Self {
        Self { include_prefixes: vec!["canon".into(), "odd".into(), "docs".into(), "writings".into()] }
    }
}

pub fn build_index(
    local_root: &Path,
    baseline_root: Option<&Path>,
    opts: &IndexBuildOptions,
    generated_at: &str,
) -> Index {
    build_index_with_scoring(local_root, baseline_root, opts, generated_at, crate::scorer::DEFAULT_K1, crate::scorer::DEFAULT_B)
}

/// As `build_index`, but with caller-supplied BM25 parameters (`ScoringConfig`).
pub fn build_index_with_scoring(
    local_root: &Path,
    baseline_root: Option<&Path>,
    opts: &IndexBuildOptions,
    generated_at: &str,
    k1: f64,
    b: f64,
) -> Index {
    let mut documents = Vec::new();
    let mut excluded_by_noindex = 0usize;

    let (local_docs, local_excluded) = walk_corpus(local_root, Origin::Local, opts);
    documents.extend(local_docs);
    excluded_by_noindex += local_excluded;

    if let Some(baseline_root) = baseline_root {
        let (baseline_docs, baseline_excluded) = walk_corpus(baseline_root, Origin::Baseline, opts);
        documents.extend(baseline_docs);
        excluded_by_noindex += baseline_excluded;
    }

    let mut stats = IndexStats { excluded_by_noindex, ..Default::default() };
    stats.total = documents.len();
    for doc in &documents {
        match doc.origin {
            Origin::Local => stats.local += 1,
            Origin::Baseline => stats.baseline += 1,
        }
        match doc.authority_band {
            AuthorityBand::Governing => stats.by_authority.governing += 1,
            AuthorityBand::Operational => stats.by_authority.operational += 1,
            AuthorityBand::NonGoverning => stats.by_authority.non_governing += 1,
        }
    }

    let bm25 = Bm25Stats::build_with_params(&documents, k1, b);

    Index {
        version: SCHEMA_VERSION.to_string(),
        generated_at: generated_at.to_string(),
        stats,
        documents,
        bm25,
        has_baseline: baseline_root.is_some(),
    }
}

/// True if the index's schema version or baseline-presence shape no longer
/// matches the current build (§4.4 "Version and staleness").
pub fn is_stale(index: &Index, baseline_available: bool) -> bool {
    index.version != SCHEMA_VERSION || index.has_baseline != baseline_available
}

fn walk_corpus(root: &Path, origin: Origin, opts: &IndexBuildOptions) -> (Vec<Document>, usize) {
    let mut documents = Vec::new();
    let mut excluded = 0usize;

    let Ok(overrides) = dependency_dir_overrides(root) else {
        return (documents, excluded);
    };

    let prefixes: Vec<String> = opts
        .include_prefixes
        .iter()
        .map(|p| p.trim().trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .overrides(overrides)
        .build();

    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = dent.into_path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let top_dir = rel.split('/').next().unwrap_or("");
        if !prefixes.iter().any(|p| p == top_dir) {
            continue;
        }
        if is_excluded_by_noindex(&path, root) {
            excluded += 1;
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else { continue };
        documents.push(parse_document(&rel, origin, &raw));
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    (documents, excluded)
}

/// Skip VCS and dependency directories, mirroring the teacher scanner's
/// `repomix_default_overrides` dir-exclusion pattern (non-negated patterns
/// mark paths to skip; `standard_filters` already handles `.gitignore`).
fn dependency_dir_overrides(root: &Path) -> ignore::Result<ignore::overrides::Override> {
    let mut ob = OverrideBuilder::new(root);
    for d in [".git", "node_modules", "target", ".cache", "indexes"] {
        ob.add(&format!("**/{d}"))?;
        ob.add(&format!("**/{d}/**"))?;
    }
    ob.build()
}

/// Hierarchical exclusion sentinel: if any ancestor directory up to `root`
/// contains a file literally named `.noindex`, the file is excluded. Per
/// spec.md §9 open question (c), this is silent: only the count is exposed,
/// never the list of excluded paths.
fn is_excluded_by_noindex(path: &Path, root: &Path) -> bool {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.join(".noindex").exists() {
            return true;
        }
        if dir == root {
            break;
        }
        current = dir.parent();
    }
    false
}

fn parse_document(rel_path: &str, origin: Origin, raw: &str) -> Document {
    let (frontmatter, body) = split_frontmatter(raw);
    let headings = extract_headings(body);
    let top_dir = rel_path.split('/').next().unwrap_or("");

    let uri = frontmatter.get("uri").and_then(|v| v.as_str()).map(|s| s.to_string());
    let title = frontmatter.get("title").and_then(|v| v.as_str()).map(|s| s.to_string());
    let tags = frontmatter
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let supersedes = frontmatter
        .get("supersedes")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let authority_band = frontmatter
        .get("authority_band")
        .and_then(|v| v.as_str())
        .and_then(authority_band_from_str)
        .unwrap_or_else(|| authority_band_from_dir(top_dir));

    let intent = frontmatter
        .get("intent")
        .and_then(|v| v.as_str())
        .and_then(Intent::from_str_loose)
        .unwrap_or_else(|| intent_from_path(rel_path, top_dir));

    let evidence = frontmatter
        .get("evidence")
        .and_then(|v| v.as_str())
        .and_then(Evidence::from_str_loose)
        .unwrap_or(Evidence::Medium);

    let content_hash = content_hash_hex(body);
    let content_preview: String = body.chars().take(500).collect();

    Document {
        path: rel_path.to_string(),
        origin,
        uri,
        title,
        tags,
        authority_band,
        intent,
        evidence,
        supersedes,
        content_hash,
        headings,
        content_preview,
        frontmatter,
        body: body.to_string(),
    }
}

fn authority_band_from_str(s: &str) -> Option<AuthorityBand> {
    match s.to_ascii_lowercase().as_str() {
        "governing" => Some(AuthorityBand::Governing),
        "operational" => Some(AuthorityBand::Operational),
        "non-governing" | "non_governing" => Some(AuthorityBand::NonGoverning),
        _ => None,
    }
}

fn authority_band_from_dir(top_dir: &str) -> AuthorityBand {
    match top_dir {
        "canon" | "odd" | "writings" => AuthorityBand::Governing,
        "docs" => AuthorityBand::Operational,
        _ => AuthorityBand::NonGoverning,
    }
}

fn intent_from_path(rel_path: &str, top_dir: &str) -> Intent {
    let lower = rel_path.to_ascii_lowercase();
    if lower.contains("workaround") {
        return Intent::Workaround;
    }
    if lower.contains("experiment") {
        return Intent::Experiment;
    }
    match top_dir {
        "canon" | "writings" => Intent::Promoted,
        "odd" => Intent::Pattern,
        _ => Intent::Operational,
    }
}

/// Split a `---`-delimited YAML-like frontmatter block from the body.
/// Falls back to an empty frontmatter map and the whole text as body when
/// no well-formed block is present.
fn split_frontmatter(raw: &str) -> (serde_json::Map<String, serde_json::Value>, &str) {
    let Some(rest) = raw.strip_prefix("---") else { return (Default::default(), raw) };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let Some(end) = rest.find("\n---") else { return (Default::default(), raw) };
    let fm_text = &rest[..end];
    let body_start = end + 4;
    let body = rest[body_start..].strip_prefix('\n').unwrap_or(&rest[body_start..]);

    let parsed = serde_yaml::from_str::<serde_yaml::Value>(fm_text)
        .ok()
        .and_then(|v| serde_json::to_value(v).ok())
        .and_then(|v| v.as_object().cloned());

    (parsed.unwrap_or_default(), body)
}

/// Extract headings by scanning leading `#` lines. Each heading's end_line
/// is the last line before the next heading (of any level) or EOF —
/// headings partition the body by line ranges (invariant 2, §8).
fn extract_headings(body: &str) -> Vec<Heading> {
    let lines: Vec<&str> = body.lines().collect();
    let mut starts: Vec<(usize, u8, String)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let Some(rest) = trimmed.get(level..) else { continue };
        if !rest.starts_with(' ') && !rest.is_empty() {
            continue;
        }
        let text = rest.trim().to_string();
        starts.push((i, level as u8, text));
    }

    let mut headings = Vec::with_capacity(starts.len());
    for (idx, (start_line, level, text)) in starts.iter().enumerate() {
        let end_line = starts
            .get(idx + 1)
            .map(|(next_start, _, _)| next_start.saturating_sub(1))
            .unwrap_or(lines.len().saturating_sub(1));
        headings.push(Heading {
            level: *level,
            text: text.clone(),
            start_line: *start_line,
            end_line: end_line.max(*start_line),
        });
    }
    headings
}

/// Short hex content hash: stable over whitespace-normalized body (§3 iv).
pub fn content_hash_hex(body: &str) -> String {
    let normalized = collapse_whitespace(body.trim());
    let hash = xxhash_rust::xxh3::xxh3_64(normalized.as_bytes());
    format!("{:08x}", (hash as u32))
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if prev_space {
                continue;
            }
            prev_space = true;
            out.push(' ');
        } else {
            prev_space = false;
            out.push(ch);
        }
    }
    out
}

/// Per-document term multiset used by the BM25 builder: title + path
/// (separators as spaces) + tags + content preview, per §4.7.
pub fn document_terms(doc: &Document) -> Vec<String> {
    let mut text = String::new();
    if let Some(t) = &doc.title {
        text.push_str(t);
        text.push(' ');
    }
    text.push_str(&doc.path.replace(['/', '-', '_'], " "));
    text.push(' ');
    text.push_str(&doc.tags.join(" "));
    text.push(' ');
    text.push_str(&doc.content_preview);
    tokenize(&text)
}

pub fn documents_dir(root: &Path) -> PathBuf {
    root.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[test]
    fn frontmatter_and_body_split_correctly() {
        let raw = "---\nuri: k-scheme://canon/auth\ntitle: Auth Policy\n---\n# Auth\nbody text\n";
        let (fm, body) = split_frontmatter(raw);
        assert_eq!(fm.get("uri").unwrap().as_str().unwrap(), "k-scheme://canon/auth");
        assert_eq!(fm.get("title").unwrap().as_str().unwrap(), "Auth Policy");
        assert!(body.starts_with("# Auth"));
    }

    #[test]
    fn headings_partition_body_by_line_range() {
        let body = "# One\nline a\nline b\n## Two\nline c\n# Three\nline d\n";
        let headings = extract_headings(body);
        assert_eq!(headings.len(), 3);
        for h in &headings {
            assert!(h.start_line <= h.end_line, "invariant 2: start_line <= end_line");
        }
        // contiguous: each heading's end is one before the next start.
        assert_eq!(headings[0].end_line + 1, headings[1].start_line);
        assert_eq!(headings[1].end_line + 1, headings[2].start_line);
    }

    #[test]
    fn content_hash_stable_across_whitespace_variation() {
        let a = content_hash_hex("hello   world\n\n");
        let b = content_hash_hex("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn authority_band_defaults_from_directory() {
        assert_eq!(authority_band_from_dir("canon"), AuthorityBand::Governing);
        assert_eq!(authority_band_from_dir("docs"), AuthorityBand::Operational);
        assert_eq!(authority_band_from_dir("scratch"), AuthorityBand::NonGoverning);
    }

    #[test]
    fn noindex_sentinel_excludes_descendants_silently() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "canon/apocrypha/.noindex", "");
        write(tmp.path(), "canon/apocrypha/secret.md", "# Secret\nhidden\n");
        write(tmp.path(), "canon/public.md", "# Public\nvisible\n");

        let opts = IndexBuildOptions::default();
        let (docs, excluded) = walk_corpus(tmp.path(), Origin::Local, &opts);
        assert_eq!(excluded, 1);
        assert!(docs.iter().all(|d| !d.path.contains("apocrypha")));
        assert!(docs.iter().any(|d| d.path == "canon/public.md"));
    }

    #[test]
    fn build_index_counts_stats_correctly() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "canon/a.md", "# A\nhello\n");
        write(tmp.path(), "docs/b.md", "# B\nworld\n");
        let opts = IndexBuildOptions::default();
        let index = build_index(tmp.path(), None, &opts, "2026-07-28T00:00:00Z");
        assert_eq!(index.stats.total, 2);
        assert_eq!(index.stats.local, 2);
        assert_eq!(index.stats.baseline, 0);
    }
}
