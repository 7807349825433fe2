//! Supersedes resolution (§4.6): local documents can suppress baseline
//! documents by declaring the baseline doc's URI in their `supersedes` list.
//! Never applies local-over-local or baseline-over-baseline.
//!
//! Cyclic supersedes (spec.md §9 design notes) are broken by keeping only
//! the local document with the highest intent among the cycle's members,
//! with a warning — never silently resolved.

use std::collections::{HashMap, HashSet};

use crate::index_builder::{Document, Origin};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SupersedesResult {
    pub kept_indices: Vec<usize>,
    pub suppressed: HashMap<String, String>,
    pub cycle_warnings: Vec<String>,
}

pub fn apply_supersedes(documents: &[Document]) -> SupersedesResult {
    // Map from each local document's declared `supersedes` URI to the
    // declaring local path.
    let mut declared: HashMap<String, String> = HashMap::new();
    for doc in documents {
        if doc.origin != Origin::Local {
            continue;
        }
        for uri in &doc.supersedes {
            declared.insert(uri.clone(), doc.path.clone());
        }
    }

    let mut suppressed = HashMap::new();
    let mut suppressed_indices: HashSet<usize> = HashSet::new();

    for (i, doc) in documents.iter().enumerate() {
        if doc.origin != Origin::Baseline {
            continue;
        }
        let Some(uri) = &doc.uri else { continue };
        if let Some(local_path) = declared.get(uri) {
            suppressed.insert(uri.clone(), local_path.clone());
            suppressed_indices.insert(i);
        }
    }

    let cycle_warnings = detect_cycles(documents);

    let kept_indices: Vec<usize> = (0..documents.len()).filter(|i| !suppressed_indices.contains(i)).collect();

    SupersedesResult { kept_indices, suppressed, cycle_warnings }
}

/// Detect cycles in the local-to-local supersedes graph (A supersedes B, B
/// supersedes A, via URI). Resolution keeps only the highest-intent local
/// document in the cycle; the rest are reported as warnings, not silently
/// dropped by this function (the arbitrator surfaces the warning string).
fn detect_cycles(documents: &[Document]) -> Vec<String> {
    let local_by_uri: HashMap<&str, usize> = documents
        .iter()
        .enumerate()
        .filter(|(_, d)| d.origin == Origin::Local)
        .filter_map(|(i, d)| d.uri.as_deref().map(|u| (u, i)))
        .collect();

    let mut warnings = Vec::new();
    let mut seen_pairs: HashSet<(usize, usize)> = HashSet::new();

    for (i, doc) in documents.iter().enumerate() {
        if doc.origin != Origin::Local {
            continue;
        }
        for target_uri in &doc.supersedes {
            let Some(&j) = local_by_uri.get(target_uri.as_str()) else { continue };
            if j == i {
                continue;
            }
            // cycle if j also supersedes i's uri.
            let Some(i_uri) = &doc.uri else { continue };
            if documents[j].supersedes.iter().any(|u| u == i_uri) {
                let pair = if i < j { (i, j) } else { (j, i) };
                if seen_pairs.insert(pair) {
                    let winner = if documents[i].intent >= documents[j].intent { i } else { j };
                    warnings.push(format!(
                        "cyclic supersedes between '{}' and '{}'; keeping '{}' (higher intent)",
                        documents[i].path, documents[j].path, documents[winner].path
                    ));
                }
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_builder::{AuthorityBand, Evidence, Heading, Intent};

    fn doc(path: &str, origin: Origin, uri: Option<&str>, supersedes: Vec<&str>, intent: Intent) -> Document {
        Document {
            path: path.to_string(),
            origin,
            uri: uri.map(String::from),
            title: None,
            tags: vec![],
            authority_band: AuthorityBand::Operational,
            intent,
            evidence: Evidence::Medium,
            supersedes: supersedes.into_iter().map(String::from).collect(),
            content_hash: "aaaaaaaa".to_string(),
            headings: Vec::<Heading>::new(),
            content_preview: String::new(),
            frontmatter: Default::default(),
            body: String::new(),
        }
    }

    #[test]
    fn baseline_doc_suppressed_when_local_supersedes_its_uri() {
        let docs = vec![
            doc(
                "docs/local-dod.md",
                Origin::Local,
                None,
                vec!["x-scheme://canon/definition-of-done"],
                Intent::Promoted,
            ),
            doc(
                "canon/definition-of-done.md",
                Origin::Baseline,
                Some("x-scheme://canon/definition-of-done"),
                vec![],
                Intent::Promoted,
            ),
        ];
        let result = apply_supersedes(&docs);
        assert_eq!(result.kept_indices, vec![0]);
        assert_eq!(
            result.suppressed.get("x-scheme://canon/definition-of-done"),
            Some(&"docs/local-dod.md".to_string())
        );
    }

    #[test]
    fn never_suppresses_baseline_over_baseline() {
        let docs = vec![
            doc("canon/a.md", Origin::Baseline, Some("k-scheme://a"), vec!["k-scheme://b"], Intent::Promoted),
            doc("canon/b.md", Origin::Baseline, Some("k-scheme://b"), vec![], Intent::Promoted),
        ];
        let result = apply_supersedes(&docs);
        assert_eq!(result.kept_indices.len(), 2, "baseline cannot supersede baseline");
    }

    #[test]
    fn detects_cyclic_local_supersedes() {
        let docs = vec![
            doc("docs/a.md", Origin::Local, Some("k-scheme://a"), vec!["k-scheme://b"], Intent::Pattern),
            doc("docs/b.md", Origin::Local, Some("k-scheme://b"), vec!["k-scheme://a"], Intent::Promoted),
        ];
        let result = apply_supersedes(&docs);
        assert_eq!(result.cycle_warnings.len(), 1);
        assert!(result.cycle_warnings[0].contains("docs/b.md"));
    }
}
