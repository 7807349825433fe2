//! Identity dedup (§4.5): collapse duplicates across local/baseline by
//! identity, detect URI collisions and URI drift.

use std::collections::HashMap;

use crate::index_builder::{Document, Origin};

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocRef {
    pub path: String,
    pub origin: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CollapsedGroup {
    pub identity: String,
    pub chosen: DocRef,
    pub collapsed: Vec<DocRef>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UriCollision {
    pub uri: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DriftMagnitude {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UriDrift {
    pub uri: String,
    pub local_path: String,
    pub baseline_path: String,
    pub magnitude: DriftMagnitude,
    pub governing: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DedupResult {
    pub kept: Vec<usize>,
    pub collapsed_groups: Vec<CollapsedGroup>,
    pub uri_collisions: Vec<UriCollision>,
    pub uri_drifts: Vec<UriDrift>,
    pub excessive_duplicates: bool,
}

fn doc_ref(doc: &Document) -> DocRef {
    DocRef {
        path: doc.path.clone(),
        origin: match doc.origin {
            Origin::Local => "local".to_string(),
            Origin::Baseline => "baseline".to_string(),
        },
    }
}

/// Drift magnitude thresholds are implementation-defined (spec.md §9 open
/// question (d)): small < 200 char body-length delta, medium 200-1000,
/// large > 1000.
fn drift_magnitude(local_len: usize, baseline_len: usize) -> DriftMagnitude {
    let delta = local_len.abs_diff(baseline_len);
    if delta < 200 {
        DriftMagnitude::Small
    } else if delta <= 1000 {
        DriftMagnitude::Medium
    } else {
        DriftMagnitude::Large
    }
}

pub fn dedup(documents: &[Document]) -> DedupResult {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, doc) in documents.iter().enumerate() {
        groups.entry(doc.identity()).or_default().push(i);
    }

    // URI collision: two docs share a uri but differ in content_hash.
    let mut by_uri: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, doc) in documents.iter().enumerate() {
        if let Some(uri) = &doc.uri {
            by_uri.entry(uri.clone()).or_default().push(i);
        }
    }
    let mut uri_collisions = Vec::new();
    let mut collision_identities: std::collections::HashSet<String> = Default::default();
    for (uri, idxs) in &by_uri {
        if idxs.len() < 2 {
            continue;
        }
        let hashes: std::collections::HashSet<&String> =
            idxs.iter().map(|&i| &documents[i].content_hash).collect();
        if hashes.len() > 1 {
            uri_collisions.push(UriCollision {
                uri: uri.clone(),
                paths: idxs.iter().map(|&i| documents[i].path.clone()).collect(),
            });
            collision_identities.insert(uri.clone());
        }
    }

    // URI drift: a local and a baseline doc share a uri with different
    // content_hash, and it isn't a collision (i.e. normal versioning).
    let mut uri_drifts = Vec::new();
    for (uri, idxs) in &by_uri {
        if collision_identities.contains(uri) {
            continue;
        }
        let local_idx = idxs.iter().find(|&&i| documents[i].origin == Origin::Local);
        let baseline_idx = idxs.iter().find(|&&i| documents[i].origin == Origin::Baseline);
        if let (Some(&li), Some(&bi)) = (local_idx, baseline_idx) {
            if documents[li].content_hash != documents[bi].content_hash {
                let magnitude = drift_magnitude(documents[li].body.len(), documents[bi].body.len());
                let governing = documents[li].authority_band == crate::index_builder::AuthorityBand::Governing
                    || documents[bi].authority_band == crate::index_builder::AuthorityBand::Governing;
                uri_drifts.push(UriDrift {
                    uri: uri.clone(),
                    local_path: documents[li].path.clone(),
                    baseline_path: documents[bi].path.clone(),
                    magnitude,
                    governing,
                });
            }
        }
    }

    let mut kept = Vec::new();
    let mut collapsed_groups = Vec::new();
    let mut candidate_count = 0usize;
    let mut collapsed_count = 0usize;

    for (identity, idxs) in &groups {
        candidate_count += idxs.len();
        if collision_identities.contains(identity) {
            // Un-collapsible: all members remain candidates.
            kept.extend(idxs.iter().copied());
            continue;
        }
        if idxs.len() == 1 {
            kept.push(idxs[0]);
            continue;
        }
        let chosen = *idxs
            .iter()
            .min_by(|&&a, &&b| {
                let da = &documents[a];
                let db = &documents[b];
                // prefer local over baseline
                let origin_rank = |o: Origin| if o == Origin::Local { 0 } else { 1 };
                origin_rank(da.origin)
                    .cmp(&origin_rank(db.origin))
                    .then_with(|| db.intent.cmp(&da.intent))
                    .then_with(|| da.path.cmp(&db.path))
            })
            .unwrap();
        kept.push(chosen);
        let collapsed: Vec<DocRef> = idxs.iter().filter(|&&i| i != chosen).map(|&i| doc_ref(&documents[i])).collect();
        collapsed_count += collapsed.len();
        collapsed_groups.push(CollapsedGroup {
            identity: identity.clone(),
            chosen: doc_ref(&documents[chosen]),
            collapsed,
        });
    }

    let excessive_duplicates =
        candidate_count > 0 && (collapsed_count as f64 / candidate_count as f64) > 0.25;

    kept.sort();
    DedupResult { kept, collapsed_groups, uri_collisions, uri_drifts, excessive_duplicates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_builder::{AuthorityBand, Evidence, Heading, Intent};

    fn doc(path: &str, origin: Origin, uri: Option<&str>, body: &str, intent: Intent) -> Document {
        Document {
            path: path.to_string(),
            origin,
            uri: uri.map(String::from),
            title: None,
            tags: vec![],
            authority_band: AuthorityBand::Operational,
            intent,
            evidence: Evidence::Medium,
            supersedes: vec![],
            content_hash: crate::index_builder::content_hash_hex(body),
            headings: Vec::<Heading>::new(),
            content_preview: body.chars().take(500).collect(),
            frontmatter: Default::default(),
            body: body.to_string(),
        }
    }

    #[test]
    fn prefers_local_over_baseline_on_identity_collapse() {
        let docs = vec![
            doc("docs/a.md", Origin::Baseline, None, "same body", Intent::Operational),
            doc("docs/a.md", Origin::Local, None, "same body", Intent::Operational),
        ];
        let result = dedup(&docs);
        assert_eq!(result.kept, vec![1]);
        assert_eq!(result.collapsed_groups.len(), 1);
        assert_eq!(result.collapsed_groups[0].chosen.origin, "local");
    }

    #[test]
    fn uri_collision_keeps_both_candidates() {
        let docs = vec![
            doc("docs/a.md", Origin::Local, Some("k-scheme://x"), "body one", Intent::Operational),
            doc("docs/b.md", Origin::Local, Some("k-scheme://x"), "body two", Intent::Operational),
        ];
        let result = dedup(&docs);
        assert_eq!(result.uri_collisions.len(), 1);
        assert_eq!(result.kept.len(), 2, "collision group must not be collapsed");
    }

    #[test]
    fn uri_drift_detected_between_local_and_baseline() {
        let docs = vec![
            doc("docs/a.md", Origin::Baseline, Some("k-scheme://x"), "old body", Intent::Operational),
            doc("docs/a.md", Origin::Local, Some("k-scheme://x"), "new body with more content", Intent::Operational),
        ];
        let result = dedup(&docs);
        assert_eq!(result.uri_drifts.len(), 1);
        assert_eq!(result.uri_drifts[0].uri, "k-scheme://x");
    }
}
