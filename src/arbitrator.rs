//! Arbitrator (§4.8): intent-veto post-filter, collision escalation,
//! confidence scoring, and outcome decision.

use std::collections::HashSet;

use crate::dedup::DedupResult;
use crate::index_builder::Document;
use crate::scorer::ScoredDoc;
use crate::supersedes::SupersedesResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Outcome {
    Prefer,
    Defer,
    Escalate,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Candidate {
    pub doc_index: usize,
    pub path: String,
    pub score: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ArbitrationResult {
    pub outcome: Outcome,
    pub confidence: f64,
    pub advisory: bool,
    pub candidates: Vec<Candidate>,
    pub contradictions: Vec<String>,
    pub vetoed: Vec<String>,
    pub warnings: Vec<String>,
    pub suppressed: std::collections::HashMap<String, String>,
}

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Intent-veto + collision escalation + confidence + outcome, per §4.8.
/// `scored` must already be restricted to documents survived by dedup and
/// supersedes; `sort_scored` should have been applied beforehand.
/// `confidence_threshold` comes from `ScoringConfig.confidence_threshold`.
pub fn arbitrate(
    documents: &[Document],
    scored: &[ScoredDoc],
    dedup_result: &DedupResult,
    supersedes_result: &SupersedesResult,
    confidence_threshold: f64,
) -> ArbitrationResult {
    let mut ranked: Vec<ScoredDoc> = scored.to_vec();
    let mut vetoed = Vec::new();
    let mut contradictions = Vec::new();
    let mut warnings = supersedes_result.cycle_warnings.clone();

    // Intent veto (§4.8): for each pair (H high-intent, L low-intent) where
    // L currently outranks H and L has no explicit supersedes over H's
    // identity, forcibly demote L below H. This is a re-ordering, not a
    // score tweak (spec.md §9 open question (b): the multiplier is bias only,
    // this post-filter is the authoritative behavior).
    let mut violated_before_demotion = false;
    for hi in 0..ranked.len() {
        for li in 0..ranked.len() {
            if hi == li {
                continue;
            }
            let h_doc = &documents[ranked[hi].doc_index];
            let l_doc = &documents[ranked[li].doc_index];
            if l_doc.intent >= h_doc.intent {
                continue;
            }
            let l_supersedes_h = l_doc.supersedes.iter().any(|u| h_doc.uri.as_deref() == Some(u.as_str()));
            if l_supersedes_h {
                continue;
            }
            let l_outranks_h = ranked[li].score >= ranked[hi].score;
            if l_outranks_h {
                violated_before_demotion = true;
                if !vetoed.contains(&l_doc.path) {
                    vetoed.push(l_doc.path.clone());
                }
            }
        }
    }

    // Apply the demotion: any vetoed document is re-ordered below every
    // higher-intent candidate that scored beneath it, by zeroing its
    // effective rank priority (pushed to the back, preserving relative order
    // among vetoed docs and among non-vetoed docs).
    let vetoed_set: HashSet<String> = vetoed.iter().cloned().collect();
    ranked.sort_by(|a, b| {
        let a_vetoed = vetoed_set.contains(&documents[a.doc_index].path);
        let b_vetoed = vetoed_set.contains(&documents[b.doc_index].path);
        a_vetoed.cmp(&b_vetoed).then_with(|| {
            if a_vetoed && b_vetoed {
                // Among vetoed docs, intent precedence must still hold
                // pairwise (§8 invariant 3) — order by intent desc first,
                // score only breaks ties within the same intent tier.
                documents[b.doc_index]
                    .intent
                    .cmp(&documents[a.doc_index].intent)
                    .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
            } else {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            }
        })
    });

    if violated_before_demotion {
        warnings.push("INTENT_PRECEDENCE_VIOLATED".to_string());
    }
    if !vetoed.is_empty() {
        warnings.push("INTENT_PRECEDENCE_VETOED".to_string());
    }

    for collision in &dedup_result.uri_collisions {
        contradictions.push(format!("URI_COLLISION: {}", collision.uri));
    }
    if dedup_result.excessive_duplicates {
        warnings.push("EXCESSIVE_DUPLICATES".to_string());
    }
    for drift in &dedup_result.uri_drifts {
        let tag = if drift.governing { "URI_DRIFT (governing)" } else { "URI_DRIFT" };
        warnings.push(format!("{tag}: {} ({:?})", drift.uri, drift.magnitude));
    }

    let has_collision = !dedup_result.uri_collisions.is_empty();

    let confidence = compute_confidence(documents, &ranked, contradictions.len());

    let outcome = if has_collision {
        Outcome::Escalate
    } else if confidence >= confidence_threshold && contradictions.is_empty() {
        Outcome::Prefer
    } else if confidence < confidence_threshold && !contradictions.is_empty() {
        Outcome::Escalate
    } else {
        Outcome::Defer
    };

    let advisory = matches!(outcome, Outcome::Defer) || confidence < confidence_threshold;

    let candidates = ranked
        .iter()
        .map(|s| Candidate { doc_index: s.doc_index, path: documents[s.doc_index].path.clone(), score: s.score })
        .collect();

    ArbitrationResult {
        outcome,
        confidence,
        advisory,
        candidates,
        contradictions,
        vetoed,
        warnings,
        suppressed: supersedes_result.suppressed.clone(),
    }
}

/// confidence = clamp(0.4*margin + 0.2*coverage + 0.2*evidence_quality +
/// 0.2*intent_quality - conflict_penalty, 0, 1).
fn compute_confidence(documents: &[Document], ranked: &[ScoredDoc], contradiction_count: usize) -> f64 {
    if ranked.is_empty() {
        return 0.0;
    }
    let top = ranked[0].score;
    let second = ranked.get(1).map(|s| s.score).unwrap_or(0.0);
    let margin = if top > 0.0 { ((top - second) / top).clamp(0.0, 1.0) } else { 0.0 };

    let k_hits = ranked.len();
    let coverage = (k_hits as f64 / 3.0).min(1.0);

    let top_k = ranked.iter().take(3).collect::<Vec<_>>();
    let evidence_quality = top_k
        .iter()
        .map(|s| documents[s.doc_index].evidence.multiplier())
        .sum::<f64>()
        / top_k.len() as f64;
    let intent_quality = top_k
        .iter()
        .map(|s| documents[s.doc_index].intent.multiplier())
        .sum::<f64>()
        / top_k.len() as f64;

    // Evidence/intent multipliers range well above 1.0; normalize against
    // their maxima (1.2 and 1.5 respectively) so confidence stays in [0,1].
    let evidence_quality = (evidence_quality / 1.2).clamp(0.0, 1.0);
    let intent_quality = (intent_quality / 1.5).clamp(0.0, 1.0);

    let conflict_penalty = 0.2 * contradiction_count as f64;

    (0.4 * margin + 0.2 * coverage + 0.2 * evidence_quality + 0.2 * intent_quality - conflict_penalty)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_builder::{AuthorityBand, Evidence, Heading, Intent, Origin};
    use crate::scorer::Signals;

    fn doc(path: &str, intent: Intent, uri: Option<&str>) -> Document {
        Document {
            path: path.to_string(),
            origin: Origin::Local,
            uri: uri.map(String::from),
            title: None,
            tags: vec![],
            authority_band: AuthorityBand::Governing,
            intent,
            evidence: Evidence::Strong,
            supersedes: vec![],
            content_hash: "aaaaaaaa".to_string(),
            headings: Vec::<Heading>::new(),
            content_preview: String::new(),
            frontmatter: Default::default(),
            body: String::new(),
        }
    }

    fn scored(doc_index: usize, score: f64) -> ScoredDoc {
        ScoredDoc {
            doc_index,
            score,
            signals: Signals { bm25: score, authority_multiplier: 1.0, intent_multiplier: 1.0, evidence_multiplier: 1.0, origin_multiplier: 1.0 },
        }
    }

    #[test]
    fn intent_veto_demotes_low_intent_outranking_doc() {
        let docs = vec![
            doc("docs/workaround.md", Intent::Workaround, None),
            doc("canon/auth.md", Intent::Promoted, None),
        ];
        // workaround scores higher than the promoted doc before veto.
        let scored_list = vec![scored(0, 5.0), scored(1, 3.0)];
        let dedup_result = DedupResult::default();
        let supersedes_result = SupersedesResult::default();

        let result = arbitrate(&docs, &scored_list, &dedup_result, &supersedes_result, DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(result.vetoed.contains(&"docs/workaround.md".to_string()));
        assert_eq!(result.candidates[0].path, "canon/auth.md", "promoted must rank above vetoed workaround");
        assert!(result.warnings.contains(&"INTENT_PRECEDENCE_VIOLATED".to_string()));
        assert!(result.contradictions.is_empty(), "resolved precedence is informational, not a contradiction");
    }

    #[test]
    fn vetoed_group_keeps_intent_order_among_themselves() {
        let docs = vec![
            doc("docs/workaround.md", Intent::Workaround, None),
            doc("docs/pattern.md", Intent::Pattern, None),
            doc("canon/auth.md", Intent::Promoted, None),
        ];
        // Both workaround and pattern out-score the promoted doc, so both
        // are vetoed; among themselves, pattern (higher intent) must still
        // rank above workaround per §8 invariant 3.
        let scored_list = vec![scored(0, 5.0), scored(1, 4.0), scored(2, 3.0)];
        let dedup_result = DedupResult::default();
        let supersedes_result = SupersedesResult::default();

        let result = arbitrate(&docs, &scored_list, &dedup_result, &supersedes_result, DEFAULT_CONFIDENCE_THRESHOLD);
        let rank_of = |p: &str| result.candidates.iter().position(|c| c.path == p).unwrap();
        assert!(rank_of("canon/auth.md") < rank_of("docs/pattern.md"));
        assert!(rank_of("docs/pattern.md") < rank_of("docs/workaround.md"));
    }

    #[test]
    fn uri_collision_forces_escalate_regardless_of_score() {
        let docs = vec![
            doc("docs/a.md", Intent::Operational, Some("k-scheme://x")),
            doc("docs/b.md", Intent::Operational, Some("k-scheme://x")),
        ];
        let scored_list = vec![scored(0, 10.0), scored(1, 1.0)];
        let mut dedup_result = DedupResult::default();
        dedup_result.uri_collisions.push(crate::dedup::UriCollision {
            uri: "k-scheme://x".to_string(),
            paths: vec!["docs/a.md".to_string(), "docs/b.md".to_string()],
        });
        let supersedes_result = SupersedesResult::default();

        let result = arbitrate(&docs, &scored_list, &dedup_result, &supersedes_result, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(result.outcome, Outcome::Escalate);
    }

    #[test]
    fn no_supersedes_means_low_intent_never_wins_without_override() {
        let docs = vec![
            doc("docs/v1.md", Intent::Operational, None),
            doc("docs/v2.md", Intent::Operational, None),
        ];
        let scored_list = vec![scored(0, 1.01), scored(1, 1.0)];
        let dedup_result = DedupResult::default();
        let supersedes_result = SupersedesResult::default();
        let result = arbitrate(&docs, &scored_list, &dedup_result, &supersedes_result, DEFAULT_CONFIDENCE_THRESHOLD);
        // equal intent: no veto applies, nearly tied scores -> low confidence.
        assert!(result.vetoed.is_empty());
        assert!(result.confidence < 0.6);
    }
}
