//! BM25 lexical scorer with authority/intent/evidence/origin band
//! multipliers (§4.7).

use std::collections::HashMap;

use rayon::prelude::*;

use crate::index_builder::{document_terms, AuthorityBand, Document, Origin};

pub const DEFAULT_K1: f64 = 1.2;
pub const DEFAULT_B: f64 = 0.75;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "on",
    "at", "for", "and", "or", "but", "not", "with", "as", "by", "from", "this", "that", "it",
    "its", "do", "does", "did", "can", "could", "should", "would", "will", "shall", "may",
    "might", "must", "what", "which", "who", "whom", "how", "why", "when", "where",
];

/// Lowercase, strip punctuation, split on whitespace/dash/underscore/slash,
/// drop stop words and tokens shorter than 2, stem with suffix rules.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_ascii_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c == '-' || c == '_' || c == '/' || c.is_whitespace() { ' ' } else if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| w.len() >= 2)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(stem)
        .collect()
}

/// Rule-based suffix stripping: ies→y, ied→y, consonant+ed→consonant, strip
/// {ing, tion, ment, ness, able, ible}, trailing s.
fn stem(word: &str) -> String {
    if let Some(stripped) = word.strip_suffix("ies") {
        return format!("{stripped}y");
    }
    if let Some(stripped) = word.strip_suffix("ied") {
        return format!("{stripped}y");
    }
    if let Some(stripped) = word.strip_suffix("ed") {
        if stripped.len() > 1 && !is_vowel(stripped.chars().last().unwrap()) {
            return stripped.to_string();
        }
    }
    for suffix in ["tion", "ment", "ness", "able", "ible", "ing"] {
        if let Some(stripped) = word.strip_suffix(suffix) {
            if stripped.len() >= 2 {
                return stripped.to_string();
            }
        }
    }
    if let Some(stripped) = word.strip_suffix('s') {
        if !word.ends_with("ss") && stripped.len() >= 2 {
            return stripped.to_string();
        }
    }
    word.to_string()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// The index's derived BM25 structure: term→doc-frequency, per-doc term
/// multiset, average length, total doc count (§3 Index), plus the k1/b
/// parameters it was built with (§10.3 `ScoringConfig`, overridable).
#[derive(Debug, Clone)]
pub struct Bm25Stats {
    pub doc_freq: HashMap<String, usize>,
    pub doc_terms: Vec<Vec<String>>,
    pub doc_len: Vec<usize>,
    pub avgdl: f64,
    pub n: usize,
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Stats {
    fn default() -> Self {
        Self { doc_freq: HashMap::new(), doc_terms: Vec::new(), doc_len: Vec::new(), avgdl: 0.0, n: 0, k1: DEFAULT_K1, b: DEFAULT_B }
    }
}

impl Bm25Stats {
    /// Build with the spec's default k1/b (1.2/0.75).
    pub fn build(documents: &[Document]) -> Self {
        Self::build_with_params(documents, DEFAULT_K1, DEFAULT_B)
    }

    /// Build with caller-supplied BM25 parameters (`ScoringConfig.k1`/`.b`).
    pub fn build_with_params(documents: &[Document], k1: f64, b: f64) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_terms = Vec::with_capacity(documents.len());
        let mut doc_len = Vec::with_capacity(documents.len());
        let mut total_len = 0usize;

        for doc in documents {
            let terms = document_terms(doc);
            doc_len.push(terms.len());
            total_len += terms.len();
            let unique: std::collections::HashSet<&String> = terms.iter().collect();
            for t in unique {
                *doc_freq.entry(t.clone()).or_insert(0) += 1;
            }
            doc_terms.push(terms);
        }

        let n = documents.len();
        let avgdl = if n > 0 { total_len as f64 / n as f64 } else { 0.0 };

        Self { doc_freq, doc_terms, doc_len, avgdl, n, k1, b }
    }

    fn idf(&self, term: &str) -> f64 {
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
        let n = self.n as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of one document against a tokenized query.
    pub fn bm25_score(&self, doc_index: usize, query_terms: &[String]) -> f64 {
        let Some(terms) = self.doc_terms.get(doc_index) else { return 0.0 };
        let len = self.doc_len[doc_index] as f64;
        let mut tf_map: HashMap<&str, usize> = HashMap::new();
        for t in terms {
            *tf_map.entry(t.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for q in query_terms {
            let tf = *tf_map.get(q.as_str()).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(q);
            let denom = tf + self.k1 * (1.0 - self.b + self.b * len / self.avgdl.max(1.0));
            score += idf * (tf * (self.k1 + 1.0)) / denom;
        }
        score
    }
}

#[derive(Debug, Clone)]
pub struct Signals {
    pub bm25: f64,
    pub authority_multiplier: f64,
    pub intent_multiplier: f64,
    pub evidence_multiplier: f64,
    pub origin_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredDoc {
    pub doc_index: usize,
    pub score: f64,
    pub signals: Signals,
}

fn authority_multiplier(band: AuthorityBand) -> f64 {
    match band {
        AuthorityBand::Governing => 1.5,
        AuthorityBand::Operational => 1.2,
        AuthorityBand::NonGoverning => 1.0,
    }
}

fn origin_multiplier(origin: Origin) -> f64 {
    match origin {
        Origin::Local => 1.1,
        Origin::Baseline => 1.0,
    }
}

/// Score every document in `documents` against `query_terms`, applying the
/// authority/intent/evidence/origin band multipliers multiplicatively.
/// Ties broken by (higher intent, then local-over-baseline, then
/// lexicographic path) — callers sort with `ScoredDoc::cmp_key`.
///
/// Scoring is CPU-bound and embarrassingly parallel by document (each score
/// depends only on the shared, read-only `bm25` stats), so it is correct to
/// parallelize the per-document map like the teacher's `run_query_slice`
/// does for its own per-candidate scoring pass.
pub fn score_all(documents: &[Document], bm25: &Bm25Stats, query_terms: &[String]) -> Vec<ScoredDoc> {
    documents
        .par_iter()
        .enumerate()
        .map(|(i, doc)| {
            let base = bm25.bm25_score(i, query_terms);
            let authority_multiplier = authority_multiplier(doc.authority_band);
            let intent_multiplier = doc.intent.multiplier();
            let evidence_multiplier = doc.evidence.multiplier();
            let origin_multiplier = origin_multiplier(doc.origin);
            let score = base * authority_multiplier * intent_multiplier * evidence_multiplier * origin_multiplier;
            ScoredDoc {
                doc_index: i,
                score,
                signals: Signals {
                    bm25: base,
                    authority_multiplier,
                    intent_multiplier,
                    evidence_multiplier,
                    origin_multiplier,
                },
            }
        })
        .collect()
}

/// Sort key for tie-breaking: (higher intent desc, local-over-baseline,
/// lexicographic path asc).
pub fn sort_scored(scored: &mut [ScoredDoc], documents: &[Document]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = &documents[a.doc_index];
                let db = &documents[b.doc_index];
                db.intent.cmp(&da.intent)
            })
            .then_with(|| {
                let da = &documents[a.doc_index];
                let db = &documents[b.doc_index];
                match (da.origin, db.origin) {
                    (Origin::Local, Origin::Baseline) => std::cmp::Ordering::Less,
                    (Origin::Baseline, Origin::Local) => std::cmp::Ordering::Greater,
                    _ => std::cmp::Ordering::Equal,
                }
            })
            .then_with(|| {
                let da = &documents[a.doc_index];
                let db = &documents[b.doc_index];
                da.path.cmp(&db.path)
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_stopwords_and_stems() {
        let tokens = tokenize("The Authentication Policies are Required");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"are".to_string()));
        assert!(tokens.contains(&"authentication".to_string()) || tokens.contains(&"authenticat".to_string()));
        assert!(tokens.iter().any(|t| t.starts_with("polic")));
    }

    #[test]
    fn stem_handles_ies_and_ed() {
        assert_eq!(stem("policies"), "policy");
        assert_eq!(stem("required"), "requir");
        assert_eq!(stem("running"), "runn");
    }

    #[test]
    fn idf_decreases_with_document_frequency() {
        let mut stats = Bm25Stats::default();
        stats.n = 10;
        stats.doc_freq.insert("rare".into(), 1);
        stats.doc_freq.insert("common".into(), 9);
        assert!(stats.idf("rare") > stats.idf("common"));
    }
}
