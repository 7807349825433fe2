//! Evidence extractor (§4.9): pulls a short, quotable excerpt and citation
//! out of a document for a given query.

use crate::index_builder::{Document, Heading};
use crate::scorer::tokenize;

const NORMATIVE_KEYWORDS: &[&str] = &["must", "should", "shall", "requires"];
const MIN_WORDS: usize = 8;
const MAX_WORDS_CEILING: usize = 40;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractedEvidence {
    pub quote: String,
    pub citation: String,
}

/// Extract a quotable excerpt from `doc` relevant to `query_tokens`.
/// Returns `None` when the document has fewer than `MIN_WORDS` words
/// available in its body (no usable excerpt).
pub fn extract(doc: &Document, query_tokens: &[String], max_words: usize) -> Option<ExtractedEvidence> {
    let max_words = max_words.clamp(MIN_WORDS, MAX_WORDS_CEILING);
    let heading = best_heading(doc, query_tokens);
    let lines: Vec<&str> = doc.body.lines().collect();

    let (slice_text, citation_heading) = match &heading {
        Some(h) => {
            let start = h.start_line.min(lines.len());
            let end = (h.end_line + 1).min(lines.len());
            (lines[start..end].join(" "), h.text.clone())
        }
        None => (doc.body.clone(), String::new()),
    };

    let cleaned = strip_markdown_emphasis(&collapse_whitespace(&slice_text));
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() < MIN_WORDS {
        return None;
    }

    let keyword_pos = words.iter().position(|w| {
        let bare = w.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase();
        NORMATIVE_KEYWORDS.contains(&bare.as_str())
    });

    let start = match keyword_pos {
        Some(p) => p.saturating_sub(2),
        None => 0,
    };
    let end = (start + max_words).min(words.len());
    let quote_words = &words[start..end];
    if quote_words.len() < MIN_WORDS {
        return None;
    }

    let quote = quote_words.join(" ");
    let citation = if citation_heading.is_empty() {
        doc.path.clone()
    } else {
        format!("{}#{}", doc.path, citation_heading)
    };

    Some(ExtractedEvidence { quote, citation })
}

/// Pick the heading whose text has the most tokens overlapping the query.
/// Ties go to the first level-2 heading; failing that, the document's first
/// heading; if there are no headings at all, `None` (whole body is used).
fn best_heading<'a>(doc: &'a Document, query_tokens: &[String]) -> Option<&'a Heading> {
    if doc.headings.is_empty() {
        return None;
    }
    let mut best: Option<(&Heading, usize)> = None;
    for h in &doc.headings {
        let heading_tokens = tokenize(&h.text);
        let overlap = query_tokens.iter().filter(|t| heading_tokens.contains(t)).count();
        match &best {
            None => best = Some((h, overlap)),
            Some((_, best_overlap)) if overlap > *best_overlap => best = Some((h, overlap)),
            _ => {}
        }
    }
    if let Some((h, overlap)) = best {
        if overlap > 0 {
            return Some(h);
        }
    }
    doc.headings.iter().find(|h| h.level == 2).or_else(|| doc.headings.first())
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
    out.trim().to_string()
}

fn strip_markdown_emphasis(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '*' | '_' | '`')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_builder::{AuthorityBand, Evidence, Intent, Origin};

    fn doc_with_body(path: &str, body: &str, headings: Vec<Heading>) -> Document {
        Document {
            path: path.to_string(),
            origin: Origin::Local,
            uri: None,
            title: None,
            tags: vec![],
            authority_band: AuthorityBand::Governing,
            intent: Intent::Promoted,
            evidence: Evidence::Strong,
            supersedes: vec![],
            content_hash: "aaaaaaaa".to_string(),
            headings,
            content_preview: body.chars().take(500).collect(),
            frontmatter: Default::default(),
            body: body.to_string(),
        }
    }

    #[test]
    fn extracts_window_around_normative_keyword() {
        let body = "# Auth\nAll services must validate tokens before accepting a request from any untrusted caller whatsoever today.\n";
        let headings = vec![Heading { level: 1, text: "Auth".to_string(), start_line: 0, end_line: 1 }];
        let doc = doc_with_body("canon/auth.md", body, headings);
        let result = extract(&doc, &["token".to_string()], 10).unwrap();
        assert!(result.quote.contains("must validate tokens"));
        assert_eq!(result.citation, "canon/auth.md#Auth");
    }

    #[test]
    fn picks_heading_with_most_query_overlap() {
        let body = "# Intro\nshort.\n## Token Validation\nTokens must be checked carefully against the issuer before granting access anywhere.\n";
        let headings = vec![
            Heading { level: 1, text: "Intro".to_string(), start_line: 0, end_line: 1 },
            Heading { level: 2, text: "Token Validation".to_string(), start_line: 2, end_line: 3 },
        ];
        let doc = doc_with_body("canon/auth.md", body, headings);
        let result = extract(&doc, &["token".to_string(), "validation".to_string()], 15).unwrap();
        assert_eq!(result.citation, "canon/auth.md#Token Validation");
    }

    #[test]
    fn returns_none_when_too_short() {
        let body = "# X\ntiny.\n";
        let headings = vec![Heading { level: 1, text: "X".to_string(), start_line: 0, end_line: 1 }];
        let doc = doc_with_body("docs/x.md", body, headings);
        assert!(extract(&doc, &["anything".to_string()], 25).is_none());
    }
}
