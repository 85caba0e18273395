//! Lexical scoring of sections against a free-text query.
//!
//! Deterministic phrase/term scoring with a small domain-keyword bonus.
//! Ties keep source order, so results are stable across runs.

use crate::models::{SearchFilters, Section, SectionHit};

/// Domain keywords worth a one-time bonus when they appear in both the
/// query and the section.
const DOMAIN_KEYWORDS: &[&str] = &[
    "implementation",
    "architecture",
    "flow",
    "diagram",
    "example",
    "interface",
    "contract",
    "specification",
];

const PHRASE_HEADING_BONUS: f32 = 100.0;
const PHRASE_CONTENT_BONUS: f32 = 50.0;
const TERM_HEADING_BONUS: f32 = 10.0;
const TERM_CONTENT_BONUS: f32 = 5.0;
const KEYWORD_BONUS: f32 = 15.0;

/// Score `sections` against `query`, returning the top `max_results` hits
/// with positive scores, ties in source order.
pub fn score_sections(
    sections: &[Section],
    query: &str,
    filters: &SearchFilters,
    max_results: usize,
) -> Vec<SectionHit> {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return Vec::new();
    }
    let terms: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .collect();

    let mut hits: Vec<SectionHit> = sections
        .iter()
        .filter(|s| passes_filters(s, filters))
        .filter_map(|s| score_one(s, &query_lower, &terms))
        .collect();

    // Stable sort: equal scores keep section order.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(max_results);
    hits
}

fn passes_filters(section: &Section, filters: &SearchFilters) -> bool {
    if let Some(release) = &filters.release {
        if &section.release != release {
            return false;
        }
    }
    if let Some(service) = &filters.service {
        let service = service.to_lowercase();
        let in_heading = section.heading.to_lowercase().contains(&service);
        let in_content = section.content.to_lowercase().contains(&service);
        if !in_heading && !in_content {
            return false;
        }
    }
    if let Some(doc_types) = &filters.doc_types {
        if !doc_types.iter().any(|d| d == &section.doc_type) {
            return false;
        }
    }
    true
}

fn score_one(section: &Section, query_lower: &str, terms: &[&str]) -> Option<SectionHit> {
    let heading = section.heading.to_lowercase();
    let content = section.content.to_lowercase();

    let mut score = 0.0;
    let mut reasons = Vec::new();

    if heading.contains(query_lower) {
        score += PHRASE_HEADING_BONUS;
        reasons.push("Exact match in heading".to_string());
    }
    if content.contains(query_lower) {
        score += PHRASE_CONTENT_BONUS;
        reasons.push("Exact match in content".to_string());
    }

    let heading_terms = terms.iter().filter(|t| heading.contains(**t)).count();
    if heading_terms > 0 {
        score += TERM_HEADING_BONUS * heading_terms as f32;
        reasons.push(format!("{heading_terms} terms in heading"));
    }
    let content_terms = terms.iter().filter(|t| content.contains(**t)).count();
    if content_terms > 0 {
        score += TERM_CONTENT_BONUS * content_terms as f32;
        reasons.push(format!("{content_terms} terms in content"));
    }

    // First matching keyword only.
    if let Some(keyword) = DOMAIN_KEYWORDS.iter().find(|k| {
        query_lower.contains(**k) && (heading.contains(**k) || content.contains(**k))
    }) {
        score += KEYWORD_BONUS;
        reasons.push(format!("Keyword match: {keyword}"));
    }

    if score <= 0.0 {
        return None;
    }

    Some(SectionHit {
        file: section.file.clone(),
        release: section.release.clone(),
        doc_type: section.doc_type.clone(),
        heading: section.heading.clone(),
        line_start: section.line_start,
        line_end: section.line_end,
        score,
        match_reasons: reasons,
        snippet: section.snippet(),
    })
}
