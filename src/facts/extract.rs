//! Subject-predicate-object extraction from Markdown and diff payloads.
//!
//! A fact line is `<subject> <sep> <object>` where the separator is `:`,
//! `-`, or `=`. The predicate is always the literal "is"; equivalence is
//! decided on normalized subjects and canonicalized objects, so
//! "Database: PostgreSQL" and "database : postgresql" hash the same.

use sha2::{Digest, Sha256};

use crate::models::Fact;

const SEPARATORS: [char; 3] = [':', '-', '='];
const MAX_SUBJECT_CHARS: usize = 200;

/// Extract facts from Markdown text. `line_offset` is the 1-based source
/// line of the first line of `content`.
pub fn extract_from_markdown(
    content: &str,
    file: &str,
    heading: Option<&str>,
    line_offset: usize,
) -> Vec<Fact> {
    let mut facts = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("<!--") {
            continue;
        }
        let Some((subject, object)) = split_fact_line(line) else {
            continue;
        };

        let line_no = line_offset + i;
        facts.push(make_fact(
            subject,
            "is",
            object,
            file,
            heading,
            Some(line_no),
            Some(line_no),
        ));
    }

    facts
}

/// Extract facts from a unified-diff payload: added (`+`) and context (` `)
/// lines are unprefixed and scanned; removal lines keep their `-` prefix,
/// which the subject rule then rejects.
pub fn extract_from_diff(diff: &str, file: &str) -> Vec<Fact> {
    let stripped: Vec<&str> = diff
        .lines()
        .map(|line| {
            if line.starts_with('+') || line.starts_with(' ') {
                &line[1..]
            } else {
                line
            }
        })
        .collect();
    extract_from_markdown(&stripped.join("\n"), file, None, 1)
}

/// Split a line into `(subject, object)` at the first separator. Returns
/// None when the line isn't a fact: subject empty, starting with a
/// separator, or longer than 200 chars; object empty.
fn split_fact_line(line: &str) -> Option<(&str, &str)> {
    let first = line.chars().next()?;
    if SEPARATORS.contains(&first) || first == '#' {
        return None;
    }

    let sep_idx = line.find(&SEPARATORS[..])?;
    let subject = line[..sep_idx].trim();
    let object = line[sep_idx + 1..].trim();

    if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_CHARS || object.is_empty() {
        return None;
    }
    Some((subject, object))
}

fn make_fact(
    subject: &str,
    predicate: &str,
    object: &str,
    file: &str,
    heading: Option<&str>,
    line_start: Option<usize>,
    line_end: Option<usize>,
) -> Fact {
    let normalized_key = format!("{}::{}", normalize(subject), normalize(predicate));
    let canonical_object = canonicalize(object);
    let hash = fact_hash(subject, predicate, object);
    Fact {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object: object.to_string(),
        file: file.to_string(),
        heading: heading.map(str::to_string),
        line_start,
        line_end,
        normalized_key,
        canonical_object,
        hash,
    }
}

/// Lowercase, normalize line endings, collapse whitespace runs.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize, then map numeric strings (thousands-separator commas and
/// embedded spaces allowed) to their plain decimal form. Booleans are
/// already lowercased by normalization.
pub fn canonicalize(object: &str) -> String {
    let normalized = normalize(object);
    let stripped: String = normalized
        .chars()
        .filter(|c| *c != ',' && *c != ' ')
        .collect();
    if is_decimal(&stripped) {
        stripped
    } else {
        normalized
    }
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() {
        return false;
    }
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    digits != "." && !digits.starts_with('.') && !digits.ends_with('.')
}

/// Stable digest over the normalized triple. Facts that normalize the same
/// hash the same.
pub fn fact_hash(subject: &str, predicate: &str, object: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(subject).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(predicate).as_bytes());
    hasher.update(b"|");
    hasher.update(canonicalize(object).as_bytes());
    format!("{:x}", hasher.finalize())
}
