//! Section chunker: token-bounded, overlap-preserving splits that respect
//! heading and code-fence boundaries.

use crate::models::{Chunk, ChunkMetadata, Section};

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub respect_headings: bool,
    pub respect_code_fences: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 50,
            respect_headings: true,
            respect_code_fences: true,
        }
    }
}

/// Estimated token count: ceil(chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Split a section into chunks. Every chunk's content begins with
/// `heading + "\n\n"`; `chunk_index` is contiguous from 0 and `total_chunks`
/// is uniform across the section's chunks.
pub fn chunk_section(section: &Section, opts: &ChunkOptions) -> Vec<Chunk> {
    if estimate_tokens(&section.content) <= opts.max_tokens {
        return vec![finish_chunk(
            section,
            format!("{}\n\n{}", section.heading, section.content),
            0,
            1,
        )];
    }

    let segments = segment_lines(&section.content, opts);
    let heading_tokens = estimate_tokens(&section.heading);

    // Greedy assembly: flush when the next segment would overflow, seeding
    // the next chunk with whole tail segments up to the overlap budget.
    let mut assembled: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = heading_tokens;

    for seg in segments {
        let seg_tokens = estimate_tokens(&seg);
        if !current.is_empty() && current_tokens + seg_tokens > opts.max_tokens {
            assembled.push(current.join("\n"));

            let overlap = tail_overlap(&current, opts.overlap_tokens);
            current_tokens = heading_tokens
                + overlap.iter().map(|s| estimate_tokens(s)).sum::<usize>();
            current = overlap;
        }
        current_tokens += seg_tokens;
        current.push(seg);
    }
    if !current.is_empty() {
        assembled.push(current.join("\n"));
    }

    let total = assembled.len();
    assembled
        .into_iter()
        .enumerate()
        .map(|(i, body)| {
            finish_chunk(section, format!("{}\n\n{}", section.heading, body), i, total)
        })
        .collect()
}

/// Pull whole segments from the tail until adding one more would exceed the
/// overlap budget.
fn tail_overlap(segments: &[String], overlap_tokens: usize) -> Vec<String> {
    let mut overlap: Vec<String> = Vec::new();
    let mut tokens = 0;
    for seg in segments.iter().rev() {
        let seg_tokens = estimate_tokens(seg);
        if tokens + seg_tokens > overlap_tokens {
            break;
        }
        tokens += seg_tokens;
        overlap.push(seg.clone());
    }
    overlap.reverse();
    overlap
}

/// Split content into segments at fence closings, headings, and blank lines
/// following long runs.
fn segment_lines(content: &str, opts: &ChunkOptions) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in content.lines() {
        let is_fence_marker = line.trim_start().starts_with("```");

        if in_fence {
            current.push(line);
            if is_fence_marker {
                in_fence = false;
                if opts.respect_code_fences {
                    segments.push(current.join("\n"));
                    current = Vec::new();
                }
            }
            continue;
        }

        if is_fence_marker {
            in_fence = true;
            current.push(line);
        } else if opts.respect_headings && is_heading_line(line) {
            if !current.is_empty() {
                segments.push(current.join("\n"));
            }
            current = vec![line];
        } else if line.trim().is_empty() && current.len() > 10 {
            segments.push(current.join("\n"));
            current = Vec::new();
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        segments.push(current.join("\n"));
    }

    segments
}

fn is_heading_line(line: &str) -> bool {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    (1..=6).contains(&hashes)
        && line[hashes..].starts_with([' ', '\t'])
        && !line[hashes..].trim().is_empty()
}

fn finish_chunk(section: &Section, content: String, index: usize, total: usize) -> Chunk {
    let tokens = estimate_tokens(&content);
    Chunk {
        id: format!(
            "{}:{}-{}:{}",
            section.file, section.line_start, section.line_end, index
        ),
        content,
        metadata: ChunkMetadata {
            file: section.file.clone(),
            release: section.release.clone(),
            doc_type: section.doc_type.clone(),
            service: None,
            heading: section.heading.clone(),
            line_start: section.line_start,
            line_end: section.line_end,
            chunk_index: index,
            total_chunks: total,
        },
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(content: &str) -> Section {
        Section {
            file: "R1-NOTES.md".into(),
            release: "R1".into(),
            doc_type: "NOTES".into(),
            heading: "Topic".into(),
            content: content.into(),
            line_start: 1,
            line_end: 40,
        }
    }

    fn assert_invariants(chunks: &[Chunk], heading: &str) {
        assert!(!chunks.is_empty());
        let total = chunks[0].metadata.total_chunks;
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.content.starts_with(&format!("{heading}\n\n")));
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, total);
        }
        assert_eq!(total, chunks.len());
    }

    #[test]
    fn test_small_section_single_chunk() {
        let s = section("short body");
        let chunks = chunk_section(&s, &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Topic\n\nshort body");
        assert_eq!(chunks[0].id, "R1-NOTES.md:1-40:0");
        assert_invariants(&chunks, "Topic");
    }

    #[test]
    fn test_exactly_max_tokens_single_chunk() {
        // 2048 chars = exactly 512 estimated tokens.
        let s = section(&"a".repeat(2048));
        let chunks = chunk_section(&s, &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_over_budget_splits_with_heading_prefix() {
        let body: String = (0..200)
            .map(|i| format!("paragraph line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let s = section(&body);
        let chunks = chunk_section(&s, &ChunkOptions::default());
        assert!(chunks.len() > 1);
        assert_invariants(&chunks, "Topic");
        for chunk in &chunks {
            // Budget holds apart from a possible single oversized segment.
            assert!(chunk.tokens <= 512 + 64, "chunk too large: {}", chunk.tokens);
        }
    }

    #[test]
    fn test_ids_unique_and_schema() {
        let body: String = (0..200)
            .map(|i| format!("line {i} text that fills the budget steadily"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let s = section(&body);
        let chunks = chunk_section(&s, &ChunkOptions::default());
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());
        assert!(chunks[0].id.starts_with("R1-NOTES.md:1-40:"));
    }

    #[test]
    fn test_code_fence_kept_whole() {
        let mut body = String::new();
        for i in 0..60 {
            body.push_str(&format!("prose line {i} padding padding padding\n"));
        }
        body.push_str("```rust\nfn main() {\n    let x = 1;\n}\n```\n");
        for i in 0..60 {
            body.push_str(&format!("more prose {i} padding padding padding\n"));
        }

        let opts = ChunkOptions {
            max_tokens: 120,
            ..ChunkOptions::default()
        };
        let chunks = chunk_section(&section(&body), &opts);
        assert!(chunks.len() > 1);

        // The fence never splits across chunks: any chunk containing the
        // opening marker also contains the close.
        for chunk in &chunks {
            let opens = chunk.content.matches("```").count();
            assert_eq!(opens % 2, 0, "unbalanced fence in chunk: {}", chunk.content);
        }
    }

    #[test]
    fn test_heading_starts_new_segment() {
        let mut body = String::new();
        for i in 0..40 {
            body.push_str(&format!("alpha content line {i} with filler text here\n"));
        }
        body.push_str("## Subtopic\n");
        for i in 0..40 {
            body.push_str(&format!("beta content line {i} with filler text here\n"));
        }

        let opts = ChunkOptions {
            max_tokens: 200,
            ..ChunkOptions::default()
        };
        let chunks = chunk_section(&section(&body), &opts);
        assert!(chunks.len() > 1);
        // The subtopic heading begins a segment, so it starts a line.
        let holder = chunks
            .iter()
            .find(|c| c.content.contains("## Subtopic"))
            .unwrap();
        assert!(holder.content.contains("\n## Subtopic"));
    }

    #[test]
    fn test_overlap_seeds_next_chunk() {
        let body: String = (0..120)
            .map(|i| format!("distinct marker line {i:03} abcdefghij"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let opts = ChunkOptions {
            max_tokens: 150,
            overlap_tokens: 60,
            ..ChunkOptions::default()
        };
        let chunks = chunk_section(&section(&body), &opts);
        assert!(chunks.len() > 2);

        // Some tail content of chunk i reappears at the head of chunk i+1.
        let mut overlapped = 0;
        for pair in chunks.windows(2) {
            let prev_tail = pair[0].content.lines().last().unwrap();
            if pair[1].content.contains(prev_tail) {
                overlapped += 1;
            }
        }
        assert!(overlapped > 0, "no overlap observed between chunks");
    }

    #[test]
    fn test_blank_line_flush_only_after_long_runs() {
        let short = "a\nb\n\nc\nd";
        let segs = segment_lines(short, &ChunkOptions::default());
        // Fewer than 10 lines accumulated: blank does not flush.
        assert_eq!(segs.len(), 1);

        let long: String = (0..12)
            .map(|i| format!("l{i}"))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n\ntail";
        let segs = segment_lines(&long, &ChunkOptions::default());
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn test_estimate_tokens_ceil() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
