//! Grounded answer pipeline: normalize → embed → retrieve → rerank → build
//! context → synthesize → assess grounding.
//!
//! Also owns corpus ingestion into the vector store (parse → chunk → embed →
//! upsert), which startup, refresh, and the watcher all reuse.

use std::fmt::Write as _;
use std::path::Path;

use crate::docs::chunker::{self, ChunkOptions};
use crate::error::{CoreError, CoreResult};
use crate::llm::{generate, rerank};
use crate::models::{AnswerRequest, Citation, RagResponse, RerankedHit, SearchFilters};
use crate::search::vector::VectorFilter;
use crate::state::AppState;

const DEFAULT_MAX_TOKENS: u32 = 1_024;
/// Server-side bounds; the transport imposes none of its own.
const MAX_MAX_TOKENS: u32 = 4_096;
const MAX_K: usize = 50;
/// How many reranked hits feed the synthesis context.
const CONTEXT_HITS: usize = 5;
/// How many citations compose the no-provider fallback answer.
const FALLBACK_CITATIONS: usize = 3;

const NO_RESULTS_ANSWER: &str = "No relevant documentation found for this query.";

const GROUNDING_SYSTEM_PROMPT: &str = "You are a documentation assistant. Answer using ONLY the provided context.\n\
     Every claim in your answer must be traceable to one of the numbered citations.\n\
     If the context does not contain the answer, say so explicitly instead of guessing.\n\
     Cite files and line ranges, e.g. [R2-ARCHITECTURE.md, lines 10-24].";

/// Answer a query with citations grounded in retrieved chunks.
pub async fn answer(state: &AppState, req: &AnswerRequest) -> CoreResult<RagResponse> {
    let normalized = req.query.trim();
    if normalized.is_empty() {
        return Err(CoreError::Parse("query is required".into()));
    }

    let k = req.k.unwrap_or(state.config.reranker.top_k).clamp(1, MAX_K);
    let max_tokens = req
        .max_tokens
        .unwrap_or(DEFAULT_MAX_TOKENS)
        .min(MAX_MAX_TOKENS);

    let embedding = state.embedder.embed(normalized).await?;
    let filter = to_vector_filter(&req.filters);
    let hits = state
        .vectors
        .search(&embedding.embedding, k, filter.as_ref());

    if hits.is_empty() {
        return Ok(RagResponse {
            answer: NO_RESULTS_ANSWER.to_string(),
            citations: Vec::new(),
            grounding_score: 0.0,
            insufficient_evidence: true,
            missing_topics: Some(vec![normalized.to_string()]),
        });
    }

    let reranked = rerank::rerank(
        &state.http_client,
        &state.config.reranker,
        normalized,
        hits,
    )
    .await;

    let citations: Vec<Citation> = reranked.iter().map(to_citation).collect();
    let context = build_context(&reranked);

    let answer = match synthesize(state, &context, normalized, max_tokens).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Answer generation unavailable, using citation digest: {e}");
            fallback_answer(&citations)
        }
    };

    let grounding_score = assess_grounding(&answer, &citations);
    let insufficient_evidence = grounding_score < 0.3;
    let missing_topics = if insufficient_evidence && !citations.is_empty() {
        Some(vec!["Additional context needed".to_string()])
    } else {
        None
    };

    Ok(RagResponse {
        answer,
        citations,
        grounding_score,
        insufficient_evidence,
        missing_topics,
    })
}

/// Chunk and embed every section under `root`, upserting into the vector
/// store. Returns the number of chunks indexed.
pub async fn index_corpus(state: &AppState, root: &Path) -> CoreResult<usize> {
    let index = {
        let state = state.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || state.doc_index(&root))
            .await
            .map_err(|e| CoreError::Provider(format!("index task failed: {e}")))??
    };

    let opts = ChunkOptions::default();
    let chunks: Vec<_> = index
        .sections
        .iter()
        .flat_map(|s| chunker::chunk_section(s, &opts))
        .collect();
    if chunks.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let batch = state.embedder.embed_batch(&texts).await?;
    state.vectors.upsert(&chunks, &batch.embeddings)?;

    tracing::info!(
        "Indexed {} chunks from {} sections under {}",
        chunks.len(),
        index.sections.len(),
        root.display()
    );
    Ok(chunks.len())
}

fn to_vector_filter(filters: &SearchFilters) -> Option<VectorFilter> {
    let doc_type = match filters.doc_types.as_deref() {
        // The store filters by equality; only a single doc type maps.
        Some([single]) => Some(single.clone()),
        _ => None,
    };
    let filter = VectorFilter {
        release: filters.release.clone(),
        doc_type,
        service: filters.service.clone(),
        file: None,
    };
    (!filter.is_empty()).then_some(filter)
}

fn to_citation(hit: &RerankedHit) -> Citation {
    let meta = &hit.hit.chunk.metadata;
    Citation {
        file: meta.file.clone(),
        heading: meta.heading.clone(),
        line_start: meta.line_start,
        line_end: meta.line_end,
        snippet: crate::models::snippet_of(&hit.hit.chunk.content, 300),
        relevance: hit.rerank_score,
    }
}

/// Labelled context blocks for the top hits, numbered to match citations.
fn build_context(reranked: &[RerankedHit]) -> String {
    let mut context = String::new();
    for (i, hit) in reranked.iter().take(CONTEXT_HITS).enumerate() {
        let meta = &hit.hit.chunk.metadata;
        write!(
            context,
            "[Citation {}: {}, lines {}-{}]\nHeading: {}\n",
            i + 1,
            meta.file,
            meta.line_start,
            meta.line_end,
            meta.heading
        )
        .unwrap();
        if !meta.release.is_empty() {
            writeln!(context, "Release: {}", meta.release).unwrap();
        }
        write!(context, "Content:\n{}\n\n---\n\n", hit.hit.chunk.content).unwrap();
    }
    context
}

async fn synthesize(
    state: &AppState,
    context: &str,
    question: &str,
    max_tokens: u32,
) -> CoreResult<String> {
    let user_prompt = format!("Context:\n\n{context}Question: {question}");
    generate::generate_answer(
        &state.http_client,
        &state.config.llm,
        GROUNDING_SYSTEM_PROMPT,
        &user_prompt,
        max_tokens,
    )
    .await
}

/// Citation digest used when no generation provider is reachable.
fn fallback_answer(citations: &[Citation]) -> String {
    let mut answer = String::from("Based on the retrieved documentation:\n\n");
    for (i, citation) in citations.iter().take(FALLBACK_CITATIONS).enumerate() {
        writeln!(
            answer,
            "{}. {} [{}, lines {}-{}]: {}",
            i + 1,
            citation.heading,
            citation.file,
            citation.line_start,
            citation.line_end,
            citation.snippet.replace('\n', " ")
        )
        .unwrap();
    }
    answer
}

/// Score in [0, 1] for how much of the cited evidence the answer
/// acknowledges: +0.3 for citation markers, +0.2 per heading echoed.
fn assess_grounding(answer: &str, citations: &[Citation]) -> f32 {
    let mut score: f32 = 0.0;
    if answer.contains('[') || answer.contains("lines") {
        score += 0.3;
    }
    let answer_lower = answer.to_lowercase();
    for citation in citations {
        if !citation.heading.is_empty()
            && answer_lower.contains(&citation.heading.to_lowercase())
        {
            score += 0.2;
        }
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, VectorHit};

    fn reranked(heading: &str, content: &str, score: f32) -> RerankedHit {
        RerankedHit {
            hit: VectorHit {
                chunk: Chunk {
                    id: format!("R1-NOTES.md:1-5:0-{heading}"),
                    content: content.into(),
                    metadata: ChunkMetadata {
                        file: "R1-NOTES.md".into(),
                        release: "R1".into(),
                        doc_type: "NOTES".into(),
                        service: None,
                        heading: heading.into(),
                        line_start: 1,
                        line_end: 5,
                        chunk_index: 0,
                        total_chunks: 0,
                    },
                    tokens: 10,
                },
                score,
            },
            rerank_score: score,
        }
    }

    fn citation(heading: &str) -> Citation {
        Citation {
            file: "R1-NOTES.md".into(),
            heading: heading.into(),
            line_start: 1,
            line_end: 5,
            snippet: "snippet".into(),
            relevance: 0.5,
        }
    }

    #[test]
    fn test_context_block_format() {
        let hits = vec![reranked("Auth overview", "Auth overview\n\nbody", 0.9)];
        let context = build_context(&hits);
        assert!(context.starts_with("[Citation 1: R1-NOTES.md, lines 1-5]\n"));
        assert!(context.contains("Heading: Auth overview\n"));
        assert!(context.contains("Release: R1\n"));
        assert!(context.contains("Content:\nAuth overview\n\nbody\n\n---\n\n"));
    }

    #[test]
    fn test_context_caps_at_five_blocks() {
        let hits: Vec<RerankedHit> = (0..8)
            .map(|i| reranked(&format!("H{i}"), "body", 0.5))
            .collect();
        let context = build_context(&hits);
        assert!(context.contains("[Citation 5:"));
        assert!(!context.contains("[Citation 6:"));
    }

    #[test]
    fn test_fallback_answer_digests_top_three() {
        let citations: Vec<Citation> = (0..5).map(|i| citation(&format!("H{i}"))).collect();
        let answer = fallback_answer(&citations);
        assert!(answer.contains("1. H0"));
        assert!(answer.contains("3. H2"));
        assert!(!answer.contains("4. H3"));
        assert!(answer.contains("lines 1-5"));
    }

    #[test]
    fn test_grounding_score_components() {
        let citations = vec![citation("Auth overview"), citation("Payments")];

        // No markers, no headings.
        assert_eq!(assess_grounding("nothing relevant", &citations), 0.0);

        // Markers only.
        let score = assess_grounding("see [1] for details", &citations);
        assert!((score - 0.3).abs() < 1e-6);

        // Markers plus one heading.
        let score = assess_grounding("Auth overview says so, lines 1-5", &citations);
        assert!((score - 0.5).abs() < 1e-6);

        // Both headings echoed.
        let score =
            assess_grounding("Auth overview and Payments, see lines 1-5", &citations);
        assert!((score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_grounding_clamped_at_one() {
        let citations: Vec<Citation> = (0..10).map(|i| citation(&format!("H{i}"))).collect();
        let answer = format!(
            "lines {}",
            (0..10).map(|i| format!("H{i}")).collect::<Vec<_>>().join(" ")
        );
        assert_eq!(assess_grounding(&answer, &citations), 1.0);
    }

    #[test]
    fn test_fallback_answer_is_self_grounding() {
        // The citation digest names headings and line ranges, so its own
        // grounding assessment clears the insufficiency bar.
        let citations = vec![citation("Auth overview")];
        let answer = fallback_answer(&citations);
        assert!(assess_grounding(&answer, &citations) >= 0.3);
    }

    #[test]
    fn test_vector_filter_mapping() {
        let filters = SearchFilters {
            release: Some("R1".into()),
            service: None,
            doc_types: Some(vec!["NOTES".into()]),
        };
        let filter = to_vector_filter(&filters).unwrap();
        assert_eq!(filter.release.as_deref(), Some("R1"));
        assert_eq!(filter.doc_type.as_deref(), Some("NOTES"));

        // Multiple doc types can't map to an equality filter.
        let filters = SearchFilters {
            doc_types: Some(vec!["NOTES".into(), "PRD".into()]),
            ..SearchFilters::default()
        };
        assert!(to_vector_filter(&filters).is_none());

        assert!(to_vector_filter(&SearchFilters::default()).is_none());
    }

    #[tokio::test]
    async fn test_empty_query_rejected_before_io() {
        let state = AppState::new(crate::config::Config::default()).unwrap();
        let req = AnswerRequest {
            query: "   ".into(),
            filters: SearchFilters::default(),
            max_tokens: None,
            k: None,
        };
        let err = answer(&state, &req).await.unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));
    }

    #[tokio::test]
    async fn test_zero_hits_sentinel_response() {
        let mut config = crate::config::Config::default();
        config.llm.provider = "hash".into();
        let state = AppState::new(config).unwrap();

        let req = AnswerRequest {
            query: "anything".into(),
            filters: SearchFilters::default(),
            max_tokens: None,
            k: None,
        };
        let resp = answer(&state, &req).await.unwrap();
        assert_eq!(resp.answer, NO_RESULTS_ANSWER);
        assert!(resp.citations.is_empty());
        assert_eq!(resp.grounding_score, 0.0);
        assert!(resp.insufficient_evidence);
        assert_eq!(resp.missing_topics, Some(vec!["anything".to_string()]));
    }
}
