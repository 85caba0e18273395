//! Cross-encoder reranking via an OpenAI-compatible `/v1/rerank` endpoint.
//!
//! Sends a single batch request with all query-document pairs. When the
//! reranker is disabled the inputs pass through untouched; when it is
//! unreachable a deterministic heuristic scorer takes over.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::RerankerConfig;
use crate::models::{RerankedHit, VectorHit};

/// Re-order candidates by cross-relevance to `query`.
///
/// Disabled or empty input: every hit passes through with
/// `rerank_score = score`, order untouched. Enabled with a configured
/// provider: provider scores in descending order, backfilled from the
/// remaining inputs when the provider returns fewer than `top_k`. Provider
/// errors fall back to the heuristic scorer.
pub async fn rerank(
    client: &reqwest::Client,
    config: &RerankerConfig,
    query: &str,
    hits: Vec<VectorHit>,
) -> Vec<RerankedHit> {
    if !config.enabled || hits.is_empty() {
        return hits
            .into_iter()
            .map(|hit| RerankedHit {
                rerank_score: hit.score,
                hit,
            })
            .collect();
    }

    if config.base_url.is_some() {
        let documents: Vec<String> = hits.iter().map(|h| h.chunk.content.clone()).collect();
        match call_reranker(client, config, query, &documents, config.top_k).await {
            Ok(results) => return apply_provider_order(hits, results, config.top_k),
            Err(e) => {
                tracing::error!("Reranker call failed, using heuristic scores: {e}");
            }
        }
    }

    heuristic_rerank(query, hits, config.top_k)
}

/// Map provider results back onto hits, provider-descending first, then
/// backfill from the remaining inputs in original order.
fn apply_provider_order(
    hits: Vec<VectorHit>,
    results: Vec<ProviderScore>,
    top_k: usize,
) -> Vec<RerankedHit> {
    let mut taken = vec![false; hits.len()];
    let mut out = Vec::with_capacity(top_k.min(hits.len()));

    for result in results {
        if out.len() >= top_k {
            break;
        }
        if let Some(hit) = hits.get(result.index) {
            if !taken[result.index] {
                taken[result.index] = true;
                out.push(RerankedHit {
                    hit: hit.clone(),
                    rerank_score: result.score,
                });
            }
        }
    }

    for (i, hit) in hits.iter().enumerate() {
        if out.len() >= top_k {
            break;
        }
        if !taken[i] {
            out.push(RerankedHit {
                hit: hit.clone(),
                rerank_score: hit.score,
            });
        }
    }

    out
}

/// Heuristic cross-relevance: a flat phrase bonus plus length-damped
/// per-term presence. Also the mocked fallback in tests.
pub fn heuristic_rerank(query: &str, hits: Vec<VectorHit>, top_k: usize) -> Vec<RerankedHit> {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();

    let mut scored: Vec<RerankedHit> = hits
        .into_iter()
        .map(|hit| {
            let content = hit.chunk.content.to_lowercase();
            let phrase: f32 = if content.contains(&query_lower) { 10.0 } else { 0.0 };
            let term_hits = terms.iter().filter(|t| content.contains(**t)).count() as f32;
            let damping = ((content.chars().count() + 1) as f32).ln() / 10.0;
            // Only the term component is damped by content length.
            let rerank_score = phrase
                + if damping > 0.0 {
                    term_hits / damping
                } else {
                    0.0
                };
            RerankedHit { hit, rerank_score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

struct ProviderScore {
    index: usize,
    score: f32,
}

async fn call_reranker(
    client: &reqwest::Client,
    config: &RerankerConfig,
    query: &str,
    documents: &[String],
    top_n: usize,
) -> Result<Vec<ProviderScore>> {
    let base_url = config
        .base_url
        .as_deref()
        .context("Reranker base_url not configured")?;
    let model = config.model.as_deref().unwrap_or("default");

    let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));
    let req_body = RerankRequest {
        model: model.to_string(),
        query: query.to_string(),
        documents: documents.to_vec(),
        top_n,
    };

    let timeout = std::time::Duration::from_secs(config.timeout_secs.min(30));

    let resp = client
        .post(&url)
        .timeout(timeout)
        .json(&req_body)
        .send()
        .await
        .context("Failed to reach reranker endpoint")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Reranker returned {status}: {body}");
    }

    let body: RerankResponse = resp
        .json()
        .await
        .context("Failed to parse reranker response")?;

    let mut results: Vec<ProviderScore> = body
        .results
        .into_iter()
        .map(|r| ProviderScore {
            index: r.index,
            score: sigmoid(r.relevance_score),
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Ok(results)
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}
