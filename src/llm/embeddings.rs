use std::collections::{HashMap, VecDeque};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::docs::chunker::estimate_tokens;
use crate::error::{CoreError, CoreResult};

/// Maximum characters to send per text to the embedding API.
/// nomic-embed-text has an 8 192-token context; dense prose tokenises at up
/// to ~2.3 tokens/char, so 3 000 chars stays safely under it.
const MAX_EMBED_CHARS: usize = 3_000;

/// Bounded FIFO capacity for the per-process embedding cache.
const CACHE_CAPACITY: usize = 1_024;

/// FNV-1a offset basis and prime (64-bit), for the hash fallback embedder.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct Embedding {
    pub embedding: Vec<f32>,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct BatchEmbeddings {
    pub embeddings: Vec<Vec<f32>>,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EmbedCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct EmbedCache {
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl EmbedCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.map.get(key) {
            self.hits += 1;
            Some(v.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    fn insert(&mut self, key: String, value: Vec<f32>) {
        if self.map.contains_key(&key) {
            return;
        }
        if self.order.len() >= CACHE_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }
}

/// Embedding provider with a per-process cache.
///
/// Identical input text yields identical output within a process: repeats
/// are served from the cache, and the deterministic hash fallback kicks in
/// when the remote provider fails.
pub struct Embedder {
    client: reqwest::Client,
    config: LlmConfig,
    cache: Mutex<EmbedCache>,
}

impl Embedder {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self {
            client,
            config,
            cache: Mutex::new(EmbedCache::new()),
        }
    }

    /// Embed a single text. The result is unit-norm.
    pub async fn embed(&self, text: &str) -> CoreResult<Embedding> {
        let texts = [text.to_string()];
        let batch = self.embed_batch(&texts).await?;
        let embedding = batch
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Provider("no embedding returned".into()))?;
        Ok(Embedding {
            embedding,
            tokens: batch.total_tokens,
        })
    }

    /// Embed a batch, order-preserving. Cache fills first; remaining texts
    /// go to the provider in chunks of `embed_batch_size`.
    pub async fn embed_batch(&self, texts: &[String]) -> CoreResult<BatchEmbeddings> {
        if texts.is_empty() {
            return Ok(BatchEmbeddings {
                embeddings: Vec::new(),
                total_tokens: 0,
            });
        }

        self.check_credentials()?;

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for (i, text) in texts.iter().enumerate() {
                match cache.get(text) {
                    Some(v) => results[i] = Some(v),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            let batch_size = self.config.embed_batch_size.max(1);
            for window in missing.chunks(batch_size) {
                let inputs: Vec<String> = window
                    .iter()
                    .map(|&i| truncate_for_embedding(&texts[i], MAX_EMBED_CHARS).to_string())
                    .collect();

                let vectors = self.provider_embed(&inputs).await;
                let mut cache = self.cache.lock();
                for (slot, vector) in window.iter().zip(vectors.into_iter()) {
                    let normalized = l2_normalize(vector);
                    cache.insert(texts[*slot].clone(), normalized.clone());
                    results[*slot] = Some(normalized);
                }
            }
        }

        let total_tokens = texts.iter().map(|t| estimate_tokens(t)).sum();
        let embeddings = results
            .into_iter()
            .map(|r| r.unwrap_or_default())
            .collect();
        Ok(BatchEmbeddings {
            embeddings,
            total_tokens,
        })
    }

    pub fn cache_stats(&self) -> EmbedCacheStats {
        let cache = self.cache.lock();
        EmbedCacheStats {
            entries: cache.map.len(),
            hits: cache.hits,
            misses: cache.misses,
        }
    }

    /// Fail fast when the configured provider needs a credential that isn't
    /// there. Operations that don't embed are unaffected.
    fn check_credentials(&self) -> CoreResult<()> {
        if self.config.provider == "openai" && self.config.api_key.is_none() {
            return Err(CoreError::Config(
                "openai embedding provider requires LLM_API_KEY".into(),
            ));
        }
        Ok(())
    }

    /// Call the configured provider; fall back to the deterministic hash
    /// embedder on failure.
    async fn provider_embed(&self, inputs: &[String]) -> Vec<Vec<f32>> {
        let provider_result = match self.config.provider.as_str() {
            "ollama" => embed_ollama(&self.client, &self.config, inputs).await,
            "openai" => embed_openai(&self.client, &self.config, inputs).await,
            _ => Err(anyhow::anyhow!("hash provider")),
        };

        match provider_result {
            Ok(vectors) if vectors.len() == inputs.len() => vectors,
            Ok(vectors) => {
                tracing::error!(
                    "Embedding provider returned {} vectors for {} inputs; using hash fallback",
                    vectors.len(),
                    inputs.len()
                );
                inputs
                    .iter()
                    .map(|t| hash_embed(t, self.config.embedding_dim))
                    .collect()
            }
            Err(e) => {
                if self.config.provider != "hash" {
                    tracing::error!("Embedding provider failed, using hash fallback: {e}");
                }
                inputs
                    .iter()
                    .map(|t| hash_embed(t, self.config.embedding_dim))
                    .collect()
            }
        }
    }
}

/// Truncate `text` to at most `max_chars` bytes on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Scale a vector to unit L2 norm. Zero vectors stay zero.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Deterministic FNV-1a bag-of-words embedding: each token maps to one
/// dimension with a sign from the hash's high bit. Not semantic; always
/// available. Unit-norm like the real providers.
pub fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut embedding = vec![0.0f32; dimension];

    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        let mut hash = FNV_OFFSET;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        let index = (hash % dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        embedding[index] += sign;
    }

    l2_normalize(embedding)
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate over-length inputs instead of
    /// returning a 400.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);

    let req = OllamaEmbedRequest {
        model: config.embedding_model.clone(),
        input: texts.to_vec(),
        truncate: true,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama embed API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama embed API returned {status}: {body}");
    }

    let body: OllamaEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama embed response")?;

    Ok(body.embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiEmbedRequest {
        model: config.embedding_model.clone(),
        input: texts.to_vec(),
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI embed API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI embed API returned {status}: {body}");
    }

    let body: OpenAiEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI embed response")?;

    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}
