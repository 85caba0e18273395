//! Vector store adapter: an in-process collection of chunk rows with
//! filtered cosine-similarity search.
//!
//! The schema contract mirrors a remote dense-vector collection: `id` is the
//! primary key (at most 512 chars), `content` is capped at 65 535 chars and
//! truncated on upsert, and the scalar fields support conjunctive equality
//! filtering. `total_chunks` is not persisted and reads back as 0.

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::models::{Chunk, ChunkMetadata, VectorHit};

const MAX_ID_LEN: usize = 512;
const MAX_CONTENT_LEN: usize = 65_535;

#[derive(Debug, Clone)]
struct VectorEntry {
    id: String,
    embedding: Vec<f32>,
    content: String,
    file: String,
    release: String,
    doc_type: String,
    service: Option<String>,
    heading: String,
    line_start: usize,
    line_end: usize,
    chunk_index: usize,
    tokens: usize,
}

/// Conjunctive equality filter over the indexed scalar fields.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub release: Option<String>,
    pub doc_type: Option<String>,
    pub service: Option<String>,
    pub file: Option<String>,
}

impl VectorFilter {
    pub fn is_empty(&self) -> bool {
        self.release.is_none()
            && self.doc_type.is_none()
            && self.service.is_none()
            && self.file.is_none()
    }

    fn matches(&self, entry: &VectorEntry) -> bool {
        if let Some(release) = &self.release {
            if &entry.release != release {
                return false;
            }
        }
        if let Some(doc_type) = &self.doc_type {
            if &entry.doc_type != doc_type {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if entry.service.as_deref() != Some(service.as_str()) {
                return false;
            }
        }
        if let Some(file) = &self.file {
            if &entry.file != file {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct VectorStoreStats {
    pub count: usize,
}

/// In-memory chunk + embedding collection.
pub struct VectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Insert chunk rows, replacing any existing row with the same id.
    /// `embeddings` is parallel with `chunks`; extras on either side are
    /// ignored.
    pub fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> CoreResult<()> {
        for chunk in chunks {
            if chunk.id.len() > MAX_ID_LEN {
                let head: String = chunk.id.chars().take(64).collect();
                return Err(CoreError::Parse(format!(
                    "chunk id exceeds {MAX_ID_LEN} chars: {head}..."
                )));
            }
        }

        let mut entries = self.entries.write();
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            entries.retain(|e| e.id != chunk.id);
            entries.push(VectorEntry {
                id: chunk.id.clone(),
                embedding: embedding.clone(),
                content: truncate_chars(&chunk.content, MAX_CONTENT_LEN),
                file: chunk.metadata.file.clone(),
                release: chunk.metadata.release.clone(),
                doc_type: chunk.metadata.doc_type.clone(),
                service: chunk.metadata.service.clone(),
                heading: chunk.metadata.heading.clone(),
                line_start: chunk.metadata.line_start,
                line_end: chunk.metadata.line_end,
                chunk_index: chunk.metadata.chunk_index,
                tokens: chunk.tokens,
            });
        }
        Ok(())
    }

    /// Cosine-similarity search over rows passing the filter.
    pub fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&VectorFilter>,
    ) -> Vec<VectorHit> {
        // Candidate pool bound, matching the HNSW search contract.
        let ef = (2 * top_k).max(64);

        let entries = self.entries.read();
        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .filter(|e| filter.map(|f| f.matches(e)).unwrap_or(true))
            .map(|e| (cosine_similarity(vector, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(ef.min(scored.len()));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, e)| VectorHit {
                chunk: Chunk {
                    id: e.id.clone(),
                    content: e.content.clone(),
                    metadata: ChunkMetadata {
                        file: e.file.clone(),
                        release: e.release.clone(),
                        doc_type: e.doc_type.clone(),
                        service: e.service.clone(),
                        heading: e.heading.clone(),
                        line_start: e.line_start,
                        line_end: e.line_end,
                        chunk_index: e.chunk_index,
                        total_chunks: 0,
                    },
                    tokens: e.tokens,
                },
                score,
            })
            .collect()
    }

    /// Delete rows matching the filter. At least one predicate is required.
    pub fn delete(&self, filter: &VectorFilter) -> CoreResult<usize> {
        if filter.is_empty() {
            return Err(CoreError::Config(
                "delete requires at least one filter predicate".into(),
            ));
        }
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !filter.matches(e));
        Ok(before - entries.len())
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            count: self.entries.read().len(),
        }
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
