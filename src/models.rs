use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One Markdown section: a heading and the body up to the next heading.
///
/// Sections are immutable once parsed. For a given file their line ranges
/// are disjoint and in source order; the heading line is `line_start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    /// Path relative to the corpus root, forward slashes
    pub file: String,
    /// Release token from the filename, e.g. "R2"
    pub release: String,
    /// Uppercase document type from the filename, e.g. "ARCHITECTURE"
    pub doc_type: String,
    pub heading: String,
    /// Trimmed body text, heading excluded
    pub content: String,
    /// 1-based line of the heading
    pub line_start: usize,
    /// 1-based last line of the section body
    pub line_end: usize,
}

/// A parsed corpus snapshot with its identity fingerprint.
#[derive(Debug)]
pub struct DocIndex {
    pub sections: Vec<Section>,
    /// SHA-256 hex over sorted (path, mtime) pairs plus the root path.
    /// Changes whenever any selected file is added, removed, or modified.
    pub fingerprint: String,
    /// Monotonic build instant; strictly increases across invalidations.
    pub built_at: Instant,
    pub file_count: usize,
}

/// A token-bounded fragment of a section, ready for embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `<file>:<lineStart>-<lineEnd>:<chunkIndex>` — unique within a root
    pub id: String,
    /// Begins with the section heading followed by a blank line
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Token estimate: ceil(chars / 4)
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub file: String,
    pub release: String,
    pub doc_type: String,
    /// Owning service, when the corpus annotates one
    #[serde(default)]
    pub service: Option<String>,
    pub heading: String,
    pub line_start: usize,
    pub line_end: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// A lexically scored section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionHit {
    pub file: String,
    pub release: String,
    pub doc_type: String,
    pub heading: String,
    pub line_start: usize,
    pub line_end: usize,
    pub score: f32,
    pub match_reasons: Vec<String>,
    /// First 300 characters of the section content
    pub snippet: String,
}

/// A vector-store search result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Cosine similarity against the query vector
    pub score: f32,
}

/// A vector hit after the rerank stage.
#[derive(Debug, Clone)]
pub struct RerankedHit {
    pub hit: VectorHit,
    pub rerank_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub file: String,
    pub heading: String,
    pub line_start: usize,
    pub line_end: usize,
    /// At most 300 characters
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Heuristic in [0, 1]: how much of the cited evidence the answer
    /// textually acknowledges
    pub grounding_score: f32,
    pub insufficient_evidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_topics: Option<Vec<String>>,
}

/// An extracted subject-predicate-object triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    /// `normalize(subject) + "::" + normalize(predicate)`
    pub normalized_key: String,
    pub canonical_object: String,
    /// Stable digest over the normalized triple
    pub hash: String,
}

/// An existing fact that an incoming fact restates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub subject: String,
    pub object: String,
    pub existing_file: String,
}

/// An existing fact that an incoming fact contradicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub subject: String,
    pub existing: String,
    pub incoming: String,
    pub existing_file: String,
    pub reason: String,
}

// ─── Request / response payloads ─────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub release: Option<String>,
    pub service: Option<String>,
    pub doc_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SectionHit>,
    pub total: usize,
    /// `DOCS_NOT_FOUND` when nothing matched; never an HTTP error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    pub max_tokens: Option<u32>,
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateIntent {
    pub intent: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub target_release: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Update,
    Create,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSuggestion {
    pub action: UpdateAction,
    pub target_path: String,
    pub diff: String,
    pub rationale: String,
    pub citations: Vec<Citation>,
    pub duplicates: Vec<DuplicateRecord>,
    pub conflicts: Vec<ConflictRecord>,
    /// True whenever `conflicts` is non-empty
    pub blocked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    pub target_path: String,
    pub diff: String,
    /// Derived from file existence when absent
    #[serde(default)]
    pub action: Option<UpdateAction>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    /// "success" or "error"
    pub status: String,
    pub path: String,
    pub reindexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompareRequest {
    pub feature: String,
    #[serde(default)]
    pub releases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub release: String,
    pub sections: Vec<SectionHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResponse {
    pub feature: String,
    pub releases: Vec<ReleaseSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependenciesRequest {
    pub service: String,
    pub release: String,
    #[serde(default)]
    pub include_data_flow: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependenciesResponse {
    pub service: String,
    pub release: String,
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_flow: Option<Vec<String>>,
}

/// Shared, immutable list of hits as stored in the query cache.
pub type SharedHits = Arc<Vec<SectionHit>>;

impl Section {
    /// First 300 characters of the content, on a char boundary.
    pub fn snippet(&self) -> String {
        snippet_of(&self.content, 300)
    }
}

/// Truncate to `max_chars` characters without splitting a code point.
pub fn snippet_of(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
