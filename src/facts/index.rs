//! Fact index: facts grouped by normalized (subject, predicate) key, then
//! by canonical object value, with duplicate and conflict detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::docs::index::DocIndexCache;
use crate::error::CoreResult;
use crate::facts::extract;
use crate::models::Fact;

/// An incoming fact restating an existing one: same key, same canonical
/// object.
#[derive(Debug, Clone)]
pub struct DuplicatePair {
    pub existing: Fact,
    pub duplicate: Fact,
}

/// An incoming fact contradicting an existing one: same key, different
/// canonical object.
#[derive(Debug, Clone)]
pub struct ConflictPair {
    pub existing: Fact,
    pub conflicting: Fact,
    pub reason: String,
}

/// `normalize(subject)::normalize(predicate)` → canonical object →
/// occurrences, appended in insertion order.
#[derive(Debug, Default)]
pub struct FactIndex {
    by_key: HashMap<String, HashMap<String, Vec<Fact>>>,
    fact_count: usize,
}

impl FactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fact: Fact) {
        self.by_key
            .entry(fact.normalized_key.clone())
            .or_default()
            .entry(fact.canonical_object.clone())
            .or_default()
            .push(fact);
        self.fact_count += 1;
    }

    pub fn fact_count(&self) -> usize {
        self.fact_count
    }

    /// Existing facts each input restates. Disjoint from `find_conflicts`
    /// for the same input: a duplicate agrees on the canonical object, a
    /// conflict disagrees.
    pub fn find_duplicates(&self, facts: &[Fact]) -> Vec<DuplicatePair> {
        let mut pairs = Vec::new();
        for fact in facts {
            let Some(values) = self.by_key.get(&fact.normalized_key) else {
                continue;
            };
            if let Some(existing) = values.get(&fact.canonical_object) {
                for e in existing {
                    pairs.push(DuplicatePair {
                        existing: e.clone(),
                        duplicate: fact.clone(),
                    });
                }
            }
        }
        pairs
    }

    /// Existing facts each input contradicts.
    pub fn find_conflicts(&self, facts: &[Fact]) -> Vec<ConflictPair> {
        let mut pairs = Vec::new();
        for fact in facts {
            let Some(values) = self.by_key.get(&fact.normalized_key) else {
                continue;
            };
            for (canonical, existing) in values {
                if canonical == &fact.canonical_object {
                    continue;
                }
                for e in existing {
                    pairs.push(ConflictPair {
                        reason: format!(
                            "\"{}\" is already documented as \"{}\" but the incoming change states \"{}\"",
                            e.subject, e.object, fact.object
                        ),
                        existing: e.clone(),
                        conflicting: fact.clone(),
                    });
                }
            }
        }
        pairs
    }
}

/// Per-root cache of built fact indexes. Invalidation-driven; building
/// consults the doc index cache for sections.
pub struct FactIndexCache {
    slots: Mutex<HashMap<PathBuf, Arc<FactIndex>>>,
}

impl FactIndexCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the fact index for `root`, building it from the parsed
    /// sections on first use.
    pub fn get_or_build(
        &self,
        root: &Path,
        docs: &DocIndexCache,
        ttl: Duration,
    ) -> CoreResult<Arc<FactIndex>> {
        {
            let slots = self.slots.lock();
            if let Some(index) = slots.get(root) {
                return Ok(index.clone());
            }
        }

        let doc_index = docs.get(root, ttl, true)?;
        let mut index = FactIndex::new();
        for section in &doc_index.sections {
            // Section content begins on the line after the heading.
            let facts = extract::extract_from_markdown(
                &section.content,
                &section.file,
                Some(&section.heading),
                section.line_start + 1,
            );
            for fact in facts {
                index.insert(fact);
            }
        }

        let index = Arc::new(index);
        self.slots.lock().insert(root.to_path_buf(), index.clone());
        Ok(index)
    }

    pub fn invalidate(&self, root: &Path) {
        self.slots.lock().remove(root);
    }

    pub fn invalidate_all(&self) {
        self.slots.lock().clear();
    }
}

impl Default for FactIndexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::extract::extract_from_markdown;

    fn fact(line: &str, file: &str) -> Fact {
        let facts = extract_from_markdown(line, file, None, 1);
        assert_eq!(facts.len(), 1, "fixture line must parse: {line:?}");
        facts.into_iter().next().unwrap()
    }

    #[test]
    fn test_duplicates_same_canonical_object() {
        let mut index = FactIndex::new();
        index.insert(fact("Database: PostgreSQL", "R1-CONFIG.md"));

        let incoming = vec![fact("database : postgresql", "R2-CONFIG.md")];
        let dups = index.find_duplicates(&incoming);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].existing.file, "R1-CONFIG.md");
        assert_eq!(dups[0].duplicate.file, "R2-CONFIG.md");

        assert!(index.find_conflicts(&incoming).is_empty());
    }

    #[test]
    fn test_conflicts_different_canonical_object() {
        let mut index = FactIndex::new();
        index.insert(fact("Database: PostgreSQL", "R1-CONFIG.md"));

        let incoming = vec![fact("Database: MySQL", "R2-CONFIG.md")];
        let conflicts = index.find_conflicts(&incoming);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing.object, "PostgreSQL");
        assert_eq!(conflicts[0].conflicting.object, "MySQL");
        assert!(conflicts[0].reason.contains("PostgreSQL"));
        assert!(conflicts[0].reason.contains("MySQL"));

        assert!(index.find_duplicates(&incoming).is_empty());
    }

    #[test]
    fn test_duplicates_and_conflicts_disjoint() {
        let mut index = FactIndex::new();
        index.insert(fact("Timeout: 30", "R1-CONFIG.md"));
        index.insert(fact("Timeout: 60", "R1-NOTES.md"));

        let incoming = vec![fact("Timeout: 30", "R2-CONFIG.md")];
        let dups = index.find_duplicates(&incoming);
        let conflicts = index.find_conflicts(&incoming);
        assert_eq!(dups.len(), 1);
        assert_eq!(conflicts.len(), 1);
        // The same existing fact never appears on both sides.
        assert_ne!(dups[0].existing.object, conflicts[0].existing.object);
    }

    #[test]
    fn test_numeric_canonicalization_dedupes() {
        let mut index = FactIndex::new();
        index.insert(fact("Max rows: 1,000", "R1-CONFIG.md"));

        let incoming = vec![fact("Max rows: 1000", "R2-CONFIG.md")];
        assert_eq!(index.find_duplicates(&incoming).len(), 1);
        assert!(index.find_conflicts(&incoming).is_empty());
    }

    #[test]
    fn test_insert_appends_occurrences() {
        let mut index = FactIndex::new();
        index.insert(fact("Region: us-east", "R1-CONFIG.md"));
        index.insert(fact("Region: us-east", "R2-CONFIG.md"));
        assert_eq!(index.fact_count(), 2);

        let incoming = vec![fact("Region: us-east", "R3-CONFIG.md")];
        assert_eq!(index.find_duplicates(&incoming).len(), 2);
    }

    #[test]
    fn test_unknown_key_is_clean() {
        let index = FactIndex::new();
        let incoming = vec![fact("Brand new: value", "f.md")];
        assert!(index.find_duplicates(&incoming).is_empty());
        assert!(index.find_conflicts(&incoming).is_empty());
    }

    #[test]
    fn test_cache_builds_from_corpus_and_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("R1-CONFIG.md"),
            "# Config\nDatabase: PostgreSQL\nPort: 5432\n",
        )
        .unwrap();

        let docs = DocIndexCache::new();
        let cache = FactIndexCache::new();
        let ttl = Duration::from_secs(300);

        let index = cache.get_or_build(dir.path(), &docs, ttl).unwrap();
        assert_eq!(index.fact_count(), 2);

        let again = cache.get_or_build(dir.path(), &docs, ttl).unwrap();
        assert!(Arc::ptr_eq(&index, &again));

        cache.invalidate(dir.path());
        docs.invalidate(dir.path());
        std::fs::write(dir.path().join("R1-CONFIG.md"), "# Config\nOnly: one\n").unwrap();
        let rebuilt = cache.get_or_build(dir.path(), &docs, ttl).unwrap();
        assert_eq!(rebuilt.fact_count(), 1);
    }

    #[test]
    fn test_built_facts_carry_section_line_offsets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("R1-CONFIG.md"),
            "# Config\nintro line\nDatabase: PostgreSQL\n",
        )
        .unwrap();

        let docs = DocIndexCache::new();
        let cache = FactIndexCache::new();
        let index = cache
            .get_or_build(dir.path(), &docs, Duration::from_secs(300))
            .unwrap();

        let incoming = extract_from_markdown("Database: MySQL", "x.md", None, 1);
        let conflicts = index.find_conflicts(&incoming);
        assert_eq!(conflicts.len(), 1);
        // Heading on line 1, intro on 2, fact on 3.
        assert_eq!(conflicts[0].existing.line_start, Some(3));
        assert_eq!(conflicts[0].existing.heading.as_deref(), Some("Config"));
    }
}
