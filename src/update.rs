//! Doc update agent: infer a target file from an intent, build an
//! append-style diff, preflight it against the fact index, and apply it
//! atomically with cache invalidation and lifecycle events.
//!
//! The apply strategy is a deliberate append, not a structural merge;
//! applying the same suggestion twice yields the diff twice.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::events::DocEvent;
use crate::facts::extract;
use crate::facts::index::{ConflictPair, DuplicatePair};
use crate::models::{
    ApplyRequest, ApplyResult, Citation, ConflictRecord, DuplicateRecord, SearchFilters,
    UpdateAction, UpdateIntent, UpdateSuggestion,
};
use crate::search::lexical;
use crate::state::AppState;

/// Keyword → document-type suffix, checked in order; `NOTES` is the
/// catch-all.
const TARGET_KEYWORDS: &[(&str, &str)] = &[
    ("architecture", "ARCHITECTURE"),
    ("service", "SERVICE_CONTRACTS"),
    ("config", "CONFIGURATION"),
    ("migration", "MIGRATION_NOTES"),
];

const DEFAULT_RELEASE: &str = "R1";

/// Propose an edit for the intent, with fact-level preflight results.
/// Blocking I/O; call through `spawn_blocking` from handlers.
pub fn suggest_update(state: &AppState, intent: &UpdateIntent) -> CoreResult<UpdateSuggestion> {
    let root = state.config.docs_root.clone();
    let file_name = target_file_name(intent);
    let target_path = root.join(&file_name);

    let action = if target_path.exists() {
        UpdateAction::Update
    } else {
        UpdateAction::Create
    };

    let timestamp = chrono::Utc::now().to_rfc3339();
    let context = intent.context.as_deref().unwrap_or("");
    let diff = match action {
        UpdateAction::Update => format!(
            "\n\n## Update: {}\n\n**Added:** {}\n\n{}\n",
            intent.intent, timestamp, context
        ),
        UpdateAction::Create => format!(
            "# {}\n\n**Created:** {}\n\n{}\n",
            intent.intent, timestamp, context
        ),
    };

    let rationale = match action {
        UpdateAction::Update => format!("Append an update section to {file_name}"),
        UpdateAction::Create => format!("Create {file_name} with the provided content"),
    };

    let citations = related_citations(state, &root, &intent.intent);

    let (duplicates, conflicts) = preflight(state, &root, &diff, &file_name);
    let blocked = !conflicts.is_empty();

    Ok(UpdateSuggestion {
        action,
        target_path: target_path.to_string_lossy().to_string(),
        diff,
        rationale,
        citations,
        duplicates,
        conflicts,
        blocked,
    })
}

/// Apply a suggested diff. Conflicts block the write unless `force` is set;
/// the write is atomic (temp file + rename) and followed by cache
/// invalidation and events. Blocking I/O; call through `spawn_blocking`.
pub fn apply_update(state: &AppState, req: &ApplyRequest) -> ApplyResult {
    let root = state.config.docs_root.clone();
    let path = resolve_target(&root, &req.target_path);
    let path_str = path.to_string_lossy().to_string();

    // Re-check conflicts against the current corpus, not the suggestion's
    // snapshot.
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| req.target_path.clone());
    let (_, conflicts) = preflight(state, &root, &req.diff, &file_name);
    if !conflicts.is_empty() && !req.force {
        let err = CoreError::Conflict {
            count: conflicts.len(),
        };
        return ApplyResult {
            status: "error".into(),
            path: path_str,
            reindexed: false,
            error: Some(err.to_string()),
        };
    }

    let action = req.action.clone().unwrap_or(if path.exists() {
        UpdateAction::Update
    } else {
        UpdateAction::Create
    });

    let write_result = match action {
        UpdateAction::Create => write_atomic(&path, &req.diff, true),
        UpdateAction::Update => std::fs::read_to_string(&path)
            .map_err(CoreError::from)
            .and_then(|existing| {
                write_atomic(&path, &format!("{existing}\n{}", req.diff), false)
            }),
    };

    if let Err(e) = write_result {
        return ApplyResult {
            status: "error".into(),
            path: path_str,
            reindexed: false,
            error: Some(e.to_string()),
        };
    }

    match action {
        UpdateAction::Create => state.events.emit(DocEvent::DocCreated { path: path.clone() }),
        UpdateAction::Update => state.events.emit(DocEvent::DocUpdated { path: path.clone() }),
    }
    state.invalidate_root(&root);
    state.events.emit(DocEvent::ReindexTriggered { root });

    ApplyResult {
        status: "success".into(),
        path: path_str,
        reindexed: true,
        error: None,
    }
}

/// Target filename: the explicit `target_file`, or inferred from keywords
/// in the intent with the release prefix.
fn target_file_name(intent: &UpdateIntent) -> String {
    if let Some(file) = &intent.target_file {
        return file.clone();
    }

    let lowered = intent.intent.to_lowercase();
    let suffix = TARGET_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, suffix)| *suffix)
        .unwrap_or("NOTES");

    let release = intent.target_release.as_deref().unwrap_or(DEFAULT_RELEASE);
    format!("{release}-{suffix}.md")
}

fn resolve_target(root: &Path, target_path: &str) -> PathBuf {
    let path = Path::new(target_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Extract facts from the diff and check them against the fact index.
/// A broken fact index logs and passes through; it never blocks writes.
fn preflight(
    state: &AppState,
    root: &Path,
    diff: &str,
    file_name: &str,
) -> (Vec<DuplicateRecord>, Vec<ConflictRecord>) {
    let facts = extract::extract_from_diff(diff, file_name);
    if facts.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let index = match state
        .facts
        .get_or_build(root, &state.docs, state.config.cache_ttl())
    {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!("Fact preflight unavailable for {}: {e}", root.display());
            return (Vec::new(), Vec::new());
        }
    };

    let duplicates = index
        .find_duplicates(&facts)
        .into_iter()
        .map(to_duplicate_record)
        .collect();
    let conflicts = index
        .find_conflicts(&facts)
        .into_iter()
        .map(to_conflict_record)
        .collect();
    (duplicates, conflicts)
}

fn to_duplicate_record(pair: DuplicatePair) -> DuplicateRecord {
    DuplicateRecord {
        subject: pair.duplicate.subject,
        object: pair.duplicate.object,
        existing_file: pair.existing.file,
    }
}

fn to_conflict_record(pair: ConflictPair) -> ConflictRecord {
    ConflictRecord {
        subject: pair.conflicting.subject,
        existing: pair.existing.object,
        incoming: pair.conflicting.object,
        existing_file: pair.existing.file,
        reason: pair.reason,
    }
}

/// Sections related to the intent, cited so reviewers can check the
/// suggestion against what the corpus already says.
fn related_citations(state: &AppState, root: &Path, intent_text: &str) -> Vec<Citation> {
    let index = match state.doc_index(root) {
        Ok(index) => index,
        Err(_) => return Vec::new(),
    };
    lexical::score_sections(&index.sections, intent_text, &SearchFilters::default(), 3)
        .into_iter()
        .map(|hit| Citation {
            file: hit.file,
            heading: hit.heading,
            line_start: hit.line_start,
            line_end: hit.line_end,
            snippet: hit.snippet,
            relevance: hit.score,
        })
        .collect()
}

/// Write via a sibling temp file and rename, so readers see either the old
/// or the new contents, never a partial write.
fn write_atomic(path: &Path, contents: &str, create_parents: bool) -> CoreResult<()> {
    if create_parents {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state_with_root(root: &Path) -> AppState {
        let mut config = Config::default();
        config.docs_root = root.to_path_buf();
        config.llm.provider = "hash".into();
        AppState::new(config).unwrap()
    }

    fn intent(text: &str) -> UpdateIntent {
        UpdateIntent {
            intent: text.into(),
            context: Some("Some context".into()),
            target_file: None,
            target_release: None,
        }
    }

    // ── target inference ────────────────────────────────

    #[test]
    fn test_target_inference_keywords() {
        let cases = [
            ("Document the new architecture layer", "R1-ARCHITECTURE.md"),
            ("update the billing service contract", "R1-SERVICE_CONTRACTS.md"),
            ("change the config default", "R1-CONFIGURATION.md"),
            ("describe the migration path", "R1-MIGRATION_NOTES.md"),
            ("general remarks", "R1-NOTES.md"),
        ];
        for (text, expected) in cases {
            assert_eq!(target_file_name(&intent(text)), expected, "intent: {text}");
        }
    }

    #[test]
    fn test_target_release_and_explicit_file() {
        let mut i = intent("config change");
        i.target_release = Some("R3".into());
        assert_eq!(target_file_name(&i), "R3-CONFIGURATION.md");

        i.target_file = Some("R9-CUSTOM.md".into());
        assert_eq!(target_file_name(&i), "R9-CUSTOM.md");
    }

    // ── suggest ─────────────────────────────────────────

    #[test]
    fn test_suggest_create_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_root(dir.path());

        let suggestion = suggest_update(&state, &intent("general remarks")).unwrap();
        assert_eq!(suggestion.action, UpdateAction::Create);
        assert!(suggestion.diff.starts_with("# general remarks\n\n**Created:**"));
        assert!(suggestion.diff.contains("Some context"));
        assert!(!suggestion.blocked);
    }

    #[test]
    fn test_suggest_update_for_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R1-NOTES.md"), "# Existing\nbody\n").unwrap();
        let state = state_with_root(dir.path());

        let suggestion = suggest_update(&state, &intent("general remarks")).unwrap();
        assert_eq!(suggestion.action, UpdateAction::Update);
        assert!(suggestion
            .diff
            .starts_with("\n\n## Update: general remarks\n\n**Added:**"));
    }

    #[test]
    fn test_suggest_flags_conflicts_and_blocks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("R1-CONFIG.md"),
            "# Config\nDatabase: PostgreSQL\n",
        )
        .unwrap();
        let state = state_with_root(dir.path());

        let mut i = intent("config change");
        i.context = Some("Database: MySQL".into());
        i.target_release = Some("R2".into());
        let suggestion = suggest_update(&state, &i).unwrap();

        assert!(suggestion.blocked);
        assert_eq!(suggestion.conflicts.len(), 1);
        let conflict = &suggestion.conflicts[0];
        assert_eq!(conflict.existing, "PostgreSQL");
        assert_eq!(conflict.incoming, "MySQL");
        assert_eq!(conflict.existing_file, "R1-CONFIG.md");
    }

    #[test]
    fn test_suggest_flags_duplicates_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("R1-CONFIG.md"),
            "# Config\nDatabase: PostgreSQL\n",
        )
        .unwrap();
        let state = state_with_root(dir.path());

        let mut i = intent("config change");
        i.context = Some("Database: PostgreSQL".into());
        let suggestion = suggest_update(&state, &i).unwrap();

        assert!(!suggestion.blocked);
        assert_eq!(suggestion.duplicates.len(), 1);
        assert_eq!(suggestion.duplicates[0].existing_file, "R1-CONFIG.md");
    }

    // ── apply ───────────────────────────────────────────

    fn apply_req(path: &str, diff: &str, force: bool) -> ApplyRequest {
        ApplyRequest {
            target_path: path.into(),
            diff: diff.into(),
            action: None,
            force,
        }
    }

    #[test]
    fn test_apply_create_writes_file_and_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_root(dir.path());
        let mut events = state.events.subscribe();

        let result = apply_update(&state, &apply_req("R1-NOTES.md", "# New\n\nbody\n", false));
        assert_eq!(result.status, "success");
        assert!(result.reindexed);

        let written = std::fs::read_to_string(dir.path().join("R1-NOTES.md")).unwrap();
        assert_eq!(written, "# New\n\nbody\n");

        // doc_created precedes reindex_triggered.
        assert_eq!(events.try_recv().unwrap().kind(), "doc_created");
        assert_eq!(events.try_recv().unwrap().kind(), "reindex_triggered");
    }

    #[test]
    fn test_apply_update_appends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R1-NOTES.md"), "# Original\nbody").unwrap();
        let state = state_with_root(dir.path());

        let result = apply_update(&state, &apply_req("R1-NOTES.md", "## Appended\n", false));
        assert_eq!(result.status, "success");

        let written = std::fs::read_to_string(dir.path().join("R1-NOTES.md")).unwrap();
        assert_eq!(written, "# Original\nbody\n## Appended\n");
    }

    #[test]
    fn test_apply_twice_appends_twice() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_root(dir.path());

        let create = apply_req("R1-NOTES.md", "# T\n\nMarker: unique\n", true);
        assert_eq!(apply_update(&state, &create).status, "success");

        let mut again = create.clone();
        again.action = None; // Re-derived: the file now exists.
        assert_eq!(apply_update(&state, &again).status, "success");

        let written = std::fs::read_to_string(dir.path().join("R1-NOTES.md")).unwrap();
        assert_eq!(written.matches("Marker: unique").count(), 2);
    }

    #[test]
    fn test_apply_conflict_blocks_without_force() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("R1-CONFIG.md"),
            "# Config\nDatabase: PostgreSQL\n",
        )
        .unwrap();
        let state = state_with_root(dir.path());

        let req = apply_req("R2-CONFIG.md", "# Config\n\nDatabase: MySQL\n", false);
        let result = apply_update(&state, &req);
        assert_eq!(result.status, "error");
        assert!(!result.reindexed);
        assert_eq!(
            result.error.as_deref(),
            Some("Conflicting facts detected (1). Use force=true to override.")
        );
        assert!(!dir.path().join("R2-CONFIG.md").exists());

        // Forced apply succeeds and both files exist.
        let forced = apply_req("R2-CONFIG.md", "# Config\n\nDatabase: MySQL\n", true);
        let result = apply_update(&state, &forced);
        assert_eq!(result.status, "success");
        assert!(dir.path().join("R1-CONFIG.md").exists());
        assert!(dir.path().join("R2-CONFIG.md").exists());
    }

    #[test]
    fn test_apply_missing_update_target_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_root(dir.path());

        let mut req = apply_req("R1-NOTES.md", "## Appended\n", false);
        req.action = Some(UpdateAction::Update);
        let result = apply_update(&state, &req);
        assert_eq!(result.status, "error");
        assert!(result.error.is_some());
    }

    #[test]
    fn test_apply_create_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_root(dir.path());

        let result = apply_update(&state, &apply_req("sub/dir/R1-NOTES.md", "# N\n", false));
        assert_eq!(result.status, "success");
        assert!(dir.path().join("sub/dir/R1-NOTES.md").exists());
    }
}
