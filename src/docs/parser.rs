use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::models::Section;

/// Directories never descended into, regardless of ignore patterns.
const SKIPPED_DIRS: &[&str] = &["node_modules", "build", "dist"];

/// Parse every selected Markdown file under `root` into sections.
///
/// Files that fail to read (permissions, non-UTF-8 bytes) are skipped with a
/// warning; malformed Markdown never fails. Files whose names lack the
/// `R<digits>-<DOCTYPE>.md` pattern are discovered but yield zero sections.
pub fn parse(root: &Path) -> CoreResult<Vec<Section>> {
    let (files, scan_root) = selected_files(root)?;

    let mut sections = Vec::new();
    for path in &files {
        match parse_file(path, &scan_root) {
            Ok(mut file_sections) => sections.append(&mut file_sections),
            Err(e) => {
                tracing::warn!("Skipping unparsable file {}: {e}", path.display());
            }
        }
    }
    Ok(sections)
}

/// List the `.md` files the walk selects, in walk order.
///
/// This is the same selection the fingerprint hashes over: the legacy
/// `<root>/mnt/project` directory wins when it yields anything, and
/// `.docignore` patterns at `root` exclude matching relative paths.
pub fn list_selected_files(root: &Path) -> CoreResult<Vec<PathBuf>> {
    selected_files(root).map(|(files, _)| files)
}

/// Selected files plus the directory their relative paths are based on:
/// the legacy project directory when it yields anything, else `root`.
fn selected_files(root: &Path) -> CoreResult<(Vec<PathBuf>, PathBuf)> {
    let ignore = load_docignore(root)?;

    let legacy = root.join("mnt").join("project");
    if legacy.is_dir() {
        let files = walk_markdown_files(&legacy, root, ignore.as_ref());
        if !files.is_empty() {
            return Ok((files, legacy));
        }
    }

    Ok((walk_markdown_files(root, root, ignore.as_ref()), root.to_path_buf()))
}

fn walk_markdown_files(scan_root: &Path, root: &Path, ignore: Option<&GlobSet>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(scan_root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable directories don't stop the walk.
                tracing::debug!("Walk error under {}: {e}", scan_root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().map(|e| e != "md").unwrap_or(true) {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        let in_scan_root = path.parent() == Some(scan_root);
        if !in_scan_root && parse_release_doctype(&name).is_none() {
            continue;
        }

        if let Some(ignore) = ignore {
            let rel = path.strip_prefix(root).unwrap_or(path);
            let rel = rel.to_string_lossy().replace('\\', "/");
            if ignore.is_match(&rel) {
                continue;
            }
        }

        files.push(path.to_path_buf());
    }

    files
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Compile `<root>/.docignore` into a glob set, if the file exists.
fn load_docignore(root: &Path) -> CoreResult<Option<GlobSet>> {
    let path = root.join(".docignore");
    if !path.is_file() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let mut builder = GlobSetBuilder::new();
    for line in contents.lines() {
        let pattern = line.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            continue;
        }
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                tracing::warn!("Ignoring bad .docignore pattern {pattern:?}: {e}");
            }
        }
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| CoreError::Parse(format!("invalid .docignore: {e}")))
}

/// Extract `(release, doc_type)` from a `R<digits>-<DOCTYPE>.md` filename.
pub fn parse_release_doctype(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".md")?;
    let rest = stem.strip_prefix('R')?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || rest.as_bytes()[digits_end] != b'-' {
        return None;
    }
    let doc_type = &rest[digits_end + 1..];
    if doc_type.is_empty() {
        return None;
    }
    Some((format!("R{}", &rest[..digits_end]), doc_type.to_string()))
}

/// Match an ATX heading line: 1-6 `#` characters, whitespace, captured text.
fn parse_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    Some(text)
}

/// Parse one file into sections. Fails only when the bytes aren't UTF-8.
fn parse_file(path: &Path, scan_root: &Path) -> CoreResult<Vec<Section>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some((release, doc_type)) = parse_release_doctype(&name) else {
        return Ok(Vec::new());
    };

    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| CoreError::Parse(format!("{}: not valid UTF-8", path.display())))?;

    let rel = path
        .strip_prefix(scan_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    Ok(split_sections(&text, &rel, &release, &doc_type))
}

/// Split text into sections at ATX headings. Lines before the first heading
/// are not part of any section.
fn split_sections(text: &str, file: &str, release: &str, doc_type: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut open: Option<(String, usize, Vec<&str>)> = None; // (heading, line_start, body)

    for (i, line) in lines.iter().enumerate() {
        if let Some(heading) = parse_heading(line) {
            if let Some((h, start, body)) = open.take() {
                sections.push(make_section(file, release, doc_type, h, start, i, body));
            }
            open = Some((heading.to_string(), i + 1, Vec::new()));
        } else if let Some((_, _, body)) = open.as_mut() {
            body.push(line);
        }
    }

    if let Some((h, start, body)) = open {
        sections.push(make_section(file, release, doc_type, h, start, lines.len(), body));
    }

    sections
}

fn make_section(
    file: &str,
    release: &str,
    doc_type: &str,
    heading: String,
    line_start: usize,
    line_end: usize,
    body: Vec<&str>,
) -> Section {
    Section {
        file: file.to_string(),
        release: release.to_string(),
        doc_type: doc_type.to_string(),
        heading,
        content: body.join("\n").trim().to_string(),
        line_start,
        line_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    // ── filename pattern ────────────────────────────────

    #[test]
    fn test_release_doctype_pattern() {
        assert_eq!(
            parse_release_doctype("R1-ARCHITECTURE.md"),
            Some(("R1".into(), "ARCHITECTURE".into()))
        );
        assert_eq!(
            parse_release_doctype("R12-SERVICE_CONTRACTS.md"),
            Some(("R12".into(), "SERVICE_CONTRACTS".into()))
        );
        assert_eq!(parse_release_doctype("README.md"), None);
        assert_eq!(parse_release_doctype("R-NOTES.md"), None);
        assert_eq!(parse_release_doctype("R1-.md"), None);
        assert_eq!(parse_release_doctype("R1-NOTES.txt"), None);
    }

    // ── heading matcher ─────────────────────────────────

    #[test]
    fn test_heading_levels() {
        assert_eq!(parse_heading("# Top"), Some("Top"));
        assert_eq!(parse_heading("###### Deep"), Some("Deep"));
        assert_eq!(parse_heading("####### Too deep"), None);
        assert_eq!(parse_heading("#NoSpace"), None);
        assert_eq!(parse_heading("plain text"), None);
        assert_eq!(parse_heading("#   "), None);
    }

    // ── section splitting ───────────────────────────────

    #[test]
    fn test_sections_partition_lines() {
        let text = "# A\nline 1\nline 2\n## B\nline 4\n";
        let sections = split_sections(text, "R1-NOTES.md", "R1", "NOTES");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "A");
        assert_eq!(sections[0].line_start, 1);
        assert_eq!(sections[0].line_end, 3);
        assert_eq!(sections[0].content, "line 1\nline 2");
        assert_eq!(sections[1].heading, "B");
        assert_eq!(sections[1].line_start, 4);
        assert_eq!(sections[1].line_end, 5);

        // Disjoint, ordered ranges covering all consumed lines.
        assert!(sections[0].line_end < sections[1].line_start);
    }

    #[test]
    fn test_preamble_outside_sections() {
        let text = "intro text\nmore intro\n# First\nbody\n";
        let sections = split_sections(text, "R1-NOTES.md", "R1", "NOTES");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].line_start, 3);
    }

    #[test]
    fn test_no_headings_yields_nothing() {
        let sections = split_sections("just prose\n", "R1-NOTES.md", "R1", "NOTES");
        assert!(sections.is_empty());
    }

    // ── discovery ───────────────────────────────────────

    #[test]
    fn test_parse_selects_pattern_and_root_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "R1-ARCHITECTURE.md", "# Overview\nservices\n");
        write(root, "notes.md", "# Loose\nnot release-tagged\n");
        write(root, "sub/R2-NOTES.md", "# Sub\nnested\n");
        write(root, "sub/other.md", "# Skip\nnot selected in subdirs\n");

        let files = list_selected_files(root).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"R1-ARCHITECTURE.md".to_string()));
        assert!(names.contains(&"notes.md".to_string()));
        assert!(names.contains(&"R2-NOTES.md".to_string()));
        assert!(!names.contains(&"other.md".to_string()));

        // notes.md is selected but has no release pattern: zero sections.
        let sections = parse(root).unwrap();
        assert!(sections.iter().all(|s| s.file != "notes.md"));
        assert!(sections.iter().any(|s| s.file == "R1-ARCHITECTURE.md"));
        assert!(sections.iter().any(|s| s.file == "sub/R2-NOTES.md"));
    }

    #[test]
    fn test_skips_hidden_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "R1-NOTES.md", "# Keep\nx\n");
        write(root, ".hidden/R1-SECRET.md", "# Hidden\nx\n");
        write(root, "node_modules/R1-DEP.md", "# Dep\nx\n");
        write(root, "build/R1-OUT.md", "# Out\nx\n");
        write(root, "dist/R1-DIST.md", "# Dist\nx\n");

        let sections = parse(root).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Keep");
    }

    #[test]
    fn test_docignore_excludes_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, ".docignore", "drafts/**\nR9-*.md\n");
        write(root, "R1-NOTES.md", "# Keep\nx\n");
        write(root, "R9-DRAFT.md", "# Draft\nx\n");
        write(root, "drafts/R2-NOTES.md", "# Also draft\nx\n");

        let sections = parse(root).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].file, "R1-NOTES.md");
    }

    #[test]
    fn test_legacy_project_dir_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "R1-NOTES.md", "# Root\nx\n");
        write(root, "mnt/project/R1-NOTES.md", "# Legacy\ny\n");

        let sections = parse(root).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Legacy");
    }

    #[test]
    fn test_legacy_dir_empty_falls_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("mnt/project")).unwrap();
        write(root, "R1-NOTES.md", "# Root\nx\n");

        let sections = parse(root).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Root");
    }

    #[test]
    fn test_non_utf8_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "R1-NOTES.md", "# Ok\nx\n");
        std::fs::write(root.join("R2-NOTES.md"), [0xff, 0xfe, 0x00]).unwrap();

        let sections = parse(root).unwrap();
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "R1-NOTES.md", "");
        assert!(parse(root).unwrap().is_empty());
    }
}
