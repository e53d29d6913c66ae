//! Corpus loading: walks the configured directory and normalizes every
//! matching file into a [`Document`].
//!
//! Files are selected by `include_globs` minus `exclude_globs` (plus the
//! built-in `.git`, `target`, and `node_modules` excludes), relative to the
//! corpus root. A file that cannot be read or extracted, exceeds
//! `max_file_bytes`, or yields no text is skipped with a warning rather than
//! failing the whole load. Documents are returned sorted by relative path
//! so index construction is deterministic.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::extract::{content_type_for_path, extract_text, is_text_type};
use crate::index::IndexError;
use crate::models::Document;

/// Loads every eligible file under `config.root`.
///
/// # Errors
///
/// - [`IndexError::SourceMissing`] if the root does not exist or is not a directory.
/// - [`IndexError::EmptyCorpus`] if no file produced any text.
/// - [`IndexError::Glob`] for an invalid include/exclude pattern.
pub fn load_documents(config: &CorpusConfig) -> Result<Vec<Document>, IndexError> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(IndexError::SourceMissing { path: root.clone() });
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match load_file(path, relative, config.max_file_bytes) {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => {}
            Err(reason) => tracing::warn!(path = %rel_str, "skipping file: {reason}"),
        }
    }

    if documents.is_empty() {
        return Err(IndexError::EmptyCorpus { path: root.clone() });
    }

    documents.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    tracing::info!(documents = documents.len(), root = %root.display(), "corpus loaded");
    Ok(documents)
}

/// Reads one file. `Ok(None)` means the file was intentionally skipped.
fn load_file(path: &Path, relative: &Path, max_bytes: u64) -> Result<Option<Document>, String> {
    let Some(content_type) = content_type_for_path(path) else {
        tracing::debug!(path = %relative.display(), "no extractor for extension");
        return Ok(None);
    };

    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if metadata.len() > max_bytes {
        return Err(format!(
            "{} bytes exceeds max_file_bytes ({})",
            metadata.len(),
            max_bytes
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let body = if is_text_type(content_type) {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        extract_text(&bytes, content_type).map_err(|e| e.to_string())?
    };

    if body.trim().is_empty() {
        tracing::debug!(path = %relative.display(), "no text content");
        return Ok(None);
    }

    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Some(Document {
        id: document_id(relative),
        source_path: relative.to_path_buf(),
        title,
        content_type: content_type.to_string(),
        modified_at,
        body,
    }))
}

/// Stable id: the first 16 hex chars of SHA-256 over the relative path.
fn document_id(relative: &Path) -> String {
    let digest = Sha256::digest(relative.to_string_lossy().replace('\\', "/").as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            ..CorpusConfig::default()
        }
    }

    #[test]
    fn loads_text_files_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.md"), "Gross Margin: 32.1%").unwrap();
        fs::write(tmp.path().join("a.txt"), "Revenue: $20.1B").unwrap();
        fs::write(tmp.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let docs = load_documents(&corpus(tmp.path())).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source_path, Path::new("a.txt"));
        assert_eq!(docs[0].body, "Revenue: $20.1B");
        assert_eq!(docs[1].content_type, "text/markdown");
    }

    #[test]
    fn missing_root_is_source_missing() {
        let tmp = TempDir::new().unwrap();
        let err = load_documents(&corpus(&tmp.path().join("nope"))).unwrap_err();
        assert!(matches!(err, IndexError::SourceMissing { .. }));
    }

    #[test]
    fn empty_directory_is_empty_corpus() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blank.txt"), "   \n").unwrap();
        let err = load_documents(&corpus(tmp.path())).unwrap_err();
        assert!(matches!(err, IndexError::EmptyCorpus { .. }));
    }

    #[test]
    fn corrupt_binary_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.pdf"), b"not really a pdf").unwrap();
        fs::write(tmp.path().join("ok.txt"), "Deliveries rose 40%").unwrap();
        let docs = load_documents(&corpus(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "ok.txt");
    }

    #[test]
    fn respects_exclude_globs_and_size_limit() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("drafts/wip.md"), "draft").unwrap();
        fs::write(tmp.path().join("big.txt"), "x".repeat(64)).unwrap();
        fs::write(tmp.path().join("keep.txt"), "kept").unwrap();

        let config = CorpusConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            max_file_bytes: 32,
            ..corpus(tmp.path())
        };
        let docs = load_documents(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].body, "kept");
    }

    #[test]
    fn document_ids_are_stable() {
        assert_eq!(
            document_id(Path::new("reports/q3.md")),
            document_id(Path::new("reports/q3.md"))
        );
        assert_ne!(
            document_id(Path::new("reports/q3.md")),
            document_id(Path::new("reports/q4.md"))
        );
    }
}
