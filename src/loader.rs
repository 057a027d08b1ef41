//! Document loading from the filesystem.
//!
//! Each path given to `ragline ingest` is either a file (loaded directly
//! when its format is supported) or a directory, walked recursively and
//! filtered through the `[ingest]` include/exclude globs. Globs match paths
//! relative to the directory being walked. `.git`, `target` and
//! `node_modules` are always excluded.
//!
//! Formats: `.txt`/`.md`/`.markdown` as UTF-8, `.pdf` via `pdf-extract`.
//! A file that cannot be read or parsed is reported as a [`LoadFailure`]
//! and does not stop the others.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ragline_core::models::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// A file that could not be turned into a [`Document`].
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
}

fn format_of(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "md" | "markdown" => Some(Format::Text),
        "pdf" => Some(Format::Pdf),
        _ => None,
    }
}

/// Load every supported document under `paths`.
///
/// # Errors
///
/// Fails only for problems with the request itself: a path that does not
/// exist or an invalid glob. Per-file problems end up in
/// [`LoadReport::failures`].
pub fn load_documents(paths: &[PathBuf], config: &IngestConfig) -> Result<LoadReport> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        scan_dir(path, config.follow_symlinks, &include_set, &exclude_set, &mut files)?;
    }

    // Dedup on the canonical source so `./a.md` and `/abs/a.md` load once.
    let mut files: Vec<(String, PathBuf)> = files
        .into_iter()
        .map(|file| (source_name(&file), file))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files.dedup_by(|a, b| a.0 == b.0);

    let mut report = LoadReport::default();
    for (source, file) in files {
        match read_document(&file, &source) {
            Ok(doc) => {
                debug!(source = %doc.source, chars = doc.text.len(), "Loaded document");
                report.documents.push(doc);
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Skipping unreadable file");
                report.failures.push(LoadFailure {
                    source,
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok(report)
}

fn scan_dir(
    root: &Path,
    follow_symlinks: bool,
    include_set: &GlobSet,
    exclude_set: &GlobSet,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let walker = WalkDir::new(root).follow_links(follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(())
}

/// Stable source identifier: the canonical path when available.
fn source_name(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn read_document(path: &Path, source: &str) -> Result<Document> {
    let format = format_of(path)
        .ok_or_else(|| anyhow::anyhow!("unsupported file type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let text = match format {
        Format::Text => String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("file is not valid UTF-8: {}", path.display()))?,
        Format::Pdf => pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))?,
    };

    Ok(Document::new(source, text))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
