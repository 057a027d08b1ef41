//! `ragline ingest`: load → chunk → embed → insert → save.
//!
//! Unreadable files and documents that fail to ingest are skipped and
//! listed in the summary; everything else is committed and saved. The
//! command fails only when nothing could be loaded at all.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use ragline_core::engine::IngestSummary;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{build_engine, save_index};
use crate::generation::DisabledGenerator;
use crate::loader::{load_documents, LoadFailure};

pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        bail!("No paths given");
    }

    let loaded = load_documents(paths, &config.ingest)?;
    if loaded.documents.is_empty() && !loaded.failures.is_empty() {
        print_failures(&loaded.failures, &[]);
        bail!("No documents could be loaded");
    }

    let engine = build_engine(config, Arc::new(DisabledGenerator))?;
    let found = loaded.documents.len();
    let summary = engine.ingest_all(loaded.documents).await;

    save_index(config, &engine)?;
    let stats = engine.stats();
    info!(path = %config.index.path.display(), entries = stats.index.entries, "Saved index");
    debug!(
        hits = stats.cache.hits,
        misses = stats.cache.misses,
        evictions = stats.cache.evictions,
        "Embedding cache"
    );

    print_summary(found, &summary);
    print_failures(&loaded.failures, &summary.failures);
    println!("ok");
    Ok(())
}

fn print_summary(found: usize, summary: &IngestSummary) {
    println!("ingest");
    println!("  documents found: {}", found);
    println!("  documents ingested: {}", summary.documents_ingested);
    println!("  documents unchanged: {}", summary.documents_unchanged);
    println!("  chunks inserted: {}", summary.chunks_inserted);
    println!("  chunks unchanged: {}", summary.chunks_unchanged);
    println!("  chunks removed: {}", summary.chunks_removed);
}

fn print_failures(load: &[LoadFailure], ingest: &[ragline_core::engine::IngestFailure]) {
    let total = load.len() + ingest.len();
    if total == 0 {
        return;
    }
    println!("  failed: {}", total);
    for f in load {
        println!("    {}: {}", f.source, f.error);
    }
    for f in ingest {
        println!("    {}: {}", f.source, f.error);
    }
}
