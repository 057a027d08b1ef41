//! `ragline stats`: what the index holds and how big it is on disk.

use anyhow::Result;
use chrono::{DateTime, Local};
use ragline_core::index::IndexStats;
use serde::Serialize;

use crate::config::Config;
use crate::engine::open_index;

#[derive(Debug, Serialize)]
struct StatsReport {
    path: String,
    #[serde(flatten)]
    index: IndexStats,
    file_size: Option<u64>,
    saved_at: Option<String>,
}

pub fn run_stats(config: &Config, json: bool) -> Result<()> {
    let index = open_index(config)?;
    let path = &config.index.path;
    let metadata = std::fs::metadata(path).ok();

    let report = StatsReport {
        path: path.display().to_string(),
        index: index.stats(),
        file_size: metadata.as_ref().map(|m| m.len()),
        saved_at: metadata
            .and_then(|m| m.modified().ok())
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let s = &report.index;
    println!("Ragline index");
    println!("  path:       {}", report.path);
    println!("  kind:       {}", s.kind.as_str());
    println!("  metric:     {}", s.metric.as_str());
    println!(
        "  dimension:  {}",
        s.dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  model:      {}", s.model.as_deref().unwrap_or("-"));
    println!("  entries:    {}", s.entries);
    println!("  documents:  {}", s.documents);
    match report.file_size {
        Some(size) => println!("  file size:  {}", format_bytes(size)),
        None => println!("  file size:  (not saved yet)"),
    }
    if let Some(saved) = &report.saved_at {
        println!("  saved:      {}", saved);
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
