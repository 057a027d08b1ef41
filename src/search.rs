//! `ragline search`: retrieval only, no generation.

use std::sync::Arc;

use anyhow::Result;
use ragline_core::models::RetrievalResult;

use crate::config::Config;
use crate::engine::build_engine;
use crate::generation::DisabledGenerator;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let engine = build_engine(config, Arc::new(DisabledGenerator))?;
    let results = engine.retrieve(query, k, threshold).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        print_result(result);
    }
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    println!(
        "{}. [{:.3}] {} #{}",
        result.rank, result.score, result.source, result.chunk_index
    );
    println!("    span: {}..{}", result.start, result.end);
    println!("    excerpt: \"{}\"", excerpt(&result.text));
    println!("    id: {}", result.chunk_id);
    println!("    document: {}", result.document_id);
    println!();
}

/// One-line preview of a chunk.
pub fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_whitespace() {
        assert_eq!(excerpt("a\n\n  b\tc"), "a b c");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(500);
        let out = excerpt(&text);
        assert_eq!(out.chars().count(), EXCERPT_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
