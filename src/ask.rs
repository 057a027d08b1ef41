//! `ragline ask`: retrieve, assemble context, generate a cited answer.
//!
//! Text output streams the answer as it is produced; `--json` waits for
//! the full [`GeneratedAnswer`]. Ctrl-C drops the in-flight query. Queries
//! never write to the index, so cancelling leaves it untouched.

use std::io::Write;

use anyhow::{bail, Result};
use futures::StreamExt;
use ragline_core::context::Citation;
use ragline_core::orchestrator::GeneratedAnswer;

use crate::config::Config;
use crate::engine::build_engine;
use crate::generation::create_generator;

pub async fn run_ask(config: &Config, query: &str, json: bool) -> Result<()> {
    let generator = create_generator(&config.generation)?;
    let engine = build_engine(config, generator)?;

    let work = async {
        if json {
            let answer = engine.answer(query).await?;
            print_json(&answer)
        } else {
            stream_answer(&engine, query).await
        }
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            bail!("Query cancelled")
        }
    }
}

fn print_json(answer: &GeneratedAnswer) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(answer)?);
    Ok(())
}

async fn stream_answer(engine: &ragline_core::RagEngine, query: &str) -> Result<()> {
    let (prepared, mut stream) = engine.orchestrator().answer_stream(query).await?;

    if !prepared.grounded() {
        println!("(no supporting documents found; this answer is not grounded)");
        println!();
    }

    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        print!("{}", fragment);
        stdout.flush()?;
    }
    println!();

    print_sources(&prepared.citations());
    Ok(())
}

fn print_sources(citations: &[Citation]) {
    if citations.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for c in citations {
        let truncated = if c.truncated { " (truncated)" } else { "" };
        println!(
            "  [{}] {} {}..{} score {:.3}{}",
            c.marker, c.source, c.start, c.end, c.score, truncated
        );
    }
}
