//! `ragline remove`: drop one document's entries and save.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::engine::{build_engine, save_index};
use crate::generation::DisabledGenerator;

pub fn run_remove(config: &Config, document_id: &str) -> Result<()> {
    let engine = build_engine(config, Arc::new(DisabledGenerator))?;
    let removed = engine.remove_document(document_id);
    if removed == 0 {
        bail!("No document with id '{}' in the index", document_id);
    }

    save_index(config, &engine)?;
    println!("removed {} chunks of document {}", removed, document_id);
    Ok(())
}
