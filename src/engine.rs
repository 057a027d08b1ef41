//! Wiring: open the persisted index and assemble a [`RagEngine`] from
//! configuration.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ragline_core::embedding::Embedder;
use ragline_core::generation::Generator;
use ragline_core::index::VectorIndex;
use ragline_core::RagEngine;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::create_embedder;

/// Load the index file, or start an empty index when it does not exist yet.
pub fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let path = &config.index.path;
    if !path.exists() {
        info!(path = %path.display(), "No index file yet, starting empty");
        return Ok(Arc::new(VectorIndex::new(config.index.options())));
    }

    let index = VectorIndex::load(path, config.index.hnsw_params()).with_context(|| {
        format!(
            "Failed to load index {} (delete it and re-run ingest to rebuild)",
            path.display()
        )
    })?;

    if index.kind() != config.index.kind || index.metric() != config.index.metric {
        warn!(
            file_kind = index.kind().as_str(),
            file_metric = index.metric().as_str(),
            config_kind = config.index.kind.as_str(),
            config_metric = config.index.metric.as_str(),
            "Index file settings differ from config; using the file's settings"
        );
    }
    Ok(Arc::new(index))
}

/// Refuse to mix vectors from different embedding models.
fn check_model(index: &VectorIndex, embedder: &dyn Embedder) -> Result<()> {
    if let Some(model) = index.model() {
        if model != embedder.model_name() {
            bail!(
                "Index was built with embedding model '{}' but config uses '{}'; \
                 delete the index file and re-ingest to switch models",
                model,
                embedder.model_name()
            );
        }
    }
    if let Some(dims) = index.dimension() {
        if dims != embedder.dims() {
            bail!(
                "Index has dimension {} but embedding.dims is {}",
                dims,
                embedder.dims()
            );
        }
    }
    Ok(())
}

/// Build an engine over the configured index, embedder and `generator`.
pub fn build_engine(config: &Config, generator: Arc<dyn Generator>) -> Result<RagEngine> {
    let index = open_index(config)?;
    let embedder = create_embedder(&config.embedding)?;
    check_model(&index, embedder.as_ref())?;

    let engine = RagEngine::new(&config.engine_config(), index, embedder, generator)?;
    Ok(engine)
}

/// Persist the engine's index to the configured path, creating parent
/// directories as needed.
pub fn save_index(config: &Config, engine: &RagEngine) -> Result<()> {
    let path = &config.index.path;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    engine
        .save(path)
        .with_context(|| format!("Failed to save index {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DisabledGenerator;
    use ragline_core::models::Document;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let toml_str = format!(
            "[index]\npath = \"{}\"\n[chunking]\nmax_chars = 200\noverlap_chars = 20\n",
            dir.path().join("data/index.rgl").display()
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_save_reopen() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);

        let engine = build_engine(&config, Arc::new(DisabledGenerator)).unwrap();
        assert!(engine.index().is_empty());
        engine
            .ingest(&Document::new("a.md", "Rust ownership and borrowing."))
            .await
            .unwrap();
        save_index(&config, &engine).unwrap();
        assert!(config.index.path.exists());

        let reopened = build_engine(&config, Arc::new(DisabledGenerator)).unwrap();
        assert_eq!(reopened.index().len(), engine.index().len());
        let hits = reopened.retrieve("ownership", Some(1), None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_model_change_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);

        let engine = build_engine(&config, Arc::new(DisabledGenerator)).unwrap();
        engine
            .ingest(&Document::new("a.md", "some text"))
            .await
            .unwrap();
        save_index(&config, &engine).unwrap();

        config.embedding.model = Some("other-hash".to_string());
        let err = build_engine(&config, Arc::new(DisabledGenerator))
            .err()
            .unwrap();
        assert!(err.to_string().contains("other-hash"));
    }

    #[test]
    fn test_corrupt_index_reported() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        std::fs::create_dir_all(config.index.path.parent().unwrap()).unwrap();
        std::fs::write(&config.index.path, b"garbage").unwrap();
        let err = open_index(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("rebuild"));
    }
}
