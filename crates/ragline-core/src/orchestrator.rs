//! Query → answer orchestration.
//!
//! [`RagOrchestrator::answer`] runs retrieval, assembles a budgeted context
//! and calls the generator under the retry policy:
//!
//! - results found → grounded prompt with numbered citations
//! - nothing retrieved, or nothing fits the budget → ungrounded prompt,
//!   answer flagged `grounded: false`
//! - transient generation failures (including timeouts) → backoff + retry
//! - permanent generation failure → returned immediately
//!
//! Dropping the returned future at any `.await` (embedding, generation,
//! backoff) abandons the query without touching shared state.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;
use tracing::{debug, info};

use crate::context::{Citation, Context, ContextAssembler};
use crate::error::{Capability, CapabilityError, RagError, Result};
use crate::generation::{GenerationOptions, GenerationRequest, Generator};
use crate::models::RetrievalResult;
use crate::retrieval::RetrievalPipeline;
use crate::retry::{with_retry, RetryPolicy};

/// The final answer to a query.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    pub text: String,
    /// `false` when no context was retrieved.
    pub grounded: bool,
    pub citations: Vec<Citation>,
    /// Generation attempts made (1 = first try succeeded).
    pub attempts: u32,
    pub model: String,
}

/// Retrieval results, context and the prompt built from them.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub results: Vec<RetrievalResult>,
    pub context: Option<Context>,
    pub request: GenerationRequest,
}

impl PreparedQuery {
    pub fn grounded(&self) -> bool {
        self.context.is_some()
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.context
            .as_ref()
            .map(|c| c.citations.clone())
            .unwrap_or_default()
    }
}

/// Composes retrieval, context assembly and generation.
#[derive(Clone)]
pub struct RagOrchestrator {
    retrieval: RetrievalPipeline,
    assembler: ContextAssembler,
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    token_budget: usize,
    options: GenerationOptions,
}

impl RagOrchestrator {
    /// # Errors
    ///
    /// [`RagError::Config`] if `token_budget == 0`.
    pub fn new(
        retrieval: RetrievalPipeline,
        assembler: ContextAssembler,
        generator: Arc<dyn Generator>,
        token_budget: usize,
    ) -> Result<Self> {
        if token_budget == 0 {
            return Err(RagError::config("context token budget must be > 0"));
        }
        Ok(Self {
            retrieval,
            assembler,
            generator,
            retry: RetryPolicy::default(),
            token_budget,
            options: GenerationOptions::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn retrieval(&self) -> &RetrievalPipeline {
        &self.retrieval
    }

    /// Retrieve, assemble and build the prompt without generating.
    pub async fn prepare(&self, query: &str) -> Result<PreparedQuery> {
        let results = self.retrieval.retrieve_default(query).await?;

        if results.is_empty() {
            debug!("No results retrieved, using ungrounded prompt");
            return Ok(PreparedQuery {
                results,
                context: None,
                request: GenerationRequest::ungrounded(query.trim(), self.options),
            });
        }

        let context = self.assembler.assemble(&results, self.token_budget)?;
        if context.is_empty() {
            debug!(budget = context.budget, "Budget holds no context, using ungrounded prompt");
            return Ok(PreparedQuery {
                results,
                context: None,
                request: GenerationRequest::ungrounded(query.trim(), self.options),
            });
        }
        debug!(
            retrieved = results.len(),
            included = context.citations.len(),
            used = context.used,
            budget = context.budget,
            "Assembled context"
        );
        let request = GenerationRequest::grounded(query.trim(), &context, self.options);
        Ok(PreparedQuery {
            results,
            context: Some(context),
            request,
        })
    }

    /// Answer `query`.
    pub async fn answer(&self, query: &str) -> Result<GeneratedAnswer> {
        let prepared = self.prepare(query).await?;

        let generator = &self.generator;
        let request = &prepared.request;
        let (text, attempts) = with_retry(&self.retry, Capability::Generation, |_| {
            generator.generate(request)
        })
        .await?;

        let grounded = prepared.grounded();
        info!(
            grounded,
            attempts,
            citations = prepared.context.as_ref().map_or(0, |c| c.citations.len()),
            "Generated answer"
        );

        Ok(GeneratedAnswer {
            text,
            grounded,
            citations: prepared.citations(),
            attempts,
            model: self.generator.model_name().to_string(),
        })
    }

    /// Answer `query` as a stream of text fragments.
    ///
    /// Opening the stream is retried like [`answer`](Self::answer); errors
    /// after the first fragment are passed through to the caller.
    pub async fn answer_stream(
        &self,
        query: &str,
    ) -> Result<(
        PreparedQuery,
        BoxStream<'static, std::result::Result<String, CapabilityError>>,
    )> {
        let prepared = self.prepare(query).await?;
        let generator = &self.generator;
        let request = &prepared.request;
        let (stream, _) = with_retry(&self.retry, Capability::Generation, |_| {
            generator.generate_stream(request)
        })
        .await?;
        Ok((prepared, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BudgetUnit;
    use crate::embedding::{CachedEmbedder, EmbeddingCache, Embedder};
    use crate::index::VectorIndex;
    use crate::models::{ChunkMeta, EmbeddingVector, IndexEntry};
    use crate::retrieval::RetrievalParams;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, CapabilityError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    enum Behavior {
        Echo,
        FailTransient(u32),
        FailPermanent,
        SlowFirst,
    }

    struct ScriptedGenerator {
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl ScriptedGenerator {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> std::result::Result<String, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Echo => Ok(request.user.clone()),
                Behavior::FailTransient(times) if n < times => Err(CapabilityError::transient(
                    Capability::Generation,
                    "HTTP 429",
                )),
                Behavior::FailTransient(_) => Ok("recovered".to_string()),
                Behavior::FailPermanent => Err(CapabilityError::permanent(
                    Capability::Generation,
                    "HTTP 401",
                )),
                Behavior::SlowFirst => {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    Ok("eventually".to_string())
                }
            }
        }
    }

    fn index_with(texts: &[&str]) -> Arc<VectorIndex> {
        let index = Arc::new(VectorIndex::default());
        let entries = texts
            .iter()
            .enumerate()
            .map(|(i, t)| IndexEntry {
                chunk_id: format!("c{}", i),
                vector: EmbeddingVector::new("const", vec![1.0, i as f32 * 0.1]),
                meta: ChunkMeta {
                    document_id: "doc".to_string(),
                    source: "doc.txt".to_string(),
                    chunk_index: i as u32,
                    start: i * 100,
                    end: i * 100 + t.len(),
                    text: t.to_string(),
                },
            })
            .collect();
        index.insert(entries).unwrap();
        index
    }

    fn orchestrator(index: Arc<VectorIndex>, generator: Arc<dyn Generator>) -> RagOrchestrator {
        orchestrator_with_budget(index, generator, 500)
    }

    fn orchestrator_with_budget(
        index: Arc<VectorIndex>,
        generator: Arc<dyn Generator>,
        budget: usize,
    ) -> RagOrchestrator {
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(ConstEmbedder),
            Arc::new(EmbeddingCache::unbounded()),
        ));
        let retrieval = RetrievalPipeline::new(embedder, index, RetrievalParams::default()).unwrap();
        RagOrchestrator::new(retrieval, ContextAssembler::new(BudgetUnit::Chars), generator, budget)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                timeout: Some(Duration::from_secs(1)),
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_grounded_answer_has_citations() {
        let orch = orchestrator(
            index_with(&["Ferris is a crab.", "Cargo builds crates."]),
            ScriptedGenerator::new(Behavior::Echo),
        );
        let answer = orch.answer("Who is Ferris?").await.unwrap();
        assert!(answer.grounded);
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].chunk_id, "c0");
        assert!(answer.text.contains("[1] Ferris is a crab."));
        assert!(answer.text.ends_with("Question: Who is Ferris?"));
        assert_eq!(answer.attempts, 1);
        assert_eq!(answer.model, "scripted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_index_yields_ungrounded_answer() {
        let orch = orchestrator(
            Arc::new(VectorIndex::default()),
            ScriptedGenerator::new(Behavior::Echo),
        );
        let answer = orch.answer("anything").await.unwrap();
        assert!(!answer.grounded);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.text, "Question: anything");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_generation_retried() {
        let generator = ScriptedGenerator::new(Behavior::FailTransient(2));
        let orch = orchestrator(index_with(&["text"]), generator.clone());
        let answer = orch.answer("q").await.unwrap();
        assert_eq!(answer.text, "recovered");
        assert_eq!(answer.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let generator = ScriptedGenerator::new(Behavior::FailTransient(10));
        let orch = orchestrator(index_with(&["text"]), generator.clone());
        let err = orch.answer("q").await.unwrap_err();
        assert!(matches!(err, RagError::CapabilityUnavailable { attempts: 3, .. }));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_fatal() {
        let generator = ScriptedGenerator::new(Behavior::FailPermanent);
        let orch = orchestrator(index_with(&["text"]), generator.clone());
        let err = orch.answer("q").await.unwrap_err();
        assert!(matches!(err, RagError::PermanentCapability { .. }));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_transient() {
        let generator = ScriptedGenerator::new(Behavior::SlowFirst);
        let orch = orchestrator(index_with(&["text"]), generator.clone());
        let answer = orch.answer("q").await.unwrap();
        assert_eq!(answer.text, "eventually");
        assert_eq!(answer.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_query_not_generated() {
        let generator = ScriptedGenerator::new(Behavior::Echo);
        let orch = orchestrator(index_with(&["text"]), generator.clone());
        assert!(matches!(
            orch.answer("  ").await,
            Err(RagError::InvalidQuery(_))
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_stream() {
        let orch = orchestrator(index_with(&["text"]), ScriptedGenerator::new(Behavior::Echo));
        let (prepared, stream) = orch.answer_stream("q").await.unwrap();
        assert!(prepared.grounded());
        let parts: Vec<String> = stream.try_collect().await.unwrap();
        assert_eq!(parts.concat(), prepared.request.user);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_context_respects_budget() {
        let long_a = "a".repeat(60);
        let long_b = "b".repeat(30);
        let short = "ccc";
        for budget in [10, 25, 40, 64] {
            let orch = orchestrator_with_budget(
                index_with(&[&long_a, &long_b, short]),
                ScriptedGenerator::new(Behavior::Echo),
                budget,
            );
            let answer = orch.answer("q").await.unwrap();
            assert!(answer.grounded);
            let sent = answer
                .text
                .strip_prefix("Context:\n")
                .and_then(|rest| rest.split("\n\nQuestion:").next())
                .unwrap();
            assert!(
                sent.chars().count() <= budget,
                "budget {} exceeded: {:?}",
                budget,
                sent
            );
            assert!(sent.starts_with("[1] "));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_below_marker_is_ungrounded() {
        let orch = orchestrator_with_budget(
            index_with(&["text"]),
            ScriptedGenerator::new(Behavior::Echo),
            3,
        );
        let answer = orch.answer("q").await.unwrap();
        assert!(!answer.grounded);
        assert_eq!(answer.text, "Question: q");
    }
}
