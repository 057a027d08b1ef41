//! Generation capability trait and prompt construction.
//!
//! The core never talks to a language model directly. It builds a
//! [`GenerationRequest`] (system instruction, user message, options) and
//! hands it to a [`Generator`] implementation supplied by the application.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

use crate::context::Context;
use crate::error::CapabilityError;

/// System instruction used when context is available.
pub const GROUNDED_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the following context to answer the user's question.";

/// System instruction used when retrieval found nothing.
pub const UNGROUNDED_SYSTEM_PROMPT: &str = "You are a helpful assistant. No supporting documents \
were found for this question. Answer from general knowledge and state clearly that the answer \
is not grounded in the provided documents.";

/// Sampling options passed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 2000,
        }
    }
}

/// A fully built prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Prompt that grounds the answer in `context`, with `[n]` markers.
    pub fn grounded(query: &str, context: &Context, options: GenerationOptions) -> Self {
        Self {
            system: format!(
                "{} Cite sources with their bracketed numbers, e.g. [1].",
                GROUNDED_SYSTEM_PROMPT
            ),
            user: format!("Context:\n{}\n\nQuestion: {}", context.numbered_text(), query),
            options,
        }
    }

    /// Prompt with no context.
    pub fn ungrounded(query: &str, options: GenerationOptions) -> Self {
        Self {
            system: UNGROUNDED_SYSTEM_PROMPT.to_string(),
            user: format!("Question: {}", query),
            options,
        }
    }
}

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier reported on answers.
    fn model_name(&self) -> &str;

    /// Produce the full answer for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError>;

    /// Stream the answer as text fragments. Backends without native
    /// streaming yield the whole answer as one fragment.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, CapabilityError>>, CapabilityError> {
        let text = self.generate(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BudgetUnit, Citation};
    use futures::TryStreamExt;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
            Ok(request.user.clone())
        }
    }

    fn context() -> Context {
        let cite = |marker: usize, id: &str| Citation {
            marker,
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            source: "d.txt".to_string(),
            start: 0,
            end: 1,
            score: 1.0,
            truncated: false,
        };
        Context {
            chunks: vec!["Rust is fast.".to_string(), "Rust is safe.".to_string()],
            citations: vec![cite(1, "a"), cite(2, "b")],
            separator: "\n\n".to_string(),
            unit: BudgetUnit::Chars,
            budget: 100,
            used: 28,
        }
    }

    #[test]
    fn test_grounded_prompt() {
        let req = GenerationRequest::grounded("Why Rust?", &context(), GenerationOptions::default());
        assert!(req.system.starts_with(GROUNDED_SYSTEM_PROMPT));
        assert_eq!(
            req.user,
            "Context:\n[1] Rust is fast.\n\n[2] Rust is safe.\n\nQuestion: Why Rust?"
        );
        assert_eq!(req.options.max_output_tokens, 2000);
    }

    #[test]
    fn test_ungrounded_prompt() {
        let req = GenerationRequest::ungrounded("Why Rust?", GenerationOptions::default());
        assert!(req.system.contains("not grounded"));
        assert!(!req.user.contains("Context:"));
    }

    #[tokio::test]
    async fn test_default_stream_is_single_fragment() {
        let req = GenerationRequest::ungrounded("hi", GenerationOptions::default());
        let parts: Vec<String> = Echo.generate_stream(&req).await.unwrap().try_collect().await.unwrap();
        assert_eq!(parts, vec!["Question: hi".to_string()]);
    }
}
