//! Budgeted context assembly with citation tracking.
//!
//! [`ContextAssembler::assemble`] packs retrieval results into one context
//! string that never exceeds the budget:
//!
//! 1. Results are visited in descending score order.
//! 2. A chunk is added whole when it (plus the separator) still fits.
//! 3. A chunk that does not fit is skipped and the next one is tried.
//! 4. The exception is the very first result: if it alone exceeds the
//!    budget it is hard-truncated to fit, so a non-empty retrieval never
//!    yields an empty context.
//!
//! Budgets are measured in characters or in estimated tokens
//! (`⌈chars / 4⌉`) against [`Context::numbered_text`], the form that goes
//! into prompts. Citation markers and separators count toward the budget.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::RetrievalResult;

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text of `chars` characters.
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Unit the context budget is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    #[default]
    Chars,
    Tokens,
}

impl BudgetUnit {
    /// Cost of `chars` characters in this unit.
    pub fn cost(&self, chars: usize) -> usize {
        match self {
            BudgetUnit::Chars => chars,
            BudgetUnit::Tokens => estimate_tokens(chars),
        }
    }

    /// Largest character count whose cost fits in `budget`.
    pub fn max_chars(&self, budget: usize) -> usize {
        match self {
            BudgetUnit::Chars => budget,
            BudgetUnit::Tokens => budget.saturating_mul(CHARS_PER_TOKEN),
        }
    }
}

/// Where an included chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based marker used in prompts (`[1]`, `[2]`, …).
    pub marker: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub start: usize,
    /// End offset of the included text (earlier than the chunk's end when
    /// truncated).
    pub end: usize,
    pub score: f32,
    pub truncated: bool,
}

/// An assembled, budget-bounded context.
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    /// Included chunk texts, in inclusion order.
    pub chunks: Vec<String>,
    pub citations: Vec<Citation>,
    pub separator: String,
    pub unit: BudgetUnit,
    pub budget: usize,
    /// Budget consumed by [`numbered_text`](Self::numbered_text).
    pub used: usize,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The chunks joined by the separator.
    pub fn text(&self) -> String {
        self.chunks.join(&self.separator)
    }

    /// The chunks prefixed with their citation markers, for prompts.
    pub fn numbered_text(&self) -> String {
        self.chunks
            .iter()
            .zip(&self.citations)
            .map(|(text, c)| format!("{}{}", marker_prefix(c.marker), text))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

/// Packs retrieval results into a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    unit: BudgetUnit,
    separator: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(BudgetUnit::Chars)
    }
}

impl ContextAssembler {
    pub fn new(unit: BudgetUnit) -> Self {
        Self {
            unit,
            separator: "\n\n".to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn unit(&self) -> BudgetUnit {
        self.unit
    }

    /// Assemble `results` under `budget`.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] if `budget == 0`.
    pub fn assemble(&self, results: &[RetrievalResult], budget: usize) -> Result<Context> {
        if budget == 0 {
            return Err(RagError::config("context token budget must be > 0"));
        }

        let mut ordered: Vec<&RetrievalResult> = results.iter().collect();
        ordered.sort_by(|a, b| b.score.total_cmp(&a.score));

        let sep_chars = self.separator.chars().count();
        let mut chunks = Vec::new();
        let mut citations = Vec::new();
        let mut used_chars = 0usize;

        for (i, result) in ordered.into_iter().enumerate() {
            let marker = marker_prefix(citations.len() + 1).chars().count();
            let chunk_chars = result.text.chars().count();
            let joint = if chunks.is_empty() { 0 } else { sep_chars };
            let total = used_chars + joint + marker + chunk_chars;

            if self.unit.cost(total) <= budget {
                used_chars = total;
                chunks.push(result.text.clone());
                citations.push(cite(result, citations.len() + 1, result.end, false));
            } else if i == 0 {
                // A budget too small for even the marker leaves the context empty.
                let keep = self
                    .unit
                    .max_chars(budget)
                    .saturating_sub(marker)
                    .min(chunk_chars);
                if keep == 0 {
                    continue;
                }
                let cut = result
                    .text
                    .char_indices()
                    .nth(keep)
                    .map(|(b, _)| b)
                    .unwrap_or(result.text.len());
                used_chars = marker + keep;
                chunks.push(result.text[..cut].to_string());
                citations.push(cite(result, 1, result.start + cut, true));
            }
        }

        Ok(Context {
            chunks,
            citations,
            separator: self.separator.clone(),
            unit: self.unit,
            budget,
            used: self.unit.cost(used_chars),
        })
    }
}

/// Prefix put in front of chunk `marker` in prompts.
fn marker_prefix(marker: usize) -> String {
    format!("[{}] ", marker)
}

fn cite(result: &RetrievalResult, marker: usize, end: usize, truncated: bool) -> Citation {
    Citation {
        marker,
        chunk_id: result.chunk_id.clone(),
        document_id: result.document_id.clone(),
        source: result.source.clone(),
        start: result.start,
        end,
        score: result.score,
        truncated,
    }
}
