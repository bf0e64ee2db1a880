#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Content filters applied at the input and output boundaries.
//!
//! A [`GuardrailPipeline`] runs registered [`Guardrail`]s in order. Each
//! filter sees the content produced by the previous one unless it is
//! registered as independent, in which case it always sees the original.
//! Filter errors and timeouts fail open.

mod chain;
pub mod filters;
mod pipeline;
mod result;

use async_trait::async_trait;

pub use chain::GuardrailChain;
pub use filters::{KeywordBlocklist, LengthLimit, LengthMode, ModelJudge, PatternRedactor};
pub use pipeline::{GuardrailOutcome, GuardrailPipeline, GuardrailWarning, Stages};
pub use result::{GuardContext, GuardrailAction, GuardrailResult, Stage};

/// A single content filter.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, content: &str, context: &GuardContext) -> anyhow::Result<GuardrailResult>;
}
