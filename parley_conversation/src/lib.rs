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

//! Multi-conversation orchestration.
//!
//! The [`ConversationEngine`] keeps per-conversation history in a
//! [`ContextStore`], reduces it with a [`ContextReducer`] before each
//! completion call, runs the bounded tool-call loop and applies guardrails
//! at both boundaries. The [`LifecycleManager`] decides when a
//! conversation ends.

mod conversation;
mod engine;
mod lifecycle;
mod pairs;
mod reducer;
mod runner;
mod store;

pub use conversation::{Conversation, ConversationState, TerminationReason};
pub use engine::{ConversationEngine, EngineConfig, EngineError, EngineMessages};
pub use lifecycle::{LifecycleConfig, LifecycleManager, RoundOutcome, TerminationCallback};
pub use pairs::{drop_orphan_results, validate_tool_pairs};
pub use reducer::{ContextReducer, ContextStrategy, adaptive_window, fixed_window};
pub use store::{ContextStore, ConversationHandle};
