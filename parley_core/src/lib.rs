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

//! Shared types for the parley conversation engine: messages, completion
//! backend contract and transport events.

pub mod completion;
pub mod event;
pub mod message;
pub mod retry;

pub use completion::{
    CompletionBackend, CompletionOptions, CompletionRequest, CompletionResponse, ToolSpec, Usage,
};
pub use event::{InboundEvent, OutboundEvent, OutboundKind, OUTBOUND_CHANNEL};
pub use message::{ContextMessage, Role, ToolCallRequest};
pub use retry::retry_with_backoff;
