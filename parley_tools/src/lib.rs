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

//! Tool registration, argument validation and isolated execution.

pub mod clock;
mod descriptor;
mod error;
mod invoker;
pub mod memory;
mod pool;
mod registry;

pub use clock::current_time_tool;
pub use descriptor::{BlockingFn, Tool, ToolDescriptor, ToolHandler, schema_object};
pub use error::ToolError;
pub use invoker::{ToolInvoker, ToolOutput};
pub use memory::{InMemoryMemory, MemoryProvider, memory_tools};
pub use pool::BlockingPool;
pub use registry::{ToolRegistry, ToolSource};
