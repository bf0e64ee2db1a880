//! Built-in filters.

mod judge;
mod keyword;
mod length;
mod redact;

pub use judge::ModelJudge;
pub use keyword::KeywordBlocklist;
pub use length::{LengthLimit, LengthMode};
pub use redact::PatternRedactor;
