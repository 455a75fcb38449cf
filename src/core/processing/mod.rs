//! Line-level source normalization.
//!
//! Source files are rewritten so every method signature owns its opening
//! bracket and no comment or literal can confuse the scanners, while a
//! [`LineMapping`] keeps track of where every transformed line came from.

mod balance;
mod literals;
mod mapping;
mod pipeline;
mod scope;
mod stages;

pub use balance::BracketBalanceTracker;
pub use literals::{blank_literals, find_inline_comment};
pub use mapping::LineMapping;
pub use pipeline::{ProcessedSource, SourceCodeProcessor};
pub use scope::{locate_body, BodySpan};
pub use stages::{carries_marker, Stage, StageIssue, StageOutput, MOVED_BRACKET, PLACEHOLDER_PATTERN};
