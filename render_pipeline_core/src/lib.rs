//! Small ambient-stack crate shared by every other crate in the workspace: concurrency
//! sizing, progress reporting, and a handful of numeric/string helpers that have no natural
//! home closer to the domain they're used from.

pub mod concurrency;
pub mod progress;
pub mod utils;

pub use concurrency::ConcurrencyLimits;
