//! Small numeric/string helpers with no natural home closer to the domain they serve.

mod primitives;
mod sanitize;
mod stats;

pub use primitives::*;
pub use sanitize::*;
pub use stats::*;
