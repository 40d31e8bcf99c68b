pub mod fallback;
pub mod merger;

pub use merger::{merge, MergeSummary};
