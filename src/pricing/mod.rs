pub mod computer;
pub mod number;

pub use computer::{compute_rows, ComputedRow};
