pub mod constraints;
pub mod problem;
pub mod solver;

pub use constraints::*;
pub use problem::*;
pub use solver::*;
