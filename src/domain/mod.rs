pub mod forecast;
pub mod types;

pub use forecast::*;
pub use types::*;
