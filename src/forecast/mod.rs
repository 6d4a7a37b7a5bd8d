pub mod engine;
pub mod prices;
pub mod scenario;
pub mod tempo;
pub mod weather;

pub use engine::*;
pub use prices::*;
pub use scenario::*;
pub use tempo::*;
pub use weather::*;
