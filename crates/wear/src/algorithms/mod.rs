pub mod preprocessing;
pub mod extraction;
pub mod selection;
pub mod smoothing;

pub use preprocessing::*;
pub use extraction::*;
pub use selection::*;
pub use smoothing::*;
