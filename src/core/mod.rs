/// Core data model and error taxonomy shared by every stage of the
/// pipeline.

pub mod error;
pub mod types;

pub use error::EngineError;
pub use types::*;
