//! Utility modules for the snapshot engine.

pub mod errors;
pub mod logger;

pub use errors::{EngineError, FetchError, FetchErrorKind, Result};
