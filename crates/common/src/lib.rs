//! Shared types for the Gemini quota router workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
