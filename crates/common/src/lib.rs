//! Common types for the session pool workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
