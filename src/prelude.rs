//! Prelude module that provides common imports
//!
//! This module should be imported as `use crate::prelude::*` in modules
//! that need common functionality.

// Re-export anyhow::Result as the Result type of the migration framework
pub use anyhow::Result;

// Re-export the domain error for convenient access
pub use crate::error::IdentityError;
