//! Trellis - an embeddable HTTP server whose routes, middleware and
//! dependencies are registered at runtime.
//!
//! The crate root re-exports the core so most callers only depend on `trellis`.

// Re-export core functionality
pub use trellis_core::*;

// Re-export sibling crates
pub use trellis_config;
pub use trellis_openapi;

pub mod manifest;

pub use manifest::{Manifest, ManifestError};
