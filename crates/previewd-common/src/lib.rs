//! Shared domain types for previewd.
//!
//! Everything here is free of I/O: the entities persisted by the storage layer,
//! the caller identity set carried on every request, role derivation, input
//! validation and the error taxonomy used across the crate boundary.

pub mod error;
pub mod identity;
pub mod models;
pub mod validate;

pub use error::{PreviewError, PreviewResult};
pub use identity::{Identity, IdentitySet};
pub use models::*;
