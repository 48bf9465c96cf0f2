//! Shared helpers.

mod hashing;
mod validation;

pub use hashing::{content_hash, hash_chain_link, verify_content_hash};
pub use validation::{require_non_empty, require_unit_interval, FieldError};
