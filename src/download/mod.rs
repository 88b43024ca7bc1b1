//! URL validation, streaming fetch, and transient file management.

mod artifact;
mod client;
mod error;
mod filename;

pub use artifact::TransientArtifact;
pub use client::{FetchLimits, Fetcher};
pub use error::FetchError;
