//! Storage layer: run-state models and the progress snapshot.
//!
//! Holds the resumable `RunProgress` and the store that checkpoints it.

pub mod models;
pub mod progress;

pub use progress::{ProgressStore, StoreError, StoredSnapshot};
