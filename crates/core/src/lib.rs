//! Core library: rules, text extraction, partitioning and the resumable
//! batch coordinator.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod rules;
pub mod scanner;
pub mod stats;
pub mod writer;

pub use coordinator::{Coordinator, RunReport, RunState, RunStatus};
pub use error::RunError;
