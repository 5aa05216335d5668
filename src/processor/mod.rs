//! Batch orchestration
//!
//! Scans the input tree, hands each file to the matching handler and
//! collects the results into a [`BatchSummary`].

pub mod core;
pub mod types;

pub use self::core::{BatchProcessor, ProgressObserver};
pub use self::types::{BatchSummary, ProcessingResult, ProcessingStatus, ProgressCounter};
