//! Shared types for the observation archival pipeline.
//!
//! This crate provides foundational types shared across the workspace:
//! - Measure kinds and the observation rows exported for each kind
//! - Block ranges and ledger entries with their lifecycle state
//! - The unified error type with stable codes and severity

pub mod block;
pub mod error;
pub mod measure;

pub use block::{Block, BlockRange, BlockState};
pub use error::{Error, ErrorCategory, Result, Severity, StructuredError};
pub use measure::{CellObservation, MeasureType, Observation, WifiObservation};

/// Revision of the observation table layout exported into archives.
///
/// Bump whenever a column is added to, removed from, or reordered in
/// `CellObservation::COLUMNS` or `WifiObservation::COLUMNS`.
pub const SCHEMA_REVISION: &str = "obs-2014-07";
