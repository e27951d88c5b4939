//! Core data models for grid matching.

pub mod grid;
pub mod result;

pub use grid::{Crs, FieldResolution, GridDataset, GridRecord};
pub use result::{GridHit, GridMatch, MatchResult};
