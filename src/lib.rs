//! Gridmatch - point-in-grid matching for operational grid polygons
//!
//! This library loads a grid polygon dataset and a grid label table, derives
//! a buffered copy of every grid, and reports which grids contain a point
//! exactly or only within the buffer. It is shared by the batch CLI and the
//! HTTP server binaries.

pub mod config;
pub mod coord;
pub mod error;
pub mod models;
pub mod pip;
pub mod source;

pub use config::MatcherConfig;
pub use coord::CoordValue;
pub use error::{GridError, MatchError};
pub use models::{GridHit, GridMatch, MatchResult};
pub use pip::{GridMatcher, LoadReport, LoadState};
pub use source::LabelMapping;
