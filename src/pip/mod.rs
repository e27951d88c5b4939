//! Point-in-polygon (PIP) grid matching.
//!
//! Grids and their buffered counterparts are held in R-tree spatial
//! indexes; lookups filter the envelope candidates with an exact
//! boundary-inclusive containment test.

mod buffer;
mod index;
mod matcher;
pub mod projection;

pub use buffer::{derive_buffered, BufferState};
pub use index::GridSpatialIndex;
pub use matcher::{GridMatcher, LoadReport, LoadState};
pub use projection::UtmZone;
