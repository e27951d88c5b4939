//! Spatial index for fast grid lookups.

use geo::{Intersects, Point};
use rstar::{RTree, RTreeObject, AABB};
use tracing::{debug, info};

use crate::models::GridRecord;

/// Wrapper for R-tree indexing of grid records
struct IndexedGrid {
    record: GridRecord,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedGrid {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedGrid {
    fn new(record: GridRecord) -> Option<Self> {
        let rect = record.bbox()?;
        Some(Self {
            envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            record,
        })
    }
}

/// Spatial index over grid polygons using an R-tree
pub struct GridSpatialIndex {
    tree: RTree<IndexedGrid>,
}

impl GridSpatialIndex {
    /// Build the index. Records without any geometry are left out.
    pub fn build(records: Vec<GridRecord>) -> Self {
        let total = records.len();
        let indexed: Vec<IndexedGrid> = records.into_iter().filter_map(IndexedGrid::new).collect();

        if indexed.len() < total {
            debug!(
                "Skipped {} grids with empty geometry",
                total - indexed.len()
            );
        }

        let tree = RTree::bulk_load(indexed);
        info!("Spatial index built with {} grids", tree.size());

        Self { tree }
    }

    /// Find all grids containing a point, boundary included, in dataset order.
    pub fn lookup(&self, x: f64, y: f64) -> Vec<&GridRecord> {
        let point = Point::new(x, y);
        let query_envelope = AABB::from_point([x, y]);

        // Use R-tree to get candidates via envelope intersection, then filter with exact containment
        let mut hits: Vec<&GridRecord> = self
            .tree
            .locate_in_envelope_intersecting(&query_envelope)
            .filter(|ig| ig.record.geometry.intersects(&point))
            .map(|ig| &ig.record)
            .collect();

        hits.sort_by_key(|r| r.row);
        hits
    }

    /// Get total number of indexed grids
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
