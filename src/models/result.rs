//! Match output: structured hits and the flattened six-field result.

use serde::{Deserialize, Serialize};

/// One grid that contains the query point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridHit {
    pub id: String,
    pub name: String,
    /// Label attribute stored on the grid record itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_label: Option<String>,
    /// Comma-joined labels from the label table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
}

/// Structured result of a point lookup.
///
/// `buffered` only holds grids that are not already in `exact`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GridMatch {
    pub exact: Vec<GridHit>,
    pub buffered: Vec<GridHit>,
}

impl GridMatch {
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.buffered.is_empty()
    }

    /// Flatten to comma-joined strings for presentation.
    pub fn to_result(&self) -> MatchResult {
        let exact = JoinedHits::from_hits(&self.exact);
        let buffered = JoinedHits::from_hits(&self.buffered);
        MatchResult {
            grid_id_no_buffer: exact.ids,
            grid_name_no_buffer: exact.names,
            grid_label_no_buffer: exact.labels,
            grid_id_buffer_500m: buffered.ids,
            grid_name_buffer_500m: buffered.names,
            grid_label_buffer_500m: buffered.labels,
        }
    }
}

impl From<&GridMatch> for MatchResult {
    fn from(m: &GridMatch) -> Self {
        m.to_result()
    }
}

/// Flat six-field match result.
///
/// Multiple grids are joined with commas in dataset order. Labels are
/// deduplicated; ids and names are not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub grid_id_no_buffer: Option<String>,
    pub grid_name_no_buffer: Option<String>,
    pub grid_label_no_buffer: Option<String>,
    pub grid_id_buffer_500m: Option<String>,
    pub grid_name_buffer_500m: Option<String>,
    pub grid_label_buffer_500m: Option<String>,
}

impl MatchResult {
    /// Column names in output order
    pub const FIELDS: [&'static str; 6] = [
        "grid_id_no_buffer",
        "grid_name_no_buffer",
        "grid_label_no_buffer",
        "grid_id_buffer_500m",
        "grid_name_buffer_500m",
        "grid_label_buffer_500m",
    ];

    /// The all-null result
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Values in [`Self::FIELDS`] order, nulls as empty strings
    pub fn values(&self) -> [&str; 6] {
        [
            self.grid_id_no_buffer.as_deref().unwrap_or(""),
            self.grid_name_no_buffer.as_deref().unwrap_or(""),
            self.grid_label_no_buffer.as_deref().unwrap_or(""),
            self.grid_id_buffer_500m.as_deref().unwrap_or(""),
            self.grid_name_buffer_500m.as_deref().unwrap_or(""),
            self.grid_label_buffer_500m.as_deref().unwrap_or(""),
        ]
    }
}

struct JoinedHits {
    ids: Option<String>,
    names: Option<String>,
    labels: Option<String>,
}

impl JoinedHits {
    fn from_hits(hits: &[GridHit]) -> Self {
        let ids: Vec<&str> = hits
            .iter()
            .map(|h| h.id.as_str())
            .filter(|id| !id.is_empty())
            .collect();
        let names: Vec<&str> = hits
            .iter()
            .map(|h| h.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();

        let mut labels: Vec<&str> = Vec::new();
        for hit in hits.iter().filter(|h| !h.id.is_empty()) {
            if let Some(label) = hit.labels.as_deref() {
                if !label.is_empty() && !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }

        Self {
            ids: join(&ids),
            names: join(&names),
            labels: join(&labels),
        }
    }
}

fn join(parts: &[&str]) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}
