// Chart series domain models

use serde::{Deserialize, Serialize};

/// One point of a chart line: x is the lap (or any ordered axis), y the tracked value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub lap: f64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(lap: f64, value: f64) -> Self {
        Self { lap, value }
    }
}

/// A named, colored chart line. `virtualized_data` is derived from
/// `original_data` and is recomputed, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualizedSeries {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    #[serde(skip_serializing)]
    pub original_data: Vec<SeriesPoint>,
    pub virtualized_data: Vec<SeriesPoint>,
}

impl VirtualizedSeries {
    pub fn new(id: String, name: String, color: Option<String>, points: Vec<SeriesPoint>) -> Self {
        Self {
            id,
            name,
            color,
            virtualized_data: points.clone(),
            original_data: points,
        }
    }
}
