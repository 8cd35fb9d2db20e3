//! Runtime panel layout: the physical cells defects are assigned to.
//!
//! A layout comes from one of three sources:
//! - an explicit layout document (`panelmap.layout.v1`), typically exported
//!   from a CAD/vector layer;
//! - panel detections (`solarpanels` boxes) grouped into rows;
//! - a uniform grid generated from configured default panel dimensions.
//!
//! Cells are kept sorted by [`PanelKey`], which makes iteration order, and
//! every tie-break derived from it, independent of how the layout was built.

mod detected;
mod uniform;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub use uniform::UniformGridSpec;

const LAYOUT_SCHEMA_V1: &str = "panelmap.layout.v1";

/// Composite address of a panel cell. Ordering is lexicographic
/// `(tracker_id, row, col)`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PanelKey {
    pub tracker_id: u32,
    pub row: u32,
    pub col: u32,
}

impl PanelKey {
    pub const fn new(tracker_id: u32, row: u32, col: u32) -> Self {
        Self {
            tracker_id,
            row,
            col,
        }
    }
}

impl std::fmt::Display for PanelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}-R{}-C{}", self.tracker_id, self.row, self.col)
    }
}

/// One physical panel (or tracker segment) in world coordinates.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PanelGridCell {
    pub key: PanelKey,
    /// Closed ring of world vertices (first vertex not repeated).
    pub polygon: Vec<[f64; 2]>,
    /// Area centroid of `polygon`.
    pub centroid: [f64; 2],
}

impl PanelGridCell {
    /// Build a cell, deriving its centroid. Rejects degenerate polygons.
    pub fn new(key: PanelKey, polygon: Vec<[f64; 2]>) -> Result<Self, String> {
        if polygon.len() < 3 {
            return Err(format!(
                "panel {} polygon needs >= 3 vertices, got {}",
                key,
                polygon.len()
            ));
        }
        if polygon.iter().flatten().any(|v| !v.is_finite()) {
            return Err(format!("panel {} polygon has non-finite vertices", key));
        }
        let centroid = polygon_centroid(&polygon)
            .ok_or_else(|| format!("panel {} polygon has zero area", key))?;
        Ok(Self {
            key,
            polygon,
            centroid,
        })
    }

    /// Axis-aligned rectangle with top-left corner `top_left` (y grows north).
    pub fn rectangle(key: PanelKey, top_left: [f64; 2], width: f64, height: f64) -> Result<Self, String> {
        let [x0, y0] = top_left;
        Self::new(
            key,
            vec![
                [x0, y0],
                [x0 + width, y0],
                [x0 + width, y0 - height],
                [x0, y0 - height],
            ],
        )
    }
}

/// Shoelace centroid; `None` for (near-)zero area relative to the squared
/// bounding-box extent.
fn polygon_centroid(polygon: &[[f64; 2]]) -> Option<[f64; 2]> {
    // Shift to the first vertex to keep UTM-sized coordinates well conditioned.
    let origin = polygon[0];
    let mut area2 = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut extent = 0.0f64;
    for (i, p) in polygon.iter().enumerate() {
        extent = extent
            .max((p[0] - origin[0]).abs())
            .max((p[1] - origin[1]).abs());
        let q = polygon[(i + 1) % polygon.len()];
        let (px, py) = (p[0] - origin[0], p[1] - origin[1]);
        let (qx, qy) = (q[0] - origin[0], q[1] - origin[1]);
        let cross = px * qy - qx * py;
        area2 += cross;
        cx += (px + qx) * cross;
        cy += (py + qy) * cross;
    }
    if !area2.is_finite() || area2.abs() <= f64::EPSILON * extent * extent {
        return None;
    }
    Some([origin[0] + cx / (3.0 * area2), origin[1] + cy / (3.0 * area2)])
}

/// Where the cells of a layout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutSource {
    /// Explicit layout document.
    Explicit,
    /// Grouped `solarpanels` detections.
    Detections,
    /// Uniform grid from default panel dimensions.
    Uniform,
}

impl LayoutSource {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Detections => "detections",
            Self::Uniform => "uniform",
        }
    }
}

impl std::fmt::Display for LayoutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Read-only set of panel cells, unique by key.
#[derive(Debug, Clone)]
pub struct PanelLayout {
    pub name: String,
    pub source: LayoutSource,
    cells: Vec<PanelGridCell>,
    key_to_idx: HashMap<PanelKey, usize>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutSpecV1 {
    schema: String,
    name: String,
    panels: Vec<PanelSpec>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct PanelSpec {
    tracker_id: u32,
    row: u32,
    col: u32,
    polygon: Vec<[f64; 2]>,
}

impl PanelLayout {
    /// Build from cells in any order. Duplicate keys are rejected.
    pub fn from_cells(
        name: impl Into<String>,
        source: LayoutSource,
        mut cells: Vec<PanelGridCell>,
    ) -> Result<Self, String> {
        cells.sort_by_key(|c| c.key);
        if let Some(pair) = cells.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(format!("duplicate panel key {}", pair[0].key));
        }
        let key_to_idx = cells.iter().enumerate().map(|(i, c)| (c.key, i)).collect();
        Ok(Self {
            name: name.into(),
            source,
            cells,
            key_to_idx,
        })
    }

    /// Load an explicit layout document.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let spec: LayoutSpecV1 = serde_json::from_str(&data)?;
        Self::from_layout_spec(spec).map_err(Into::into)
    }

    fn from_layout_spec(spec: LayoutSpecV1) -> Result<Self, String> {
        if spec.schema != LAYOUT_SCHEMA_V1 {
            return Err(format!(
                "unsupported layout schema '{}' (expected '{}')",
                spec.schema, LAYOUT_SCHEMA_V1
            ));
        }
        if spec.name.trim().is_empty() {
            return Err("layout name must not be empty".to_string());
        }

        let cells = spec
            .panels
            .into_iter()
            .map(|p| PanelGridCell::new(PanelKey::new(p.tracker_id, p.row, p.col), p.polygon))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_cells(spec.name, LayoutSource::Explicit, cells)
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in ascending key order.
    pub fn cells(&self) -> &[PanelGridCell] {
        &self.cells
    }

    pub fn cell(&self, key: PanelKey) -> Option<&PanelGridCell> {
        self.key_to_idx.get(&key).map(|&idx| &self.cells[idx])
    }

    /// Distinct tracker IDs, ascending.
    pub fn tracker_ids(&self) -> BTreeSet<u32> {
        self.cells.iter().map(|c| c.key.tracker_id).collect()
    }

    /// Axis-aligned bounds over cell centroids as `(min_xy, max_xy)`.
    pub fn centroid_bounds(&self) -> Option<([f64; 2], [f64; 2])> {
        let first = self.cells.first()?.centroid;
        let mut min = first;
        let mut max = first;
        for c in &self.cells[1..] {
            min[0] = min[0].min(c.centroid[0]);
            min[1] = min[1].min(c.centroid[1]);
            max[0] = max[0].max(c.centroid[0]);
            max[1] = max[1].max(c.centroid[1]);
        }
        Some((min, max))
    }
}
