//! panelmap: deterministic mapping of aerial defect detections to solar
//! panels, field photographs and severity metrics.
//!
//! The pipeline stages are:
//!
//! 1. **Geo** – affine pixel ↔ world transform of the orthophoto, plus
//!    conversion of world coordinates to WGS84.
//! 2. **Layout** – panel cells from an explicit layout document, from
//!    `solarpanels` detections, or from a uniform grid.
//! 3. **Grid index** – bucketed nearest-panel lookup.
//! 4. **Assign** – each defect to its nearest panel within a threshold.
//! 5. **GPS** – each assigned defect to the closest geotagged field photo.
//! 6. **Metrics / report** – ordered aggregates and canonically sorted
//!    report data, with JSON and CSV export.
//!
//! # Public API
//! - [`Pipeline`] with [`PipelineConfig`] as the primary entry point
//! - the individual stages ([`CoordinateTransformer`], [`PanelGridIndex`],
//!   [`DefectAssigner`], [`GpsMatcher`], [`metrics::aggregate`],
//!   [`report::assemble`]) for callers that drive them directly
//!
//! Every stage is a pure function of immutable inputs: reruns over the same
//! inputs produce identical output regardless of thread count.

pub mod assign;
pub mod config;
pub mod defect;
pub mod export;
pub mod geo;
pub mod gps;
pub mod grid_index;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod report;

#[cfg(test)]
pub(crate) mod test_utils;

pub use assign::{AssignIter, AssignmentStatus, DefectAssigner, DefectAssignment, UnassignedReason};
pub use config::{AssignmentConfig, GpsConfig, GridConfig, PipelineConfig};
pub use defect::{BoundingBox, Defect, DefectGeometryError, DetectionSet};
pub use geo::{CoordinateTransformer, Crs, InvalidGeometryError, LatLon, OrthoGeometry};
pub use gps::{
    GeoTaggedImage, GpsImageIndex, GpsMatch, GpsMatcher, GpsOutcome, MatchAnchor, RawImageRecord,
    UnmatchedReason, UnusableImage, UnusableReason,
};
pub use grid_index::{CellHit, PanelGridIndex};
pub use layout::{LayoutSource, PanelGridCell, PanelKey, PanelLayout, UniformGridSpec};
pub use metrics::{MetricsSnapshot, PanelDefectCount};
pub use pipeline::{Pipeline, PipelineError, PipelineInputs, PipelineOutput};
pub use report::{ReportData, ReportEntry};
