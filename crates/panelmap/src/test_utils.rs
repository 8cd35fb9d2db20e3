//! Shared fixtures for unit tests.
//!
//! Most tests use a north-up WGS84 transform with one world unit per pixel
//! (`x = col`, `y = -row`) over a 3x3 grid of 1x1 panels whose north-west
//! corner is the world origin. Cell `T1-R{r}-C{c}` is then centred on pixel
//! `(r - 0.5, c - 0.5)`.

use crate::defect::{BoundingBox, Defect};
use crate::geo::{CoordinateTransformer, Crs, OrthoGeometry};
use crate::grid_index::PanelGridIndex;
use crate::layout::{PanelLayout, UniformGridSpec};

pub(crate) const IDENTITY_TRANSFORM: [f64; 6] = [1.0, 0.0, 0.0, 0.0, -1.0, 0.0];

pub(crate) fn identity_geometry() -> OrthoGeometry {
    OrthoGeometry {
        transform: IDENTITY_TRANSFORM,
        crs: None,
        downscale_factor: 1.0,
        width: None,
        height: None,
    }
}

pub(crate) fn identity_transformer() -> CoordinateTransformer {
    CoordinateTransformer::new(IDENTITY_TRANSFORM, 1.0, Crs::Wgs84).expect("valid transform")
}

pub(crate) fn three_by_three_layout() -> PanelLayout {
    let spec = UniformGridSpec {
        trackers: 1,
        rows: 3,
        cols: 3,
        ..UniformGridSpec::default()
    };
    PanelLayout::uniform(&spec, 1.0, 1.0).expect("valid grid")
}

pub(crate) fn three_by_three_index() -> PanelGridIndex {
    PanelGridIndex::build(three_by_three_layout(), 1.0).expect("valid pitch")
}

pub(crate) fn defect(index: usize, bbox: BoundingBox, label: &str) -> Defect {
    Defect {
        index,
        bbox,
        label: label.to_string(),
        confidence: None,
    }
}
