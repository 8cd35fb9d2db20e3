//! Matching assigned defects to the closest geotagged field photograph.
//!
//! Usable images are bucketed in 3-D by their position on the unit sphere.
//! The bucket side equals the chord subtended by the maximum match distance,
//! so every image within range of a query lies in one of the 27 buckets
//! around the query bucket. Candidates are then ranked by haversine distance.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::assign::DefectAssignment;
use crate::config::GpsConfig;
use crate::geo::{chord_for_distance_m, haversine_m, unit_vector, CoordinateTransformer, LatLon};
use crate::layout::PanelLayout;

/// Lower bound on the bucket side (unit-sphere chord, ~6 mm on the ground).
const MIN_BUCKET_CHORD: f64 = 1e-9;

type SphereBucket = (i64, i64, i64);

/// Entry of the raw image index document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawImageRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawImageRecord {
    /// Load a JSON list of image records.
    pub fn load_index(path: &Path) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Why an image was left out of the GPS index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnusableReason {
    MissingCoordinates,
    NonFiniteCoordinates,
    OutOfRangeCoordinates,
}

impl UnusableReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingCoordinates => "missing_coordinates",
            Self::NonFiniteCoordinates => "non_finite_coordinates",
            Self::OutOfRangeCoordinates => "out_of_range_coordinates",
        }
    }
}

impl std::fmt::Display for UnusableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UnusableImage {
    /// Position in the raw image index.
    pub index: usize,
    pub path: String,
    pub reason: UnusableReason,
}

/// Image with usable coordinates.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoTaggedImage {
    /// Position in the raw image index.
    pub index: usize,
    pub path: String,
    pub position: LatLon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn classify(index: usize, record: &RawImageRecord) -> Result<GeoTaggedImage, UnusableReason> {
    let (Some(lat), Some(lon)) = (record.latitude, record.longitude) else {
        return Err(UnusableReason::MissingCoordinates);
    };
    let position = LatLon::new(lat, lon);
    if !position.is_finite() {
        return Err(UnusableReason::NonFiniteCoordinates);
    }
    if !position.in_range() {
        return Err(UnusableReason::OutOfRangeCoordinates);
    }
    Ok(GeoTaggedImage {
        index,
        path: record.path.clone(),
        position,
        altitude: record.altitude,
        timestamp: record.timestamp,
    })
}

/// Ranking for equal-distance candidates: earlier capture first, untimed
/// images after timed ones, then input order.
fn tie_break(a: &GeoTaggedImage, b: &GeoTaggedImage) -> Ordering {
    a.timestamp
        .is_none()
        .cmp(&b.timestamp.is_none())
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.index.cmp(&b.index))
}

/// Immutable spatial index over usable images.
#[derive(Debug, Clone)]
pub struct GpsImageIndex {
    images: Vec<GeoTaggedImage>,
    unusable: Vec<UnusableImage>,
    buckets: HashMap<SphereBucket, Vec<usize>>,
    bucket_side: f64,
    max_distance_m: f64,
}

impl GpsImageIndex {
    /// Index `records`, keeping only images with usable coordinates.
    pub fn build(records: &[RawImageRecord], max_distance_m: f64) -> Self {
        let bucket_side = chord_for_distance_m(max_distance_m).max(MIN_BUCKET_CHORD);

        let mut images = Vec::with_capacity(records.len());
        let mut unusable = Vec::new();
        for (index, record) in records.iter().enumerate() {
            match classify(index, record) {
                Ok(image) => images.push(image),
                Err(reason) => {
                    tracing::warn!(image = %record.path, %reason, "excluding image from GPS index");
                    unusable.push(UnusableImage {
                        index,
                        path: record.path.clone(),
                        reason,
                    });
                }
            }
        }

        let mut buckets: HashMap<SphereBucket, Vec<usize>> = HashMap::new();
        for (i, image) in images.iter().enumerate() {
            buckets
                .entry(sphere_bucket(unit_vector(image.position), bucket_side))
                .or_default()
                .push(i);
        }

        tracing::info!(
            records = records.len(),
            eligible = images.len(),
            unusable = unusable.len(),
            "built GPS image index"
        );

        Self {
            images,
            unusable,
            buckets,
            bucket_side,
            max_distance_m,
        }
    }

    pub fn images(&self) -> &[GeoTaggedImage] {
        &self.images
    }

    pub fn unusable(&self) -> &[UnusableImage] {
        &self.unusable
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn max_distance_m(&self) -> f64 {
        self.max_distance_m
    }

    /// Closest image within the maximum distance, with its distance in meters.
    pub fn nearest(&self, anchor: LatLon) -> Option<(&GeoTaggedImage, f64)> {
        if !anchor.is_finite() {
            return None;
        }
        let (bx, by, bz) = sphere_bucket(unit_vector(anchor), self.bucket_side);

        let mut best: Option<(&GeoTaggedImage, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(list) = self.buckets.get(&(bx + dx, by + dy, bz + dz)) else {
                        continue;
                    };
                    for &i in list {
                        let image = &self.images[i];
                        let d = haversine_m(anchor, image.position);
                        if d > self.max_distance_m {
                            continue;
                        }
                        let better = match best {
                            None => true,
                            Some((cur, cur_d)) => d
                                .total_cmp(&cur_d)
                                .then_with(|| tie_break(image, cur))
                                .is_lt(),
                        };
                        if better {
                            best = Some((image, d));
                        }
                    }
                }
            }
        }
        best
    }
}

fn sphere_bucket(v: [f64; 3], side: f64) -> SphereBucket {
    let q = |c: f64| (c / side).floor() as i64;
    (q(v[0]), q(v[1]), q(v[2]))
}

/// Which point of a resolved assignment is matched against image positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAnchor {
    /// Centroid of the assigned panel cell.
    #[default]
    PanelCentroid,
    /// Centroid of the defect box.
    DefectCentroid,
}

impl MatchAnchor {
    pub const fn code(self) -> &'static str {
        match self {
            Self::PanelCentroid => "panel_centroid",
            Self::DefectCentroid => "defect_centroid",
        }
    }
}

impl std::fmt::Display for MatchAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a defect has no matching image.
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
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// The defect was not assigned to a panel.
    NotAttempted,
    /// No image with usable GPS exists.
    NoGpsImages,
    /// The closest image is farther than the maximum match distance.
    DistanceExceeded,
    /// The anchor point has no valid geographic position.
    AnchorUnavailable,
}

impl UnmatchedReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::NoGpsImages => "no_gps_images",
            Self::DistanceExceeded => "distance_exceeded",
            Self::AnchorUnavailable => "anchor_unavailable",
        }
    }
}

impl std::fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GpsOutcome {
    Matched {
        image_index: usize,
        path: String,
        distance_m: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    Unmatched {
        reason: UnmatchedReason,
    },
}

impl GpsOutcome {
    pub fn unmatched_reason(&self) -> Option<UnmatchedReason> {
        match self {
            Self::Matched { .. } => None,
            Self::Unmatched { reason } => Some(*reason),
        }
    }
}

/// GPS outcome for one defect.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GpsMatch {
    pub defect_index: usize,
    #[serde(flatten)]
    pub outcome: GpsOutcome,
}

/// Links resolved assignments to field photographs.
#[derive(Debug, Clone)]
pub struct GpsMatcher {
    index: GpsImageIndex,
    anchor: MatchAnchor,
}

impl GpsMatcher {
    pub fn new(records: &[RawImageRecord], config: &GpsConfig) -> Self {
        Self {
            index: GpsImageIndex::build(records, config.max_match_distance_m),
            anchor: config.anchor,
        }
    }

    pub fn index(&self) -> &GpsImageIndex {
        &self.index
    }

    pub fn anchor(&self) -> MatchAnchor {
        self.anchor
    }

    fn anchor_position(
        &self,
        assignment: &DefectAssignment,
        layout: &PanelLayout,
        transformer: &CoordinateTransformer,
    ) -> Option<LatLon> {
        let world = match self.anchor {
            MatchAnchor::PanelCentroid => layout.cell(assignment.panel()?)?.centroid,
            MatchAnchor::DefectCentroid => assignment.world_centroid?,
        };
        let position = transformer.world_to_lat_lon(world);
        (position.is_finite() && position.in_range()).then_some(position)
    }

    pub fn match_one(
        &self,
        assignment: &DefectAssignment,
        layout: &PanelLayout,
        transformer: &CoordinateTransformer,
    ) -> GpsMatch {
        let unmatched = |reason| GpsMatch {
            defect_index: assignment.defect_index,
            outcome: GpsOutcome::Unmatched { reason },
        };

        if !assignment.is_resolved() {
            return unmatched(UnmatchedReason::NotAttempted);
        }
        if self.index.is_empty() {
            return unmatched(UnmatchedReason::NoGpsImages);
        }
        let Some(anchor) = self.anchor_position(assignment, layout, transformer) else {
            tracing::warn!(defect = assignment.defect_index, "no geographic anchor for defect");
            return unmatched(UnmatchedReason::AnchorUnavailable);
        };

        match self.index.nearest(anchor) {
            Some((image, distance_m)) => GpsMatch {
                defect_index: assignment.defect_index,
                outcome: GpsOutcome::Matched {
                    image_index: image.index,
                    path: image.path.clone(),
                    distance_m,
                    timestamp: image.timestamp,
                },
            },
            None => unmatched(UnmatchedReason::DistanceExceeded),
        }
    }

    /// One match per assignment, in assignment order.
    pub fn match_all(
        &self,
        assignments: &[DefectAssignment],
        layout: &PanelLayout,
        transformer: &CoordinateTransformer,
        parallel: bool,
    ) -> Vec<GpsMatch> {
        let matches: Vec<GpsMatch> = if parallel {
            assignments
                .par_iter()
                .map(|a| self.match_one(a, layout, transformer))
                .collect()
        } else {
            assignments
                .iter()
                .map(|a| self.match_one(a, layout, transformer))
                .collect()
        };

        let matched = matches
            .iter()
            .filter(|m| matches!(m.outcome, GpsOutcome::Matched { .. }))
            .count();
        tracing::info!(
            assignments = assignments.len(),
            matched,
            max_distance_m = self.index.max_distance_m(),
            "matched defects to field images"
        );
        matches
    }
}
