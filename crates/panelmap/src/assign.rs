//! Defect to panel assignment.

use rayon::prelude::*;

use crate::config::AssignmentConfig;
use crate::defect::Defect;
use crate::geo::CoordinateTransformer;
use crate::grid_index::PanelGridIndex;
use crate::layout::PanelKey;

/// Why a defect could not be assigned to a panel.
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
pub enum UnassignedReason {
    /// No panel centroid within the assignment threshold.
    DistanceExceeded,
    /// The detection box is malformed.
    GeometryError,
}

impl UnassignedReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::DistanceExceeded => "distance_exceeded",
            Self::GeometryError => "geometry_error",
        }
    }
}

impl std::fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssignmentStatus {
    Resolved {
        panel: PanelKey,
        /// Distance in meters from the defect centroid to the panel centroid.
        distance: f64,
    },
    Unassigned {
        reason: UnassignedReason,
    },
}

/// Outcome for one input defect.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DefectAssignment {
    pub defect_index: usize,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Defect centroid in world units; `None` when the box was invalid or
    /// could not be mapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_centroid: Option<[f64; 2]>,
    #[serde(flatten)]
    pub status: AssignmentStatus,
}

impl DefectAssignment {
    pub fn panel(&self) -> Option<PanelKey> {
        match self.status {
            AssignmentStatus::Resolved { panel, .. } => Some(panel),
            AssignmentStatus::Unassigned { .. } => None,
        }
    }

    pub fn unassigned_reason(&self) -> Option<UnassignedReason> {
        match self.status {
            AssignmentStatus::Resolved { .. } => None,
            AssignmentStatus::Unassigned { reason } => Some(reason),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.panel().is_some()
    }
}

/// Assigns defects to the nearest panel cell.
///
/// Every call is a pure function of the defect, the transform and the index,
/// so results do not depend on evaluation order or thread count.
#[derive(Debug, Clone, Copy)]
pub struct DefectAssigner<'a> {
    transformer: &'a CoordinateTransformer,
    index: &'a PanelGridIndex,
    max_distance: f64,
}

impl<'a> DefectAssigner<'a> {
    pub fn new(
        transformer: &'a CoordinateTransformer,
        index: &'a PanelGridIndex,
        config: &AssignmentConfig,
    ) -> Self {
        Self {
            transformer,
            index,
            max_distance: config.max_distance,
        }
    }

    pub fn assign_one(&self, defect: &Defect) -> DefectAssignment {
        let mut out = DefectAssignment {
            defect_index: defect.index,
            label: defect.label.clone(),
            confidence: defect.confidence,
            world_centroid: None,
            status: AssignmentStatus::Unassigned {
                reason: UnassignedReason::GeometryError,
            },
        };

        if let Err(err) = defect.bbox.validate() {
            tracing::warn!(defect = defect.index, label = %defect.label, "unassigned: {}", err);
            return out;
        }

        let [row, col] = defect.bbox.center();
        let world = self.transformer.pixel_to_world(row, col);
        if !world.iter().all(|v| v.is_finite()) {
            tracing::warn!(
                defect = defect.index,
                label = %defect.label,
                "unassigned: centroid ({}, {}) has no finite world position",
                row,
                col
            );
            return out;
        }
        out.world_centroid = Some(world);

        out.status = match self.index.nearest_cell(world, self.max_distance) {
            Some(hit) => AssignmentStatus::Resolved {
                panel: hit.cell.key,
                distance: hit.distance,
            },
            None => {
                tracing::debug!(
                    defect = defect.index,
                    max_distance = self.max_distance,
                    "no panel within threshold"
                );
                AssignmentStatus::Unassigned {
                    reason: UnassignedReason::DistanceExceeded,
                }
            }
        };
        out
    }

    /// Lazily assign defects in input order. Dropping the iterator early
    /// cancels the remaining work; everything already yielded stays valid.
    pub fn assign_iter<'d>(&self, defects: &'d [Defect]) -> AssignIter<'d, 'a> {
        AssignIter {
            assigner: *self,
            defects: defects.iter(),
        }
    }

    /// Assign every defect, one result per input, in input order.
    pub fn assign_all(&self, defects: &[Defect], parallel: bool) -> Vec<DefectAssignment> {
        let assignments: Vec<DefectAssignment> = if parallel {
            defects.par_iter().map(|d| self.assign_one(d)).collect()
        } else {
            self.assign_iter(defects).collect()
        };

        let resolved = assignments.iter().filter(|a| a.is_resolved()).count();
        tracing::info!(
            defects = defects.len(),
            resolved,
            unassigned = defects.len() - resolved,
            "assigned defects to panels"
        );
        assignments
    }
}

/// Iterator returned by [`DefectAssigner::assign_iter`].
#[derive(Debug, Clone)]
pub struct AssignIter<'d, 'a> {
    assigner: DefectAssigner<'a>,
    defects: std::slice::Iter<'d, Defect>,
}

impl Iterator for AssignIter<'_, '_> {
    type Item = DefectAssignment;

    fn next(&mut self) -> Option<Self::Item> {
        self.defects.next().map(|d| self.assigner.assign_one(d))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.defects.size_hint()
    }
}

impl ExactSizeIterator for AssignIter<'_, '_> {}
