//! Canonically ordered report data handed to document renderers.

use std::collections::BTreeMap;

use crate::assign::{AssignmentStatus, DefectAssignment};
use crate::gps::{GpsMatch, GpsOutcome, UnmatchedReason, UnusableImage};
use crate::layout::{LayoutSource, PanelKey, PanelLayout};
use crate::metrics::MetricsSnapshot;

/// Per-defect row of the report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReportEntry {
    pub defect_index: usize,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_centroid: Option<[f64; 2]>,
    pub assignment: AssignmentStatus,
    pub gps: GpsOutcome,
}

impl ReportEntry {
    pub fn panel(&self) -> Option<PanelKey> {
        match self.assignment {
            AssignmentStatus::Resolved { panel, .. } => Some(panel),
            AssignmentStatus::Unassigned { .. } => None,
        }
    }

    /// Resolved entries by panel key, then unassigned ones; defect index last.
    fn sort_key(&self) -> (bool, Option<PanelKey>, usize) {
        let panel = self.panel();
        (panel.is_none(), panel, self.defect_index)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayoutSummary {
    pub name: String,
    pub source: LayoutSource,
    pub total_cells: usize,
    pub trackers: usize,
}

impl LayoutSummary {
    pub fn of(layout: &PanelLayout) -> Self {
        Self {
            name: layout.name.clone(),
            source: layout.source,
            total_cells: layout.n_cells(),
            trackers: layout.tracker_ids().len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GpsSummary {
    pub eligible_images: usize,
    pub unusable_images: usize,
    pub matched: usize,
    pub unmatched_by_reason: BTreeMap<UnmatchedReason, usize>,
}

/// Everything a renderer needs, sorted and immutable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReportData {
    /// CRS of the world coordinates in entries.
    pub crs: String,
    pub layout: LayoutSummary,
    pub entries: Vec<ReportEntry>,
    pub metrics: MetricsSnapshot,
    pub gps: GpsSummary,
    pub unusable_images: Vec<UnusableImage>,
}

/// Inputs to [`assemble`].
#[derive(Debug, Clone, Copy)]
pub struct ReportParts<'a> {
    pub crs: &'a str,
    pub layout: &'a PanelLayout,
    pub assignments: &'a [DefectAssignment],
    pub matches: &'a [GpsMatch],
    pub metrics: &'a MetricsSnapshot,
    pub eligible_images: usize,
    pub unusable_images: &'a [UnusableImage],
}

/// Join assignments with their GPS outcomes and sort canonically.
///
/// A defect without a GPS match record is reported as `not_attempted`.
pub fn assemble(parts: ReportParts<'_>) -> ReportData {
    let by_defect: BTreeMap<usize, &GpsOutcome> = parts
        .matches
        .iter()
        .map(|m| (m.defect_index, &m.outcome))
        .collect();

    let mut entries: Vec<ReportEntry> = parts
        .assignments
        .iter()
        .map(|a| ReportEntry {
            defect_index: a.defect_index,
            label: a.label.clone(),
            confidence: a.confidence,
            world_centroid: a.world_centroid,
            assignment: a.status.clone(),
            gps: by_defect.get(&a.defect_index).map(|o| (*o).clone()).unwrap_or(
                GpsOutcome::Unmatched {
                    reason: UnmatchedReason::NotAttempted,
                },
            ),
        })
        .collect();
    entries.sort_by_key(ReportEntry::sort_key);

    let mut gps = GpsSummary {
        eligible_images: parts.eligible_images,
        unusable_images: parts.unusable_images.len(),
        ..GpsSummary::default()
    };
    for entry in &entries {
        match entry.gps.unmatched_reason() {
            None => gps.matched += 1,
            Some(reason) => *gps.unmatched_by_reason.entry(reason).or_default() += 1,
        }
    }

    ReportData {
        crs: parts.crs.to_string(),
        layout: LayoutSummary::of(parts.layout),
        entries,
        metrics: parts.metrics.clone(),
        gps,
        unusable_images: parts.unusable_images.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::UnassignedReason;
    use crate::metrics::aggregate;
    use crate::test_utils::three_by_three_layout;

    fn assignment(i: usize, panel: Option<PanelKey>) -> DefectAssignment {
        DefectAssignment {
            defect_index: i,
            label: "hotspots".to_string(),
            confidence: Some(0.8),
            world_centroid: panel.map(|_| [0.5, -0.5]),
            status: match panel {
                Some(panel) => AssignmentStatus::Resolved { panel, distance: 0.0 },
                None => AssignmentStatus::Unassigned {
                    reason: UnassignedReason::DistanceExceeded,
                },
            },
        }
    }

    fn matched(i: usize) -> GpsMatch {
        GpsMatch {
            defect_index: i,
            outcome: GpsOutcome::Matched {
                image_index: 0,
                path: "a.jpg".to_string(),
                distance_m: 3.0,
                timestamp: None,
            },
        }
    }

    #[test]
    fn entries_sort_by_panel_then_defect_with_unassigned_last() {
        let layout = three_by_three_layout();
        let assignments = vec![
            assignment(0, None),
            assignment(1, Some(PanelKey::new(1, 2, 1))),
            assignment(2, Some(PanelKey::new(1, 1, 3))),
            assignment(3, Some(PanelKey::new(1, 1, 3))),
            assignment(4, None),
            assignment(5, Some(PanelKey::new(1, 1, 1))),
        ];
        let matches: Vec<GpsMatch> = assignments
            .iter()
            .map(|a| match a.panel() {
                Some(_) => matched(a.defect_index),
                None => GpsMatch {
                    defect_index: a.defect_index,
                    outcome: GpsOutcome::Unmatched {
                        reason: UnmatchedReason::NotAttempted,
                    },
                },
            })
            .collect();
        let metrics = aggregate(&assignments, layout.n_cells());

        let report = assemble(ReportParts {
            crs: "EPSG:4326",
            layout: &layout,
            assignments: &assignments,
            matches: &matches[..5],
            metrics: &metrics,
            eligible_images: 1,
            unusable_images: &[],
        });

        let order: Vec<usize> = report.entries.iter().map(|e| e.defect_index).collect();
        assert_eq!(order, vec![5, 2, 3, 1, 0, 4]);
        // Defect 5 had no match record.
        assert_eq!(
            report.entries[0].gps.unmatched_reason(),
            Some(UnmatchedReason::NotAttempted)
        );
        assert_eq!(report.gps.matched, 3);
        assert_eq!(report.gps.unmatched_by_reason[&UnmatchedReason::NotAttempted], 3);
        assert_eq!(report.layout.total_cells, 9);
        assert_eq!(report.layout.trackers, 1);
        assert_eq!(report.metrics.panels_affected, 3);
    }

    #[test]
    fn report_serializes_status_per_entry() {
        let layout = three_by_three_layout();
        let assignments = vec![assignment(0, Some(PanelKey::new(1, 1, 1)))];
        let metrics = aggregate(&assignments, layout.n_cells());
        let report = assemble(ReportParts {
            crs: "EPSG:4326",
            layout: &layout,
            assignments: &assignments,
            matches: &[matched(0)],
            metrics: &metrics,
            eligible_images: 1,
            unusable_images: &[],
        });
        let v = serde_json::to_value(&report).expect("serialize");
        assert_eq!(v["entries"][0]["assignment"]["status"], "resolved");
        assert_eq!(v["entries"][0]["assignment"]["panel"]["col"], 1);
        assert_eq!(v["entries"][0]["gps"]["outcome"], "matched");
        assert_eq!(v["layout"]["source"], "uniform");
    }
}
