//! Aggregate defect statistics.

use std::collections::BTreeMap;

use crate::assign::{DefectAssignment, UnassignedReason};
use crate::layout::PanelKey;

/// Defects found on one panel.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PanelDefectCount {
    pub panel: PanelKey,
    pub total: usize,
    pub by_class: BTreeMap<String, usize>,
}

/// Summary over all assignments of a run.
///
/// Maps are ordered and per-panel rows are sorted by key, so serializing the
/// same assignments always yields identical bytes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_defects: usize,
    pub resolved: usize,
    pub unassigned: usize,
    pub unassigned_by_reason: BTreeMap<UnassignedReason, usize>,
    /// Counts over every defect, resolved or not.
    pub by_class: BTreeMap<String, usize>,
    /// Resolved defects per tracker.
    pub by_tracker: BTreeMap<u32, usize>,
    /// Panels with at least one resolved defect, ascending key order.
    pub per_panel: Vec<PanelDefectCount>,
    pub panels_affected: usize,
    pub total_panels: usize,
    /// `panels_affected / total_panels * 100`, or 0 for an empty layout.
    pub percent_panels_affected: f64,
}

impl MetricsSnapshot {
    pub fn panel(&self, key: PanelKey) -> Option<&PanelDefectCount> {
        self.per_panel
            .binary_search_by_key(&key, |p| p.panel)
            .ok()
            .map(|i| &self.per_panel[i])
    }
}

/// Reduce assignments into a [`MetricsSnapshot`].
pub fn aggregate(assignments: &[DefectAssignment], total_panels: usize) -> MetricsSnapshot {
    let mut unassigned_by_reason: BTreeMap<UnassignedReason, usize> = BTreeMap::new();
    let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_tracker: BTreeMap<u32, usize> = BTreeMap::new();
    let mut panels: BTreeMap<PanelKey, PanelDefectCount> = BTreeMap::new();

    for a in assignments {
        *by_class.entry(a.label.clone()).or_default() += 1;
        match a.panel() {
            Some(key) => {
                *by_tracker.entry(key.tracker_id).or_default() += 1;
                let entry = panels.entry(key).or_insert_with(|| PanelDefectCount {
                    panel: key,
                    total: 0,
                    by_class: BTreeMap::new(),
                });
                entry.total += 1;
                *entry.by_class.entry(a.label.clone()).or_default() += 1;
            }
            None => {
                if let Some(reason) = a.unassigned_reason() {
                    *unassigned_by_reason.entry(reason).or_default() += 1;
                }
            }
        }
    }

    let resolved: usize = panels.values().map(|p| p.total).sum();
    let panels_affected = panels.len();
    let percent_panels_affected = if total_panels == 0 {
        0.0
    } else {
        panels_affected as f64 / total_panels as f64 * 100.0
    };

    MetricsSnapshot {
        total_defects: assignments.len(),
        resolved,
        unassigned: assignments.len() - resolved,
        unassigned_by_reason,
        by_class,
        by_tracker,
        per_panel: panels.into_values().collect(),
        panels_affected,
        total_panels,
        percent_panels_affected,
    }
}
