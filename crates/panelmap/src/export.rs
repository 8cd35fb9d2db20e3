//! Metrics export: JSON summary and per-panel CSV.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::defect::KNOWN_DEFECT_CLASSES;
use crate::geo::CoordinateTransformer;
use crate::layout::{PanelKey, PanelLayout};
use crate::metrics::MetricsSnapshot;

/// Top-level summary of the metrics document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSummary {
    pub total_panels: usize,
    pub panels_with_defects: usize,
    pub total_defects: usize,
    pub resolved_defects: usize,
    pub unassigned_defects: usize,
    /// Percentage of panels with defects, two decimals.
    pub defect_rate_percent: f64,
    pub defects_by_class: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PanelRecord {
    pub panel_id: String,
    pub tracker: u32,
    pub row: u32,
    pub col: u32,
    pub total_defects: usize,
    pub defects_by_class: BTreeMap<String, usize>,
}

/// Metrics document written to `metrics.json`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsDocument {
    pub summary: MetricsSummary,
    pub panels_with_defects: Vec<PanelRecord>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl MetricsDocument {
    pub fn from_snapshot(metrics: &MetricsSnapshot) -> Self {
        let summary = MetricsSummary {
            total_panels: metrics.total_panels,
            panels_with_defects: metrics.panels_affected,
            total_defects: metrics.total_defects,
            resolved_defects: metrics.resolved,
            unassigned_defects: metrics.unassigned,
            defect_rate_percent: round2(metrics.percent_panels_affected),
            defects_by_class: metrics.by_class.clone(),
        };
        let panels_with_defects = metrics
            .per_panel
            .iter()
            .map(|p| PanelRecord {
                panel_id: p.panel.to_string(),
                tracker: p.panel.tracker_id,
                row: p.panel.row,
                col: p.panel.col,
                total_defects: p.total,
                defects_by_class: p.by_class.clone(),
            })
            .collect();
        Self {
            summary,
            panels_with_defects,
        }
    }
}

pub fn write_metrics_json(path: &Path, metrics: &MetricsSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    let doc = MetricsDocument::from_snapshot(metrics);
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    tracing::info!(path = %path.display(), "wrote metrics JSON");
    Ok(())
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Class columns: known classes first, then any other label seen, sorted.
fn class_columns(metrics: &MetricsSnapshot) -> Vec<String> {
    let mut columns: Vec<String> = KNOWN_DEFECT_CLASSES.iter().map(|c| c.to_string()).collect();
    let extra: BTreeSet<&String> = metrics
        .per_panel
        .iter()
        .flat_map(|p| p.by_class.keys())
        .filter(|c| !KNOWN_DEFECT_CLASSES.contains(&c.as_str()))
        .collect();
    columns.extend(extra.into_iter().cloned());
    columns
}

/// One row per layout panel in key order, with the panel centroid in WGS84.
pub fn metrics_csv(metrics: &MetricsSnapshot, layout: &PanelLayout, transformer: &CoordinateTransformer) -> String {
    let classes = class_columns(metrics);

    let mut out = String::new();
    let mut header = vec![
        "panel_id".to_string(),
        "tracker".to_string(),
        "row".to_string(),
        "col".to_string(),
        "has_defects".to_string(),
        "total_defects".to_string(),
    ];
    header.extend(classes.iter().map(|c| csv_field(c)));
    header.extend(["longitude".to_string(), "latitude".to_string()]);
    out.push_str(&header.join(","));
    out.push('\n');

    for cell in layout.cells() {
        let PanelKey { tracker_id, row, col } = cell.key;
        let counts = metrics.panel(cell.key);
        let total = counts.map_or(0, |p| p.total);
        let position = transformer.world_to_lat_lon(cell.centroid);

        let _ = write!(out, "{},{},{},{},{},{}", cell.key, tracker_id, row, col, total > 0, total);
        for class in &classes {
            let n = counts.and_then(|p| p.by_class.get(class)).copied().unwrap_or(0);
            let _ = write!(out, ",{}", n);
        }
        let _ = writeln!(out, ",{:.8},{:.8}", position.lon, position.lat);
    }
    out
}

pub fn write_metrics_csv(
    path: &Path,
    metrics: &MetricsSnapshot,
    layout: &PanelLayout,
    transformer: &CoordinateTransformer,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, metrics_csv(metrics, layout, transformer))?;
    tracing::info!(path = %path.display(), panels = layout.n_cells(), "wrote metrics CSV");
    Ok(())
}
