//! Layout derived from `solarpanels` detections.
//!
//! Panel boxes are grouped into rows by their top edge, each row is read
//! left to right, and every box becomes a world-space rectangle through the
//! orthophoto transform. A detected row is treated as one tracker.

use super::{LayoutSource, PanelGridCell, PanelKey, PanelLayout};
use crate::defect::BoundingBox;
use crate::geo::CoordinateTransformer;

/// A box joins a row when its top lies within this fraction of the row's
/// first box height from that box's top.
const ROW_TOLERANCE_FRACTION: f64 = 0.5;

/// Group valid boxes into rows, top to bottom, each sorted left to right.
fn group_into_rows(boxes: &[BoundingBox]) -> Vec<Vec<BoundingBox>> {
    let mut sorted: Vec<BoundingBox> = boxes.to_vec();
    sorted.sort_by(|a, b| a.top.total_cmp(&b.top).then_with(|| a.left.total_cmp(&b.left)));

    let mut rows: Vec<Vec<BoundingBox>> = Vec::new();
    for b in sorted {
        let joins_current = rows.last().is_some_and(|row| {
            let reference = row[0];
            (b.top - reference.top).abs() <= reference.height * ROW_TOLERANCE_FRACTION
        });
        match rows.last_mut() {
            Some(row) if joins_current => row.push(b),
            _ => rows.push(vec![b]),
        }
    }
    for row in &mut rows {
        row.sort_by(|a, b| a.left.total_cmp(&b.left));
    }
    rows
}

impl PanelLayout {
    /// Build a layout from panel detections. Invalid boxes are skipped.
    pub fn from_panel_detections(
        boxes: &[BoundingBox],
        transformer: &CoordinateTransformer,
    ) -> Result<Self, String> {
        let mut valid = Vec::with_capacity(boxes.len());
        for (i, b) in boxes.iter().enumerate() {
            match b.validate() {
                Ok(()) => valid.push(*b),
                Err(err) => tracing::warn!(panel_box = i, "skipping panel detection: {}", err),
            }
        }

        // Keys count only the cells that survive, so they stay dense.
        let mut cells = Vec::with_capacity(valid.len());
        let mut tracker = 0u32;
        for row in group_into_rows(&valid) {
            let mut col = 0u32;
            for b in row {
                let polygon = b
                    .corners()
                    .iter()
                    .map(|&[pr, pc]| transformer.pixel_to_world(pr, pc))
                    .collect();
                let key = PanelKey::new(tracker + 1, 1, col + 1);
                match PanelGridCell::new(key, polygon) {
                    Ok(cell) => {
                        cells.push(cell);
                        col += 1;
                    }
                    Err(err) => tracing::warn!(
                        left = b.left,
                        top = b.top,
                        "skipping panel detection: {}",
                        err
                    ),
                }
            }
            if col > 0 {
                tracker += 1;
            }
        }

        tracing::debug!(
            detections = boxes.len(),
            cells = cells.len(),
            "built layout from panel detections"
        );
        Self::from_cells("detections", LayoutSource::Detections, cells)
    }
}
