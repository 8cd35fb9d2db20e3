//! Uniform grid fallback used when no explicit or detected layout exists.

use super::{LayoutSource, PanelGridCell, PanelKey, PanelLayout};

/// Upper bound on generated cells; larger grids are almost certainly a
/// misconfiguration.
const MAX_UNIFORM_CELLS: u64 = 5_000_000;

/// Shape of the uniform fallback grid.
///
/// Trackers are laid out west to east, each tracker holding `rows x cols`
/// panels. Row 1 is the northernmost row; `origin` is the world position of
/// the north-west corner of tracker 1.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct UniformGridSpec {
    pub origin: [f64; 2],
    pub trackers: u32,
    pub rows: u32,
    pub cols: u32,
    /// Spacing between adjacent columns within a tracker.
    pub col_gap: f64,
    /// Spacing between adjacent rows.
    pub row_gap: f64,
    /// Extra spacing between neighbouring trackers.
    pub tracker_gap: f64,
}

impl Default for UniformGridSpec {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0],
            trackers: 0,
            rows: 0,
            cols: 0,
            col_gap: 0.0,
            row_gap: 0.0,
            tracker_gap: 0.0,
        }
    }
}

impl UniformGridSpec {
    pub fn n_cells(&self) -> u64 {
        u64::from(self.trackers) * u64::from(self.rows) * u64::from(self.cols)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.origin.iter().all(|v| v.is_finite()) {
            return Err("uniform grid origin must be finite".to_string());
        }
        for (name, gap) in [
            ("col_gap", self.col_gap),
            ("row_gap", self.row_gap),
            ("tracker_gap", self.tracker_gap),
        ] {
            if !gap.is_finite() || gap < 0.0 {
                return Err(format!("uniform grid {} must be finite and >= 0, got {}", name, gap));
            }
        }
        if self.n_cells() > MAX_UNIFORM_CELLS {
            return Err(format!(
                "uniform grid of {} cells exceeds the limit of {}",
                self.n_cells(),
                MAX_UNIFORM_CELLS
            ));
        }
        Ok(())
    }
}

impl PanelLayout {
    /// Generate a uniform grid of `panel_width x panel_height` rectangles.
    pub fn uniform(spec: &UniformGridSpec, panel_width: f64, panel_height: f64) -> Result<Self, String> {
        spec.validate()?;
        if !(panel_width.is_finite() && panel_width > 0.0 && panel_height.is_finite() && panel_height > 0.0) {
            return Err(format!(
                "panel size must be finite and > 0, got {}x{}",
                panel_width, panel_height
            ));
        }

        let col_step = panel_width + spec.col_gap;
        let row_step = panel_height + spec.row_gap;
        let tracker_step = f64::from(spec.cols) * col_step - spec.col_gap + spec.tracker_gap;

        let mut cells = Vec::with_capacity(spec.n_cells() as usize);
        for tracker in 1..=spec.trackers {
            let x_tracker = spec.origin[0] + f64::from(tracker - 1) * tracker_step;
            for row in 1..=spec.rows {
                let y0 = spec.origin[1] - f64::from(row - 1) * row_step;
                for col in 1..=spec.cols {
                    let x0 = x_tracker + f64::from(col - 1) * col_step;
                    cells.push(PanelGridCell::rectangle(
                        PanelKey::new(tracker, row, col),
                        [x0, y0],
                        panel_width,
                        panel_height,
                    )?);
                }
            }
        }
        Self::from_cells("uniform", LayoutSource::Uniform, cells)
    }
}
