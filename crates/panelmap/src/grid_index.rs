//! Bucketed nearest-panel lookup over a [`PanelLayout`].
//!
//! Cell centroids are hashed into square buckets of side `pitch`. A query
//! visits buckets in Chebyshev rings around the query bucket and stops as soon
//! as the next ring cannot hold anything closer than the current best (or than
//! `max_distance`). Ring `r` is at least `(r - 1) * pitch` away from any point
//! in the query bucket.
//!
//! Distances are measured in a metric frame: world coordinates are scaled by
//! a per-axis meters-per-unit factor before bucketing. Projected layouts use
//! a unit scale; geographic layouts use the local scale at the layout centre.

use std::collections::HashMap;

use crate::layout::{PanelGridCell, PanelLayout};

/// Bucket coordinates are clamped to this magnitude to stay clear of integer
/// overflow for far-away query points.
const MAX_BUCKET_COORD: f64 = (1u64 << 40) as f64;

type BucketKey = (i64, i64);

/// Nearest cell result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellHit<'a> {
    pub cell: &'a PanelGridCell,
    /// Distance in meters from the query point to the cell centroid.
    pub distance: f64,
}

/// Read-only spatial index; owns its layout.
#[derive(Debug, Clone)]
pub struct PanelGridIndex {
    layout: PanelLayout,
    pitch: f64,
    scale: [f64; 2],
    buckets: HashMap<BucketKey, Vec<usize>>,
    bucket_min: BucketKey,
    bucket_max: BucketKey,
}

impl PanelGridIndex {
    /// Index a layout whose world units are meters, with square buckets of
    /// side `pitch`.
    pub fn build(layout: PanelLayout, pitch: f64) -> Result<Self, String> {
        Self::build_scaled(layout, pitch, [1.0, 1.0])
    }

    /// Index `layout` after scaling world `[x, y]` by `scale` meters per
    /// unit. `pitch` is the bucket side in meters.
    pub fn build_scaled(layout: PanelLayout, pitch: f64, scale: [f64; 2]) -> Result<Self, String> {
        if !pitch.is_finite() || pitch <= 0.0 {
            return Err(format!("grid pitch must be finite and > 0, got {}", pitch));
        }
        if scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!(
                "metric scale must be finite and > 0, got [{}, {}]",
                scale[0], scale[1]
            ));
        }

        let mut buckets: HashMap<BucketKey, Vec<usize>> = HashMap::new();
        let mut bucket_min = (i64::MAX, i64::MAX);
        let mut bucket_max = (i64::MIN, i64::MIN);
        for (idx, cell) in layout.cells().iter().enumerate() {
            let key = bucket_of(scaled(cell.centroid, scale), pitch);
            bucket_min = (bucket_min.0.min(key.0), bucket_min.1.min(key.1));
            bucket_max = (bucket_max.0.max(key.0), bucket_max.1.max(key.1));
            // Cells are visited in key order, so bucket lists stay sorted.
            buckets.entry(key).or_default().push(idx);
        }

        tracing::debug!(
            cells = layout.n_cells(),
            buckets = buckets.len(),
            pitch,
            scale_x = scale[0],
            scale_y = scale[1],
            "built panel grid index"
        );

        Ok(Self {
            layout,
            pitch,
            scale,
            buckets,
            bucket_min,
            bucket_max,
        })
    }

    pub fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    /// Bucket side in meters.
    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    /// Meters per world unit along x and y.
    pub fn scale(&self) -> [f64; 2] {
        self.scale
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Closest cell whose centroid is within `max_distance` meters of the
    /// world point `point`.
    ///
    /// Equidistant cells resolve to the smallest [`PanelKey`](crate::PanelKey).
    pub fn nearest_cell(&self, point: [f64; 2], max_distance: f64) -> Option<CellHit<'_>> {
        if self.buckets.is_empty()
            || !point[0].is_finite()
            || !point[1].is_finite()
            || max_distance.is_nan()
            || max_distance < 0.0
        {
            return None;
        }

        let point = scaled(point, self.scale);
        if !point[0].is_finite() || !point[1].is_finite() {
            return None;
        }
        let (bx, by) = bucket_of(point, self.pitch);
        let (min, max) = (self.bucket_min, self.bucket_max);
        let r_first = (min.0 - bx).max(bx - max.0).max(min.1 - by).max(by - max.1).max(0);
        let r_last = (bx - min.0).max(max.0 - bx).max(by - min.1).max(max.1 - by);

        let cells = self.layout.cells();
        let mut best: Option<(f64, usize)> = None;
        for r in r_first..=r_last {
            let ring_floor = (r - 1).max(0) as f64 * self.pitch;
            if ring_floor > max_distance || best.is_some_and(|(d, _)| ring_floor > d) {
                break;
            }

            self.for_each_in_ring((bx, by), r, |idx| {
                let c = scaled(cells[idx].centroid, self.scale);
                let (dx, dy) = (point[0] - c[0], point[1] - c[1]);
                let d = (dx * dx + dy * dy).sqrt();
                if d > max_distance {
                    return;
                }
                let better = match best {
                    None => true,
                    Some((best_d, best_idx)) => d < best_d || (d == best_d && idx < best_idx),
                };
                if better {
                    best = Some((d, idx));
                }
            });
        }

        best.map(|(distance, idx)| CellHit {
            cell: &cells[idx],
            distance,
        })
    }

    /// Visit cell indices of all occupied buckets at Chebyshev distance `r`
    /// from `center`, clipped to the occupied bucket bounds.
    fn for_each_in_ring(&self, center: BucketKey, r: i64, mut visit: impl FnMut(usize)) {
        let (cx, cy) = center;
        let x_lo = (cx - r).max(self.bucket_min.0);
        let x_hi = (cx + r).min(self.bucket_max.0);
        let y_lo = (cy - r).max(self.bucket_min.1);
        let y_hi = (cy + r).min(self.bucket_max.1);

        let mut visit_bucket = |key: BucketKey| {
            if let Some(list) = self.buckets.get(&key) {
                list.iter().copied().for_each(&mut visit);
            }
        };

        for x in x_lo..=x_hi {
            if (x - cx).abs() == r {
                for y in y_lo..=y_hi {
                    visit_bucket((x, y));
                }
            } else {
                for y in [cy - r, cy + r] {
                    if (y_lo..=y_hi).contains(&y) {
                        visit_bucket((x, y));
                    }
                }
            }
        }
    }
}

fn scaled(p: [f64; 2], scale: [f64; 2]) -> [f64; 2] {
    [p[0] * scale[0], p[1] * scale[1]]
}

fn bucket_of(p: [f64; 2], pitch: f64) -> BucketKey {
    let q = |v: f64| (v / pitch).floor().clamp(-MAX_BUCKET_COORD, MAX_BUCKET_COORD) as i64;
    (q(p[0]), q(p[1]))
}
