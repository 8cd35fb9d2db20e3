//! Affine pixel ↔ world mapping for a georeferenced orthophoto.
//!
//! Pixel coordinates seen by this module are in *detection* space: the
//! detector ran on a copy of the orthophoto scaled by `downscale_factor`, so a
//! detection pixel maps to the full-resolution pixel `p / downscale_factor`
//! before the raster affine is applied.

use std::path::Path;

use nalgebra::{Matrix3, Vector3};

use super::crs::Crs;
use super::sphere::LatLon;

/// Maximum round-trip error tolerated by `world_to_pixel(pixel_to_world(p))`.
pub const ROUND_TRIP_EPS: f64 = 1e-6;

/// Relative determinant floor below which a transform counts as singular.
const SINGULAR_DET_REL_EPS: f64 = 1e-12;

/// Errors raised while building a [`CoordinateTransformer`].
///
/// Any of these makes the whole run meaningless and is treated as fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidGeometryError {
    /// One or more affine coefficients are NaN or infinite.
    NonFiniteTransform,
    /// The linear part of the affine has (near-)zero determinant.
    SingularTransform {
        /// Determinant of the 2x2 linear part.
        determinant: f64,
    },
    /// Downscale factor must be finite and strictly positive.
    InvalidDownscale {
        /// Offending factor.
        factor: f64,
    },
    /// The CRS identifier is not one this crate can convert to WGS84.
    UnsupportedCrs {
        /// Identifier as supplied by the orthophoto metadata.
        crs: String,
    },
}

impl std::fmt::Display for InvalidGeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteTransform => write!(f, "affine transform has non-finite coefficients"),
            Self::SingularTransform { determinant } => {
                write!(f, "affine transform is not invertible (det = {:e})", determinant)
            }
            Self::InvalidDownscale { factor } => {
                write!(f, "downscale factor must be finite and > 0, got {}", factor)
            }
            Self::UnsupportedCrs { crs } => write!(f, "unsupported coordinate reference system '{}'", crs),
        }
    }
}

impl std::error::Error for InvalidGeometryError {}

fn default_downscale_factor() -> f64 {
    1.0
}

/// Orthophoto geometry as exposed by the raster metadata reader.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrthoGeometry {
    /// Affine coefficients `[a, b, c, d, e, f]`:
    /// `x = a·col + b·row + c`, `y = d·col + e·row + f` (full-resolution pixels).
    pub transform: [f64; 6],
    /// CRS identifier, e.g. `EPSG:32721`. Absent means EPSG:4326.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    /// Scale applied to the orthophoto before detection ran.
    #[serde(default = "default_downscale_factor")]
    pub downscale_factor: f64,
    /// Full-resolution raster width in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Full-resolution raster height in pixels, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl OrthoGeometry {
    /// Load orthophoto geometry from a JSON document.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Single source of truth for pixel/world/geographic conversions.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
    downscale_factor: f64,
    crs: Crs,
}

impl CoordinateTransformer {
    /// Build from rasterio-ordered affine coefficients.
    pub fn new(
        transform: [f64; 6],
        downscale_factor: f64,
        crs: Crs,
    ) -> Result<Self, InvalidGeometryError> {
        if transform.iter().any(|v| !v.is_finite()) {
            return Err(InvalidGeometryError::NonFiniteTransform);
        }
        if !downscale_factor.is_finite() || downscale_factor <= 0.0 {
            return Err(InvalidGeometryError::InvalidDownscale {
                factor: downscale_factor,
            });
        }

        let [a, b, c, d, e, f] = transform;
        let determinant = a * e - b * d;
        let scale = a.abs().max(b.abs()).max(d.abs()).max(e.abs());
        if scale == 0.0 || determinant.abs() <= SINGULAR_DET_REL_EPS * scale * scale {
            return Err(InvalidGeometryError::SingularTransform { determinant });
        }

        let forward = Matrix3::new(a, b, c, d, e, f, 0.0, 0.0, 1.0);
        let inverse = forward
            .try_inverse()
            .ok_or(InvalidGeometryError::SingularTransform { determinant })?;

        Ok(Self {
            forward,
            inverse,
            downscale_factor,
            crs,
        })
    }

    /// Build from an [`OrthoGeometry`] document, parsing its CRS identifier.
    pub fn from_geometry(geometry: &OrthoGeometry) -> Result<Self, InvalidGeometryError> {
        let crs = match geometry.crs.as_deref() {
            Some(id) => Crs::parse(id)?,
            None => Crs::Wgs84,
        };
        Self::new(geometry.transform, geometry.downscale_factor, crs)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn downscale_factor(&self) -> f64 {
        self.downscale_factor
    }

    /// Map a detection-space pixel `(row, col)` to world `[x, y]`.
    pub fn pixel_to_world(&self, row: f64, col: f64) -> [f64; 2] {
        let p = Vector3::new(col / self.downscale_factor, row / self.downscale_factor, 1.0);
        let w = self.forward * p;
        [w[0], w[1]]
    }

    /// Map world `[x, y]` back to a detection-space pixel `[row, col]`.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> [f64; 2] {
        let p = self.inverse * Vector3::new(x, y, 1.0);
        [p[1] * self.downscale_factor, p[0] * self.downscale_factor]
    }

    /// Convert a world point to WGS84 latitude/longitude.
    pub fn world_to_lat_lon(&self, world: [f64; 2]) -> LatLon {
        self.crs.to_lat_lon(world)
    }

    /// Convenience: detection pixel straight to WGS84.
    pub fn pixel_to_lat_lon(&self, row: f64, col: f64) -> LatLon {
        self.world_to_lat_lon(self.pixel_to_world(row, col))
    }

    /// Local meters per world unit along x and y at `world`.
    pub fn meters_per_world_unit(&self, world: [f64; 2]) -> [f64; 2] {
        self.crs.meters_per_unit(world)
    }

    /// Approximate world units covered by one detection pixel (geometric mean).
    pub fn world_units_per_pixel(&self) -> f64 {
        let det = self.forward[(0, 0)] * self.forward[(1, 1)]
            - self.forward[(0, 1)] * self.forward[(1, 0)];
        det.abs().sqrt() / self.downscale_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn utm_like() -> CoordinateTransformer {
        // 5 cm ground sampling, north-up, UTM-sized offsets.
        CoordinateTransformer::new(
            [0.05, 0.0, 745_210.25, 0.0, -0.05, 7_733_118.5],
            0.25,
            Crs::Utm {
                zone: 21,
                north: false,
            },
        )
        .expect("valid transform")
    }

    #[test]
    fn pixel_to_world_applies_downscale_then_affine() {
        let t = utm_like();
        let w = t.pixel_to_world(100.0, 40.0);
        // col 40 / 0.25 = 160 full-res px -> 8 m east; row 400 -> 20 m south.
        assert_abs_diff_eq!(w[0], 745_218.25, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 7_733_098.5, epsilon = 1e-6);
    }

    #[test]
    fn rotated_transform_round_trips() {
        let t = CoordinateTransformer::new([0.3, 0.1, 10.0, -0.2, 0.4, -5.0], 0.5, Crs::Wgs84)
            .expect("valid");
        let w = t.pixel_to_world(12.5, -3.25);
        let p = t.world_to_pixel(w[0], w[1]);
        assert_abs_diff_eq!(p[0], 12.5, epsilon = ROUND_TRIP_EPS);
        assert_abs_diff_eq!(p[1], -3.25, epsilon = ROUND_TRIP_EPS);
    }

    #[test]
    fn singular_transform_is_rejected() {
        let err = CoordinateTransformer::new([1.0, 2.0, 0.0, 2.0, 4.0, 0.0], 1.0, Crs::Wgs84)
            .expect_err("rank-deficient");
        assert!(matches!(err, InvalidGeometryError::SingularTransform { .. }));

        let err = CoordinateTransformer::new([0.0; 6], 1.0, Crs::Wgs84).expect_err("zero");
        assert!(matches!(err, InvalidGeometryError::SingularTransform { .. }));
    }

    #[test]
    fn near_singular_transform_is_rejected() {
        let err = CoordinateTransformer::new([1.0, 1.0, 0.0, 1.0, 1.0 + 1e-14, 0.0], 1.0, Crs::Wgs84)
            .expect_err("near singular");
        assert!(matches!(err, InvalidGeometryError::SingularTransform { .. }));
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        let err = CoordinateTransformer::new([f64::NAN, 0.0, 0.0, 0.0, 1.0, 0.0], 1.0, Crs::Wgs84)
            .expect_err("nan");
        assert_eq!(err, InvalidGeometryError::NonFiniteTransform);

        let err = CoordinateTransformer::new([1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 0.0, Crs::Wgs84)
            .expect_err("zero downscale");
        assert!(matches!(err, InvalidGeometryError::InvalidDownscale { .. }));
    }

    #[test]
    fn geometry_document_parses_crs() {
        let raw = r#"{"transform":[0.05,0.0,745000.0,0.0,-0.05,7733000.0],"crs":"EPSG:32721","downscale_factor":0.25}"#;
        let geometry: OrthoGeometry = serde_json::from_str(raw).expect("valid json");
        let t = CoordinateTransformer::from_geometry(&geometry).expect("valid");
        assert_eq!(
            t.crs(),
            Crs::Utm {
                zone: 21,
                north: false
            }
        );
        assert_abs_diff_eq!(t.world_units_per_pixel(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn geometry_document_without_crs_is_wgs84() {
        let raw = r#"{"transform":[1e-6,0.0,-54.6,0.0,-1e-6,-20.4]}"#;
        let geometry: OrthoGeometry = serde_json::from_str(raw).expect("valid json");
        assert_eq!(geometry.downscale_factor, 1.0);
        let t = CoordinateTransformer::from_geometry(&geometry).expect("valid");
        assert_eq!(t.crs(), Crs::Wgs84);
    }

    #[test]
    fn unknown_crs_is_rejected() {
        let geometry = OrthoGeometry {
            transform: [1.0, 0.0, 0.0, 0.0, -1.0, 0.0],
            crs: Some("EPSG:3857".to_string()),
            downscale_factor: 1.0,
            width: None,
            height: None,
        };
        let err = CoordinateTransformer::from_geometry(&geometry).expect_err("unsupported");
        assert!(matches!(err, InvalidGeometryError::UnsupportedCrs { .. }));
    }

    proptest! {
        #[test]
        fn world_to_pixel_inverts_pixel_to_world(
            row in -5_000.0f64..20_000.0,
            col in -5_000.0f64..20_000.0,
        ) {
            let t = utm_like();
            let w = t.pixel_to_world(row, col);
            let p = t.world_to_pixel(w[0], w[1]);
            prop_assert!((p[0] - row).abs() <= ROUND_TRIP_EPS);
            prop_assert!((p[1] - col).abs() <= ROUND_TRIP_EPS);
        }
    }
}
