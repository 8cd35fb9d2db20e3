//! Coordinate systems: orthophoto pixels, projected world units, and WGS84.

mod affine;
mod crs;
mod sphere;

pub use affine::{CoordinateTransformer, InvalidGeometryError, OrthoGeometry, ROUND_TRIP_EPS};
pub use crs::Crs;
pub use sphere::{haversine_m, LatLon, EARTH_MEAN_RADIUS_M};

pub(crate) use sphere::{chord_for_distance_m, unit_vector};
