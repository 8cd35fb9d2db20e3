//! Spherical Earth helpers used for GPS matching.

/// IUGG mean Earth radius in meters.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// WGS84 geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Latitude in [-90, 90] and longitude in [-180, 180].
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Great-circle distance in meters (haversine formula).
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let s_phi = (dphi * 0.5).sin();
    let s_lambda = (dlambda * 0.5).sin();
    let h = s_phi * s_phi + phi1.cos() * phi2.cos() * s_lambda * s_lambda;
    2.0 * EARTH_MEAN_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Position on the unit sphere.
pub(crate) fn unit_vector(p: LatLon) -> [f64; 3] {
    let (sin_lat, cos_lat) = p.lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = p.lon.to_radians().sin_cos();
    [cos_lat * cos_lon, cos_lat * sin_lon, sin_lat]
}

/// Unit-sphere chord length subtended by a great-circle distance.
///
/// Monotonic in `distance_m` up to half the circumference, after which it
/// saturates at the diameter (2).
pub(crate) fn chord_for_distance_m(distance_m: f64) -> f64 {
    let half_angle = (distance_m / EARTH_MEAN_RADIUS_M * 0.5).min(std::f64::consts::FRAC_PI_2);
    2.0 * half_angle.sin()
}
