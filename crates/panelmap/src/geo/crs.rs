//! Supported coordinate reference systems and their inverse projections.

use super::affine::InvalidGeometryError;
use super::sphere::{LatLon, EARTH_MEAN_RADIUS_M};

// WGS84 ellipsoid.
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

// Universal Transverse Mercator.
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// World frame of the orthophoto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crs {
    /// EPSG:4326, world `[x, y]` is `[lon, lat]` in degrees.
    Wgs84,
    /// WGS84 / UTM (EPSG:326zz north, EPSG:327zz south), world units are meters.
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// Parse an `EPSG:nnnn` identifier (case-insensitive prefix).
    pub fn parse(id: &str) -> Result<Self, InvalidGeometryError> {
        let unsupported = || InvalidGeometryError::UnsupportedCrs {
            crs: id.to_string(),
        };
        let trimmed = id.trim();
        let code = trimmed
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("epsg:"))
            .map(|_| &trimmed[5..])
            .ok_or_else(unsupported)?;
        let code: u32 = code.trim().parse().map_err(|_| unsupported())?;

        match code {
            4326 => Ok(Self::Wgs84),
            32601..=32660 => Ok(Self::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Self::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => Err(unsupported()),
        }
    }

    /// EPSG code of this CRS.
    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::Utm { zone, north: true } => 32600 + u32::from(zone),
            Self::Utm { zone, north: false } => 32700 + u32::from(zone),
        }
    }

    /// Convert a world point in this CRS to WGS84.
    pub fn to_lat_lon(self, world: [f64; 2]) -> LatLon {
        match self {
            Self::Wgs84 => LatLon::new(world[1], world[0]),
            Self::Utm { zone, north } => utm_to_lat_lon(world[0], world[1], zone, north),
        }
    }
}

impl Crs {
    /// Local meters per world unit along x and y at `world`.
    ///
    /// Projected frames are metric already. For EPSG:4326 this is the
    /// spherical scale at the point's latitude, consistent with
    /// [`haversine_m`](super::haversine_m) over plant-sized extents.
    pub fn meters_per_unit(self, world: [f64; 2]) -> [f64; 2] {
        match self {
            Self::Wgs84 => {
                let m_per_deg = EARTH_MEAN_RADIUS_M.to_radians();
                [m_per_deg * world[1].to_radians().cos(), m_per_deg]
            }
            Self::Utm { .. } => [1.0, 1.0],
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Inverse transverse Mercator (Snyder, "Map Projections: A Working Manual", §8).
fn utm_to_lat_lon(easting: f64, northing: f64, zone: u8, north: bool) -> LatLon {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);

    let x = easting - UTM_FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - UTM_FALSE_NORTHING_SOUTH
    };

    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));

    let sqrt_1me2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = sin_phi1 / cos_phi1;
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = WGS84_A / denom.sqrt();
    let r1 = WGS84_A * (1.0 - e2) / denom.powf(1.5);
    let t1 = tan_phi1 * tan_phi1;
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let d = x / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos_phi1;

    let central_meridian = f64::from(zone) * 6.0 - 183.0;
    LatLon::new(lat.to_degrees(), central_meridian + lon.to_degrees())
}
