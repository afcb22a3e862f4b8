pub mod geotransform;
pub mod projection;

use crate::config::WGS84_EPSG;

/// A coordinate pair tagged with the EPSG code of its reference system.
///
/// For geographic systems `x` is longitude and `y` latitude, in degrees.
/// Projected systems (UTM etc.) use the system's own units, usually metres.
///
/// # Example
///
/// ```rust
/// use landsat_ndvi::GeoPoint;
///
/// let p = GeoPoint::lonlat(-122.4, 37.8);
/// assert_eq!(p.lon(), -122.4);
/// assert_eq!(p.epsg, 4326);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
    pub epsg: i32,
}

impl GeoPoint {
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64, epsg: i32) -> Self {
        Self { x, y, epsg }
    }

    /// Longitude/latitude in WGS84 (EPSG:4326).
    #[inline]
    #[must_use]
    pub fn lonlat(lon: f64, lat: f64) -> Self {
        Self::new(lon, lat, WGS84_EPSG)
    }

    #[inline]
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.x
    }

    #[inline]
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.y
    }

    #[inline]
    #[must_use]
    pub fn to_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) EPSG:{}", self.x, self.y, self.epsg)
    }
}
