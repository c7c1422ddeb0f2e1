// Geodesy module - great-circle distances on a spherical Earth
//
// Every estimator measures tower-to-candidate separation through distance_km.
// Coordinates are WGS84 latitude/longitude in degrees.

use std::f64::consts::PI;

use crate::constants::EARTH_RADIUS_KM;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Returns the haversine great-circle distance in kilometres between two points
///
/// **Assumes spherical Earth** (radius 6371 km). The intermediate term is
/// clamped to `[0, 1]` so near-antipodal and coincident points stay finite.
///
/// # Arguments
/// * `lat1`, `lon1` - First point (latitude, longitude) in degrees
/// * `lat2`, `lon2` - Second point (latitude, longitude) in degrees
///
/// # Example
/// ```
/// use cell_locator::geodesy::distance_km;
/// let d = distance_km(51.5074, -0.1278, 48.8566, 2.3522); // London to Paris
/// assert!((d - 344.0).abs() < 5.0);
/// ```
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1) * DTOR;
    let dlon = (lon2 - lon1) * DTOR;

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let a = sin_dlat * sin_dlat
        + (lat1 * DTOR).cos() * (lat2 * DTOR).cos() * sin_dlon * sin_dlon;
    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Wraps a longitude into `[-180, 180)`.
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// True when both values are finite and the latitude lies on the globe.
pub fn is_valid_position(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat)
}
