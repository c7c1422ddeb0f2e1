// Position estimators
//
// Each estimator is a pure function from resolved (measurement, tower) pairs
// to an optional LocationEstimate. A failed optimizer or a degenerate input
// yields None; nothing here returns an error.

pub mod centroid;
pub mod rssi;
pub mod toa;
pub mod two_cell;

use std::fmt;

use chrono::{DateTime, Utc};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cell::{CellCoordinate, CellMeasurement};
use crate::combiner;
use crate::constants::{MIN_WINDOW_FOR_ESTIMATE, MIN_WINDOW_FOR_MULTILATERATION};
use crate::directory::CoordinateDirectory;
use crate::geodesy;

pub use centroid::weighted_centroid;
pub use rssi::rssi_multilateration;
pub use toa::toa_multilateration;
pub use two_cell::two_cell_fallback;

/// Estimation method that produced a LocationEstimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Rssi,
    Toa,
    Centroid,
    TwoCell,
    Combined,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Rssi => "RSSI",
            Method::Toa => "TOA",
            Method::Centroid => "CENTROID",
            Method::TwoCell => "TWO_CELL",
            Method::Combined => "COMBINED",
        };
        f.write_str(name)
    }
}

/// Result of one estimation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEstimate {
    pub latitude: f64,
    pub longitude: f64,
    /// Lower is better. Units depend on the method; only compared as weights.
    pub precision: f64,
    pub method: Method,
    /// Never empty
    pub measurements_used: Vec<CellMeasurement>,
    pub produced_at: DateTime<Utc>,
}

/// A measurement whose cell has a known tower position
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCell {
    pub measurement: CellMeasurement,
    pub coordinate: CellCoordinate,
}

impl ResolvedCell {
    fn signal(&self) -> f64 {
        self.measurement.signal_strength as f64
    }
}

/// Pair each measurement with its tower position, dropping unknown cells.
pub fn resolve(
    measurements: &[CellMeasurement],
    directory: &dyn CoordinateDirectory,
) -> Vec<ResolvedCell> {
    measurements
        .iter()
        .filter_map(|m| {
            directory.lookup(&m.key()).map(|coordinate| ResolvedCell {
                measurement: m.clone(),
                coordinate,
            })
        })
        .collect()
}

/// Run the applicable estimators over a subject's measurements.
///
/// Fewer than 3 measurements only get the two-cell fallback. Otherwise RSSI,
/// TOA and centroid run against the resolved cells and every success is
/// combined into one COMBINED estimate. Longitude is wrapped into
/// [-180, 180) once, on the final estimate.
pub fn triangulate(
    measurements: &[CellMeasurement],
    directory: &dyn CoordinateDirectory,
    now: DateTime<Utc>,
) -> Option<LocationEstimate> {
    if measurements.len() < MIN_WINDOW_FOR_ESTIMATE {
        return None;
    }

    let resolved = resolve(measurements, directory);
    let estimate = if measurements.len() < MIN_WINDOW_FOR_MULTILATERATION {
        two_cell_fallback(&resolved, now)
    } else {
        multilaterate(measurements.len(), &resolved, now)
    };

    estimate.map(|mut e| {
        e.longitude = geodesy::normalize_longitude(e.longitude);
        e
    })
}

fn multilaterate(
    window_len: usize,
    resolved: &[ResolvedCell],
    now: DateTime<Utc>,
) -> Option<LocationEstimate> {
    if resolved.len() < 2 {
        debug!(
            measurements = window_len,
            resolved = resolved.len(),
            "Not enough known towers to triangulate"
        );
        return None;
    }

    let results: Vec<LocationEstimate> = [
        rssi_multilateration(resolved, now),
        toa_multilateration(resolved, now),
        weighted_centroid(resolved, now),
    ]
    .into_iter()
    .flatten()
    .collect();

    combiner::combine(&results, now)
}

/// Arithmetic mean of tower positions as (lat, lon)
fn mean_position(cells: &[ResolvedCell]) -> Vector2<f64> {
    let n = cells.len() as f64;
    let (lat_sum, lon_sum) = cells.iter().fold((0.0, 0.0), |(lat, lon), c| {
        (lat + c.coordinate.latitude, lon + c.coordinate.longitude)
    });
    Vector2::new(lat_sum / n, lon_sum / n)
}

/// Build the estimate if the numbers are usable. Longitude is left unwrapped.
fn finish(
    latitude: f64,
    longitude: f64,
    precision: f64,
    method: Method,
    measurements_used: Vec<CellMeasurement>,
    now: DateTime<Utc>,
) -> Option<LocationEstimate> {
    if !geodesy::is_valid_position(latitude, longitude) {
        debug!(%method, latitude, longitude, "Estimate outside the globe, discarded");
        return None;
    }
    if !precision.is_finite() || precision < 0.0 || measurements_used.is_empty() {
        debug!(%method, precision, "Estimate with unusable precision, discarded");
        return None;
    }
    Some(LocationEstimate {
        latitude,
        longitude,
        precision,
        method,
        measurements_used,
        produced_at: now,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cell::CellKey;
    use chrono::TimeZone;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub fn cell(id: &str, signal: i32, lat: f64, lon: f64) -> ResolvedCell {
        ResolvedCell {
            measurement: CellMeasurement::new(&CellKey::new("214", "07", "100", id), signal, t0()),
            coordinate: CellCoordinate::new(lat, lon),
        }
    }

    /// Point `distance_km` from (lat, lon) along `bearing_deg` on the sphere
    pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_km: f64) -> (f64, f64) {
        let delta = distance_km / crate::constants::EARTH_RADIUS_KM;
        let theta = bearing_deg.to_radians();
        let phi1 = lat.to_radians();
        let lambda1 = lon.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());
        (phi2.to_degrees(), lambda2.to_degrees())
    }
}
