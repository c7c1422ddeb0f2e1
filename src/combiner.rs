// Precision-weighted combination of estimator outputs

use chrono::{DateTime, Utc};

use crate::constants::PRECISION_WEIGHT_EPSILON;
use crate::estimators::{LocationEstimate, Method};

/// Merge estimates into one COMBINED estimate.
///
/// Each input is weighted by `1 / (precision + 0.001)`. Position and
/// precision are the weighted means; the measurement lists are concatenated
/// as-is. A single input is relabelled COMBINED. Returns None for no input.
pub fn combine(estimates: &[LocationEstimate], now: DateTime<Utc>) -> Option<LocationEstimate> {
    if estimates.is_empty() {
        return None;
    }

    let raw: Vec<f64> = estimates
        .iter()
        .map(|e| 1.0 / (e.precision + PRECISION_WEIGHT_EPSILON))
        .collect();
    let total: f64 = raw.iter().sum();

    let mut latitude = 0.0;
    let mut longitude = 0.0;
    let mut precision = 0.0;
    for (e, w) in estimates.iter().zip(&raw) {
        let w = w / total;
        latitude += w * e.latitude;
        longitude += w * e.longitude;
        precision += w * e.precision;
    }

    let measurements_used = estimates
        .iter()
        .flat_map(|e| e.measurements_used.iter().cloned())
        .collect();

    Some(LocationEstimate {
        latitude,
        longitude,
        precision,
        method: Method::Combined,
        measurements_used,
        produced_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellKey, CellMeasurement};
    use crate::geodesy::distance_km;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn estimate(lat: f64, lon: f64, precision: f64, method: Method, cell: &str) -> LocationEstimate {
        LocationEstimate {
            latitude: lat,
            longitude: lon,
            precision,
            method,
            measurements_used: vec![CellMeasurement::new(&CellKey::new("214", "07", "100", cell), -70, t0())],
            produced_at: t0(),
        }
    }

    #[test]
    fn test_combine_favours_precise_estimate() {
        let coarse = estimate(40.0, -3.0, 1.0, Method::Centroid, "200");
        let sharp = estimate(40.1, -3.1, 0.001, Method::Rssi, "201");

        let combined = combine(&[coarse, sharp], t0()).unwrap();

        let to_sharp = distance_km(combined.latitude, combined.longitude, 40.1, -3.1);
        let to_coarse = distance_km(combined.latitude, combined.longitude, 40.0, -3.0);
        // Weight ratio (1/0.002) : (1/1.001) ~ 500 : 1
        assert!(to_coarse / to_sharp > 100.0, "to_sharp={} to_coarse={}", to_sharp, to_coarse);

        let w_coarse = 1.0 / 1.001;
        let w_sharp = 1.0 / 0.002;
        let expected_lat = (40.0 * w_coarse + 40.1 * w_sharp) / (w_coarse + w_sharp);
        assert!((combined.latitude - expected_lat).abs() < 1e-9);
    }

    #[test]
    fn test_combine_precision_is_weighted_mean() {
        let a = estimate(0.0, 0.0, 1.0, Method::Rssi, "200");
        let b = estimate(0.0, 0.0, 3.0, Method::Toa, "201");
        let combined = combine(&[a, b], t0()).unwrap();

        let wa = 1.0 / 1.001;
        let wb = 1.0 / 3.001;
        let expected = (1.0 * wa + 3.0 * wb) / (wa + wb);
        assert!((combined.precision - expected).abs() < 1e-12);
    }

    #[test]
    fn test_combine_single_input_relabels() {
        let only = estimate(10.0, 20.0, 0.0, Method::Centroid, "200");
        let combined = combine(std::slice::from_ref(&only), t0()).unwrap();

        assert_eq!(combined.method, Method::Combined);
        assert!((combined.latitude - 10.0).abs() < 1e-12);
        assert!((combined.longitude - 20.0).abs() < 1e-12);
        assert_eq!(combined.precision, 0.0);
        assert_eq!(combined.measurements_used, only.measurements_used);
    }

    #[test]
    fn test_combine_concatenates_measurements() {
        let a = estimate(0.0, 0.0, 1.0, Method::Rssi, "200");
        let b = estimate(0.0, 0.0, 1.0, Method::Centroid, "200");
        let combined = combine(&[a, b], t0()).unwrap();
        // Duplicates are kept
        assert_eq!(combined.measurements_used.len(), 2);
        assert_eq!(combined.measurements_used[0], combined.measurements_used[1]);
    }

    #[test]
    fn test_combine_empty() {
        assert!(combine(&[], t0()).is_none());
    }
}
