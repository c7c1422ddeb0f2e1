// Weighted centroid of tower positions
//
// Fallback that cannot fail to converge: signal strengths are used directly as
// weights, or uniform weights when they do not sum to a positive value.

use chrono::{DateTime, Utc};

use super::{finish, LocationEstimate, Method, ResolvedCell};

/// Weights normalized to sum 1. Uniform unless the raw total is positive.
fn normalized_weights(raw: &[f64]) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 && total.is_finite() {
        raw.iter().map(|w| w / total).collect()
    } else {
        let n = raw.len() as f64;
        vec![1.0 / n; raw.len()]
    }
}

/// Signal-weighted centroid; precision is the weighted standard distance in degrees.
pub fn weighted_centroid(cells: &[ResolvedCell], now: DateTime<Utc>) -> Option<LocationEstimate> {
    if cells.len() < 2 {
        return None;
    }

    let raw: Vec<f64> = cells.iter().map(|c| c.signal()).collect();
    let weights = normalized_weights(&raw);

    let (lat, lon) = cells.iter().zip(&weights).fold((0.0, 0.0), |(lat, lon), (c, w)| {
        (lat + w * c.coordinate.latitude, lon + w * c.coordinate.longitude)
    });

    let (var_lat, var_lon) = cells.iter().zip(&weights).fold((0.0, 0.0), |(vl, vo), (c, w)| {
        let dlat = c.coordinate.latitude - lat;
        let dlon = c.coordinate.longitude - lon;
        (vl + w * dlat * dlat, vo + w * dlon * dlon)
    });
    // Mixed-sign weights can push the sum slightly negative
    let precision = (var_lat + var_lon).max(0.0).sqrt();

    finish(
        lat,
        lon,
        precision,
        Method::Centroid,
        cells.iter().map(|c| c.measurement.clone()).collect(),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_normalized_weights() {
        let w = normalized_weights(&[1.0, 3.0]);
        assert!((w[0] - 0.25).abs() < 1e-12);
        assert!((w[1] - 0.75).abs() < 1e-12);

        // dBm values sum negative: uniform
        let w = normalized_weights(&[-60.0, -90.0, -75.0]);
        assert!(w.iter().all(|&x| (x - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_centroid_inside_bounding_box() {
        let sets = [
            vec![cell("200", 10, 40.0, -3.0), cell("201", 30, 41.0, -2.0)],
            vec![
                cell("200", 5, 10.0, 20.0),
                cell("201", 50, 10.5, 20.2),
                cell("202", 17, 9.8, 19.1),
                cell("203", 1, 10.1, 21.0),
            ],
            vec![cell("200", 80, -33.9, 18.4), cell("201", 2, -33.8, 18.5), cell("202", 40, -34.0, 18.3)],
        ];

        for cells in &sets {
            let estimate = weighted_centroid(cells, t0()).unwrap();
            let min_lat = cells.iter().map(|c| c.coordinate.latitude).fold(f64::INFINITY, f64::min);
            let max_lat = cells.iter().map(|c| c.coordinate.latitude).fold(f64::NEG_INFINITY, f64::max);
            let min_lon = cells.iter().map(|c| c.coordinate.longitude).fold(f64::INFINITY, f64::min);
            let max_lon = cells.iter().map(|c| c.coordinate.longitude).fold(f64::NEG_INFINITY, f64::max);

            assert!(estimate.latitude >= min_lat - 1e-12 && estimate.latitude <= max_lat + 1e-12);
            assert!(estimate.longitude >= min_lon - 1e-12 && estimate.longitude <= max_lon + 1e-12);
            assert!(estimate.precision >= 0.0);
            assert_eq!(estimate.method, Method::Centroid);
        }
    }

    #[test]
    fn test_centroid_weighting() {
        // Weights 0.25 / 0.75
        let cells = [cell("200", 10, 0.0, 0.0), cell("201", 30, 4.0, 8.0)];
        let estimate = weighted_centroid(&cells, t0()).unwrap();
        assert!((estimate.latitude - 3.0).abs() < 1e-12);
        assert!((estimate.longitude - 6.0).abs() < 1e-12);

        // var_lat = 0.25*9 + 0.75*1 = 3, var_lon = 0.25*36 + 0.75*4 = 12
        assert!((estimate.precision - 15.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_negative_signals_use_equal_weights() {
        let cells = [cell("200", -60, 0.0, 0.0), cell("201", -90, 2.0, 2.0)];
        let estimate = weighted_centroid(&cells, t0()).unwrap();
        assert!((estimate.latitude - 1.0).abs() < 1e-12);
        assert!((estimate.longitude - 1.0).abs() < 1e-12);
        assert!((estimate.precision - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_needs_two_cells() {
        assert!(weighted_centroid(&[cell("200", 10, 0.0, 0.0)], t0()).is_none());
    }
}
