// Two-cell interpolation
//
// Used while a subject has fewer than three measurements. The position is
// pulled towards the stronger of the first two resolved cells; precision is
// half the tower separation in km.

use chrono::{DateTime, Utc};

use super::{finish, LocationEstimate, Method, ResolvedCell};
use crate::constants::TWO_CELL_PRECISION_FACTOR;
use crate::geodesy::distance_km;

/// dBm to linear power (mW)
fn linear_power(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Interpolate between the first two resolved cells by relative received power.
pub fn two_cell_fallback(cells: &[ResolvedCell], now: DateTime<Utc>) -> Option<LocationEstimate> {
    let (a, b) = match cells {
        [a, b, ..] => (a, b),
        _ => return None,
    };

    let power_a = linear_power(a.signal());
    let power_b = linear_power(b.signal());
    let total = power_a + power_b;
    let (weight_a, weight_b) = if total > 0.0 && total.is_finite() {
        (power_a / total, power_b / total)
    } else {
        (0.5, 0.5)
    };

    let lat = a.coordinate.latitude * weight_a + b.coordinate.latitude * weight_b;
    let lon = a.coordinate.longitude * weight_a + b.coordinate.longitude * weight_b;

    let separation = distance_km(
        a.coordinate.latitude,
        a.coordinate.longitude,
        b.coordinate.latitude,
        b.coordinate.longitude,
    );

    finish(
        lat,
        lon,
        separation * TWO_CELL_PRECISION_FACTOR,
        Method::TwoCell,
        vec![a.measurement.clone(), b.measurement.clone()],
        now,
    )
}
