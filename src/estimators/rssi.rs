// Signal-strength multilateration
//
// Log-distance path-loss model: expected = ref - 10 * n * log10(d_m), n = 3.0,
// with d floored at 1 m. The candidate position minimizing the summed absolute
// signal disagreement is searched inside initial guess +/- 0.1 degrees.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{finish, mean_position, LocationEstimate, Method, ResolvedCell};
use crate::constants::{MIN_PATH_DISTANCE_M, PATH_LOSS_EXPONENT, RSSI_SEARCH_HALF_WIDTH_DEG};
use crate::geodesy::distance_km;
use crate::solver::{self, Bounds};

/// Expected received signal at `distance_km` for a reference level.
pub fn expected_signal(distance_km: f64, reference: f64) -> f64 {
    let distance_m = (distance_km * 1000.0).max(MIN_PATH_DISTANCE_M);
    reference - 10.0 * PATH_LOSS_EXPONENT * distance_m.log10()
}

/// Summed |expected - observed| over all cells for a candidate position.
fn signal_disagreement(cells: &[ResolvedCell], lat: f64, lon: f64) -> f64 {
    cells
        .iter()
        .map(|c| {
            let d = distance_km(lat, lon, c.coordinate.latitude, c.coordinate.longitude);
            let observed = c.signal();
            (expected_signal(d, observed) - observed).abs()
        })
        .sum()
}

/// RSSI multilateration; precision is the objective value at the optimum.
pub fn rssi_multilateration(
    cells: &[ResolvedCell],
    now: DateTime<Utc>,
) -> Option<LocationEstimate> {
    if cells.len() < 2 {
        return None;
    }

    let initial_guess = mean_position(cells);
    let bounds = Bounds::around(initial_guess, RSSI_SEARCH_HALF_WIDTH_DEG);

    match solver::minimize(
        |lat, lon| signal_disagreement(cells, lat, lon),
        initial_guess,
        Some(bounds),
    ) {
        Ok(minimum) => finish(
            minimum.x[0],
            minimum.x[1],
            minimum.value,
            Method::Rssi,
            cells.iter().map(|c| c.measurement.clone()).collect(),
            now,
        ),
        Err(e) => {
            debug!(error = %e, cells = cells.len(), "RSSI multilateration failed");
            None
        }
    }
}
