// Time-of-arrival multilateration
//
// No real timing advance is available, so an arrival time is synthesized from
// signal strength: t = max(-signal / 100, 0.001) microseconds. Candidate
// positions are scored by summed |distance / 300000 - t| and minimized without
// bounds from the tower mean.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{finish, mean_position, LocationEstimate, Method, ResolvedCell};
use crate::constants::{MIN_ARRIVAL_TIME_US, PROPAGATION_SPEED_KM, SIGNAL_TO_TIME_DIVISOR};
use crate::geodesy::distance_km;
use crate::solver;

/// Synthetic arrival time (µs) for a signal strength.
pub fn arrival_time(signal_strength: f64) -> f64 {
    (-signal_strength / SIGNAL_TO_TIME_DIVISOR).max(MIN_ARRIVAL_TIME_US)
}

pub fn toa_multilateration(cells: &[ResolvedCell], now: DateTime<Utc>) -> Option<LocationEstimate> {
    if cells.len() < 2 {
        return None;
    }

    let arrivals: Vec<(f64, f64, f64)> = cells
        .iter()
        .map(|c| (c.coordinate.latitude, c.coordinate.longitude, arrival_time(c.signal())))
        .collect();

    let objective = |lat: f64, lon: f64| -> f64 {
        arrivals
            .iter()
            .map(|&(tower_lat, tower_lon, time)| {
                let travel = distance_km(lat, lon, tower_lat, tower_lon) / PROPAGATION_SPEED_KM;
                (travel - time).abs()
            })
            .sum()
    };

    match solver::minimize(objective, mean_position(cells), None) {
        Ok(minimum) => finish(
            minimum.x[0],
            minimum.x[1],
            minimum.value,
            Method::Toa,
            cells.iter().map(|c| c.measurement.clone()).collect(),
            now,
        ),
        Err(e) => {
            debug!(error = %e, cells = cells.len(), "TOA multilateration failed");
            None
        }
    }
}
