// Reporting projection - map-ready GeoJSON and the location report
//
// Everything here is a read-only projection of engine snapshots. GeoJSON
// coordinates are [lon, lat].

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cell::CellMeasurement;
use crate::constants::{HEATMAP_PRECISION_SCALE, REPORT_PRECISION_SAMPLE};
use crate::directory::CoordinateDirectory;
use crate::error::ReportError;
use crate::estimators::{LocationEstimate, Method};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    LineString { coordinates: Vec<[f64; 2]> },
}

impl Geometry {
    pub fn point(latitude: f64, longitude: f64) -> Self {
        Geometry::Point {
            coordinates: [longitude, latitude],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

/// One point per estimate; intensity fades to 0 at precision 10.
pub fn heatmap(estimates: &[LocationEstimate]) -> FeatureCollection {
    let features = estimates
        .iter()
        .map(|e| Feature {
            geometry: Geometry::point(e.latitude, e.longitude),
            properties: json!({
                "precision": e.precision,
                "method": e.method,
                "timestamp": e.produced_at.to_rfc3339(),
                "intensity": (1.0 - e.precision / HEATMAP_PRECISION_SCALE).max(0.0),
            }),
        })
        .collect();
    FeatureCollection { features }
}

/// One point per cell whose latest measurement has a known tower position.
pub fn cell_map(
    latest: &[CellMeasurement],
    directory: &dyn CoordinateDirectory,
) -> FeatureCollection {
    let features = latest
        .iter()
        .filter_map(|m| {
            let coordinate = directory.lookup(&m.key())?;
            Some(Feature {
                geometry: Geometry::point(coordinate.latitude, coordinate.longitude),
                properties: json!({
                    "mcc": m.mcc,
                    "mnc": m.mnc,
                    "lac": m.lac,
                    "cell_id": m.cell_id,
                    "signal_strength": m.signal_strength,
                    "channel_type": m.channel_type,
                }),
            })
        })
        .collect();
    FeatureCollection { features }
}

/// Ordered points of a trajectory, plus a connecting line once there are two.
pub fn trajectory_collection(subject: &str, trajectory: &[LocationEstimate]) -> FeatureCollection {
    let mut features: Vec<Feature> = trajectory
        .iter()
        .enumerate()
        .map(|(order, e)| Feature {
            geometry: Geometry::point(e.latitude, e.longitude),
            properties: json!({
                "timestamp": e.produced_at.to_rfc3339(),
                "precision": e.precision,
                "order": order,
            }),
        })
        .collect();

    if trajectory.len() > 1 {
        let coordinates: Vec<[f64; 2]> = trajectory
            .iter()
            .map(|e| [e.longitude, e.latitude])
            .collect();
        features.push(Feature {
            properties: json!({
                "subject": subject,
                "points": coordinates.len(),
            }),
            geometry: Geometry::LineString { coordinates },
        });
    }

    FeatureCollection { features }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStatistics {
    pub total_estimates: usize,
    pub estimates_today: usize,
    /// Mean precision over the most recent estimates, 0 when there are none
    pub mean_precision: f64,
    pub methods: BTreeMap<Method, usize>,
}

impl LocationStatistics {
    /// `recent` is oldest first; `today` selects the estimates_today count.
    pub fn new(
        total_estimates: usize,
        recent: &[LocationEstimate],
        methods: BTreeMap<Method, usize>,
        today: NaiveDate,
    ) -> Self {
        let estimates_today = recent
            .iter()
            .filter(|e| e.produced_at.date_naive() == today)
            .count();

        let sample = &recent[recent.len().saturating_sub(REPORT_PRECISION_SAMPLE)..];
        let mean_precision = if sample.is_empty() {
            0.0
        } else {
            sample.iter().map(|e| e.precision).sum::<f64>() / sample.len() as f64
        };

        LocationStatistics {
            total_estimates,
            estimates_today,
            mean_precision,
            methods,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReport {
    pub statistics: LocationStatistics,
    pub heatmap: FeatureCollection,
    pub cell_map: FeatureCollection,
    /// Subject -> trajectory length
    pub active_subjects: BTreeMap<String, usize>,
}

/// Write the report as pretty JSON; a temporary file is renamed into place.
pub fn write_report(path: impl AsRef<Path>, report: &LocationReport) -> Result<(), ReportError> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(report)?;

    let tmp = path.with_extension("tmp");
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
