// Error types for the estimation engine
//
// Absence (unknown tower, too few measurements, optimizer non-convergence) is
// never an error here; these enums cover caller mistakes and I/O only.

use std::path::PathBuf;

/// A measurement rejected at ingestion. Engine state is untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("subject key must not be empty")]
    EmptySubject,

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Failure loading or building the tower coordinate database.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read cell database {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cell database: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cell key {0:?} (expected mcc-mnc-lac-cid)")]
    InvalidKey(String),

    #[error("invalid coordinate for cell {key}: lat={lat}, lon={lon}")]
    InvalidCoordinate { key: String, lat: f64, lon: f64 },
}

/// Numerical optimizer failure. Estimators turn this into absence.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    #[error("objective is not finite at ({lat}, {lon})")]
    NonFinite { lat: f64, lon: f64 },

    #[error("no convergence after {0} iterations")]
    MaxIterations(usize),

    #[error("initial guess lies outside the search bounds")]
    InfeasibleStart,
}

/// Failure writing a location report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_message() {
        let err = IngestError::InvalidField {
            field: "mcc",
            value: "21".to_string(),
            reason: "expected 3 decimal digits",
        };
        assert_eq!(err.to_string(), "invalid mcc \"21\": expected 3 decimal digits");
    }

    #[test]
    fn test_solver_error_message() {
        assert_eq!(
            SolverError::MaxIterations(500).to_string(),
            "no convergence after 500 iterations"
        );
    }
}
