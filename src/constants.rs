// Shared constants for the estimation engine

/// Mean Earth radius used by the haversine distance, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Measurements kept per cell key in the measurement history.
pub const HISTORY_CAPACITY: usize = 50;

/// Estimates kept per subject in its trajectory.
pub const TRAJECTORY_CAPACITY: usize = 100;

/// Estimates kept engine-wide for the heatmap and report statistics.
pub const RECENT_ESTIMATES_CAPACITY: usize = 1000;

/// Estimates averaged for the report's mean precision.
pub const REPORT_PRECISION_SAMPLE: usize = 100;

/// Age (seconds) after which a measurement leaves a subject's active window.
pub const ACTIVE_WINDOW_SECS: i64 = 5 * 60;

/// Minimum window size before any estimation is attempted.
pub const MIN_WINDOW_FOR_ESTIMATE: usize = 2;

/// Window size from which the full RSSI/TOA/centroid pipeline runs.
pub const MIN_WINDOW_FOR_MULTILATERATION: usize = 3;

// --- Propagation and timing model ---

/// Log-distance path-loss exponent (urban environment).
pub const PATH_LOSS_EXPONENT: f64 = 3.0;

/// Distance floor (metres) for the log-distance model; avoids log10(0).
pub const MIN_PATH_DISTANCE_M: f64 = 1.0;

/// Half-width (degrees) of the RSSI search box around the initial guess.
pub const RSSI_SEARCH_HALF_WIDTH_DEG: f64 = 0.1;

/// Propagation speed used by the TOA surrogate, km per microsecond scale.
pub const PROPAGATION_SPEED_KM: f64 = 300_000.0;

/// Signal strength to arrival time divisor (dBm per microsecond).
pub const SIGNAL_TO_TIME_DIVISOR: f64 = 100.0;

/// Lower bound for the synthetic arrival time (microseconds).
pub const MIN_ARRIVAL_TIME_US: f64 = 0.001;

// --- Combination ---

/// Additive epsilon in the 1 / (precision + eps) combination weight.
pub const PRECISION_WEIGHT_EPSILON: f64 = 0.001;

/// Two-cell precision is this fraction of the tower separation (km).
pub const TWO_CELL_PRECISION_FACTOR: f64 = 0.5;

/// Heatmap intensity reaches zero at this precision.
pub const HEATMAP_PRECISION_SCALE: f64 = 10.0;

// --- Outputs ---

/// Estimates buffered per output subscriber before it starts lagging.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
