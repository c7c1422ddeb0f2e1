// Estimation engine - per-subject windows, trajectories and statistics
//
// Subject state is keyed by the subscriber identity and sits behind its own
// lock, reached through a RwLock-guarded map. Ingests for different subjects
// only share the map's read lock, the measurement history's per-cell locks
// and the short statistics critical section.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::cell::{CellKey, CellMeasurement};
use crate::clock::{Clock, SystemClock};
use crate::constants::{
    ACTIVE_WINDOW_SECS, MIN_WINDOW_FOR_ESTIMATE, OUTPUT_CHANNEL_CAPACITY, RECENT_ESTIMATES_CAPACITY,
};
use crate::directory::{CellDatabase, CoordinateDirectory};
use crate::error::IngestError;
use crate::estimators::{self, LocationEstimate, Method};
use crate::history::{MeasurementHistory, RingBuffer, Trajectory};
use crate::output::EstimateEvent;
use crate::report::{self, FeatureCollection, LocationReport, LocationStatistics};

/// Where a subject stands with respect to producing estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectPhase {
    /// Nothing in the window
    Cold,
    /// One measurement, waiting for a second
    Warming,
    /// Two or more measurements, every ingest attempts an estimate
    Active,
}

impl fmt::Display for SubjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubjectPhase::Cold => "cold",
            SubjectPhase::Warming => "warming",
            SubjectPhase::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct SubjectState {
    window: Vec<CellMeasurement>,
    trajectory: Trajectory,
}

impl SubjectState {
    /// Drop measurements observed ACTIVE_WINDOW_SECS or more before `now`.
    fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = Duration::seconds(ACTIVE_WINDOW_SECS);
        let before = self.window.len();
        self.window.retain(|m| now - m.observed_at < max_age);
        before - self.window.len()
    }

    /// Store a new estimate at the end of the trajectory.
    ///
    /// A provisional two-cell tail is only overwritten by an estimate from the
    /// same window episode: every measurement behind the tail must still be in
    /// the window or be used by the new estimate. Otherwise the tail is kept.
    fn store(&mut self, estimate: LocationEstimate) {
        let same_episode = self.trajectory.provisional_tail().map(|tail| {
            tail.measurements_used
                .iter()
                .all(|m| self.window.contains(m) || estimate.measurements_used.contains(m))
        });
        if same_episode == Some(false) {
            self.trajectory.settle_tail();
        }

        if estimate.method == Method::TwoCell {
            self.trajectory.push_provisional(estimate);
        } else {
            self.trajectory.push(estimate);
        }
    }

    fn phase(&self) -> SubjectPhase {
        match self.window.len() {
            0 => SubjectPhase::Cold,
            n if n < MIN_WINDOW_FOR_ESTIMATE => SubjectPhase::Warming,
            _ => SubjectPhase::Active,
        }
    }
}

type SubjectHandle = Arc<Mutex<SubjectState>>;

/// Engine-wide counters fed by every produced estimate
struct EstimateStats {
    total: usize,
    methods: BTreeMap<Method, usize>,
    recent: RingBuffer<LocationEstimate>,
}

impl EstimateStats {
    fn new() -> Self {
        EstimateStats {
            total: 0,
            methods: BTreeMap::new(),
            recent: RingBuffer::with_capacity(RECENT_ESTIMATES_CAPACITY),
        }
    }
}

/// Measurement-to-location estimation engine
pub struct Engine {
    directory: Arc<dyn CoordinateDirectory>,
    clock: Arc<dyn Clock>,
    history: MeasurementHistory,
    subjects: RwLock<HashMap<String, SubjectHandle>>,
    stats: Mutex<EstimateStats>,
    events: broadcast::Sender<EstimateEvent>,
}

impl Engine {
    pub fn new(directory: Arc<dyn CoordinateDirectory>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        Engine {
            directory,
            clock,
            history: MeasurementHistory::new(),
            subjects: RwLock::new(HashMap::new()),
            stats: Mutex::new(EstimateStats::new()),
            events,
        }
    }

    /// Receive every estimate produced from now on, see `output::run_outputs`.
    pub fn subscribe(&self) -> broadcast::Receiver<EstimateEvent> {
        self.events.subscribe()
    }

    /// Process one measurement for a subject.
    ///
    /// Returns `Ok(Some(estimate))` when the updated window yields a
    /// position, `Ok(None)` when it does not (too few measurements, unknown
    /// towers, every estimator failed) and `Err` for malformed input, in
    /// which case no state is touched.
    pub async fn ingest(
        &self,
        subject: &str,
        measurement: CellMeasurement,
    ) -> Result<Option<LocationEstimate>, IngestError> {
        if subject.trim().is_empty() {
            return Err(IngestError::EmptySubject);
        }
        measurement.validate()?;

        let now = self.clock.now();
        self.history.record(measurement.clone()).await;

        let estimate = {
            let handle = self.subject_handle(subject).await;
            let mut state = handle.lock().await;
            state.window.push(measurement);
            let purged = state.purge(now);
            if purged > 0 {
                debug!(subject, purged, "Purged expired measurements");
            }

            let estimate = estimators::triangulate(&state.window, self.directory.as_ref(), now);
            match &estimate {
                Some(e) => state.store(e.clone()),
                None => debug!(
                    subject,
                    window = state.window.len(),
                    "No estimate from current window"
                ),
            }
            estimate
        };

        if let Some(e) = &estimate {
            self.record_estimate(subject, e).await;
        }
        Ok(estimate)
    }

    async fn record_estimate(&self, subject: &str, estimate: &LocationEstimate) {
        {
            let mut stats = self.stats.lock().await;
            stats.total += 1;
            *stats.methods.entry(estimate.method).or_insert(0) += 1;
            stats.recent.push(estimate.clone());
        }

        if self.events.receiver_count() > 0 {
            // Only fails when every receiver is gone
            let _ = self.events.send(EstimateEvent {
                subject: subject.to_string(),
                estimate: estimate.clone(),
            });
        }
    }

    async fn subject_handle(&self, subject: &str) -> SubjectHandle {
        if let Some(handle) = self.subjects.read().await.get(subject) {
            return Arc::clone(handle);
        }
        let mut subjects = self.subjects.write().await;
        Arc::clone(subjects.entry(subject.to_string()).or_default())
    }

    async fn existing_subject(&self, subject: &str) -> Option<SubjectHandle> {
        self.subjects.read().await.get(subject).cloned()
    }

    /// Purge every window against the clock and forget idle subjects.
    ///
    /// A subject is dropped once its window and trajectory are both empty.
    /// Returns the number of subjects removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut subjects = self.subjects.write().await;

        let mut idle = Vec::new();
        for (subject, handle) in subjects.iter() {
            let mut state = handle.lock().await;
            state.purge(now);
            // A handle cloned by an in-flight ingest keeps the subject alive
            if state.window.is_empty()
                && state.trajectory.is_empty()
                && Arc::strong_count(handle) == 1
            {
                idle.push(subject.clone());
            }
        }
        for subject in &idle {
            subjects.remove(subject);
        }
        if !idle.is_empty() {
            debug!(removed = idle.len(), "Swept idle subjects");
        }
        idle.len()
    }

    pub async fn total_estimates(&self) -> usize {
        self.stats.lock().await.total
    }

    /// Per-method count of every estimate produced so far
    pub async fn method_counts(&self) -> BTreeMap<Method, usize> {
        self.stats.lock().await.methods.clone()
    }

    /// Most recent estimates across all subjects, oldest first
    pub async fn recent_estimates(&self) -> Vec<LocationEstimate> {
        self.stats.lock().await.recent.iter().cloned().collect()
    }

    pub async fn last_estimate(&self, subject: &str) -> Option<LocationEstimate> {
        let handle = self.existing_subject(subject).await?;
        let state = handle.lock().await;
        state.trajectory.latest().cloned()
    }

    /// Trajectory snapshot, empty for an unknown subject
    pub async fn trajectory(&self, subject: &str) -> Vec<LocationEstimate> {
        match self.existing_subject(subject).await {
            Some(handle) => handle.lock().await.trajectory.to_vec(),
            None => Vec::new(),
        }
    }

    /// Trajectory as GeoJSON; None for an unknown subject
    pub async fn trajectory_geojson(&self, subject: &str) -> Option<FeatureCollection> {
        let handle = self.existing_subject(subject).await?;
        let trajectory = handle.lock().await.trajectory.to_vec();
        Some(report::trajectory_collection(subject, &trajectory))
    }

    pub async fn last_seen(&self, key: &CellKey) -> Option<CellMeasurement> {
        self.history.latest(key).await
    }

    pub async fn phase(&self, subject: &str) -> SubjectPhase {
        match self.existing_subject(subject).await {
            Some(handle) => handle.lock().await.phase(),
            None => SubjectPhase::Cold,
        }
    }

    pub async fn window_len(&self, subject: &str) -> usize {
        match self.existing_subject(subject).await {
            Some(handle) => handle.lock().await.window.len(),
            None => 0,
        }
    }

    /// Known subject keys, sorted
    pub async fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.subjects.read().await.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    async fn handles(&self) -> Vec<(String, SubjectHandle)> {
        let mut handles: Vec<(String, SubjectHandle)> = self
            .subjects
            .read()
            .await
            .iter()
            .map(|(k, h)| (k.clone(), Arc::clone(h)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
    }

    /// Snapshot of statistics, heatmap, cell map and active subjects
    pub async fn report(&self) -> LocationReport {
        let now = self.clock.now();
        let (total, methods, recent) = {
            let stats = self.stats.lock().await;
            (
                stats.total,
                stats.methods.clone(),
                stats.recent.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let mut active_subjects = BTreeMap::new();
        for (subject, handle) in self.handles().await {
            let len = handle.lock().await.trajectory.len();
            if len > 0 {
                active_subjects.insert(subject, len);
            }
        }

        let latest = self.history.latest_per_cell().await;

        LocationReport {
            statistics: LocationStatistics::new(total, &recent, methods, now.date_naive()),
            heatmap: report::heatmap(&recent),
            cell_map: report::cell_map(&latest, self.directory.as_ref()),
            active_subjects,
        }
    }

    /// Log status line: subjects by phase, cells seen, estimates produced
    pub async fn log_status(&self) {
        let mut phases = [0usize; 3];
        for (_, handle) in self.handles().await {
            let idx = match handle.lock().await.phase() {
                SubjectPhase::Cold => 0,
                SubjectPhase::Warming => 1,
                SubjectPhase::Active => 2,
            };
            phases[idx] += 1;
        }
        let cells = self.history.cell_count().await;
        let (total, methods) = {
            let stats = self.stats.lock().await;
            (stats.total, stats.methods.clone())
        };
        let by_method = methods
            .iter()
            .map(|(m, n)| format!("{}={}", m, n))
            .collect::<Vec<_>>()
            .join(" ");

        info!(
            "Status: ({} subjects: {} active {} warming {} cold) ({} cells) ({} estimates {})",
            phases.iter().sum::<usize>(),
            phases[2],
            phases[1],
            phases[0],
            cells,
            total,
            by_method
        );
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(CellDatabase::new()), Arc::new(SystemClock))
    }
}
