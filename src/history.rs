// Bounded measurement and trajectory history
//
// RingBuffer is the fixed-capacity FIFO shared by every history in the
// engine. MeasurementHistory keys one buffer per cell behind its own lock so
// concurrent ingests only contend when they touch the same cell.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::cell::{CellKey, CellMeasurement};
use crate::constants::{HISTORY_CAPACITY, TRAJECTORY_CAPACITY};
use crate::estimators::LocationEstimate;

/// Fixed-capacity FIFO; pushing past capacity drops the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        RingBuffer {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    fn replace_latest(&mut self, item: T) {
        match self.items.back_mut() {
            Some(last) => *last = item,
            None => self.items.push_back(item),
        }
    }
}

/// Per-subject sequence of estimates, in production order.
///
/// A two-cell fix is stored as a provisional tail: the next estimate for the
/// subject overwrites it instead of being appended, unless the tail has been
/// settled first.
#[derive(Debug, Clone)]
pub struct Trajectory {
    points: RingBuffer<LocationEstimate>,
    provisional_tail: bool,
}

impl Trajectory {
    pub fn new() -> Self {
        Trajectory {
            points: RingBuffer::with_capacity(TRAJECTORY_CAPACITY),
            provisional_tail: false,
        }
    }

    pub fn push(&mut self, estimate: LocationEstimate) {
        self.store(estimate, false);
    }

    pub fn push_provisional(&mut self, estimate: LocationEstimate) {
        self.store(estimate, true);
    }

    fn store(&mut self, estimate: LocationEstimate, provisional: bool) {
        if self.provisional_tail {
            self.points.replace_latest(estimate);
        } else {
            self.points.push(estimate);
        }
        self.provisional_tail = provisional;
    }

    pub fn latest(&self) -> Option<&LocationEstimate> {
        self.points.latest()
    }

    pub fn has_provisional_tail(&self) -> bool {
        self.provisional_tail
    }

    /// The newest entry if it is still provisional.
    pub fn provisional_tail(&self) -> Option<&LocationEstimate> {
        if self.provisional_tail {
            self.points.latest()
        } else {
            None
        }
    }

    /// Keep the provisional tail as a permanent entry; the next store appends.
    pub fn settle_tail(&mut self) {
        self.provisional_tail = false;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LocationEstimate> + ExactSizeIterator {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<LocationEstimate> {
        self.points.iter().cloned().collect()
    }
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new()
    }
}

type CellBuffer = Arc<Mutex<RingBuffer<CellMeasurement>>>;

/// Recent measurements per cell key, 50 per key.
#[derive(Debug, Default)]
pub struct MeasurementHistory {
    cells: RwLock<HashMap<CellKey, CellBuffer>>,
}

impl MeasurementHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, measurement: CellMeasurement) {
        let key = measurement.key();
        let buffer = self.buffer_for(key).await;
        let mut buffer = buffer.lock().await;
        buffer.push(measurement);
    }

    async fn buffer_for(&self, key: CellKey) -> CellBuffer {
        if let Some(buffer) = self.cells.read().await.get(&key) {
            return Arc::clone(buffer);
        }
        let mut cells = self.cells.write().await;
        Arc::clone(
            cells
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(RingBuffer::with_capacity(HISTORY_CAPACITY)))
                }),
        )
    }

    async fn get(&self, key: &CellKey) -> Option<CellBuffer> {
        self.cells.read().await.get(key).cloned()
    }

    pub async fn latest(&self, key: &CellKey) -> Option<CellMeasurement> {
        let buffer = self.get(key).await?;
        let buffer = buffer.lock().await;
        buffer.latest().cloned()
    }

    /// All retained measurements for a cell, oldest first.
    pub async fn snapshot(&self, key: &CellKey) -> Vec<CellMeasurement> {
        match self.get(key).await {
            Some(buffer) => buffer.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn len(&self, key: &CellKey) -> usize {
        match self.get(key).await {
            Some(buffer) => buffer.lock().await.len(),
            None => 0,
        }
    }

    pub async fn cell_count(&self) -> usize {
        self.cells.read().await.len()
    }

    /// Last-seen measurement of every known cell, ordered by cell key.
    pub async fn latest_per_cell(&self) -> Vec<CellMeasurement> {
        let mut buffers: Vec<(CellKey, CellBuffer)> = self
            .cells
            .read()
            .await
            .iter()
            .map(|(k, b)| (k.clone(), Arc::clone(b)))
            .collect();
        buffers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut latest = Vec::with_capacity(buffers.len());
        for (_, buffer) in buffers {
            if let Some(m) = buffer.lock().await.latest() {
                latest.push(m.clone());
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::Method;
    use chrono::{Duration, TimeZone, Utc};

    fn measurement(cell: &str, signal: i32, offset_secs: i64) -> CellMeasurement {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CellMeasurement::new(
            &CellKey::new("214", "07", "100", cell),
            signal,
            t0 + Duration::seconds(offset_secs),
        )
    }

    fn estimate(lat: f64, method: Method) -> LocationEstimate {
        LocationEstimate {
            latitude: lat,
            longitude: 0.0,
            precision: 1.0,
            method,
            measurements_used: vec![measurement("200", -70, 0)],
            produced_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buffer = RingBuffer::with_capacity(3);
        assert_eq!(buffer.push(1), None);
        assert_eq!(buffer.push(2), None);
        assert_eq!(buffer.push(3), None);
        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(buffer.latest(), Some(&4));
    }

    #[tokio::test]
    async fn test_history_bound() {
        let history = MeasurementHistory::new();
        for i in 0..51 {
            history.record(measurement("200", -60 - i as i32, i)).await;
        }

        let key = CellKey::new("214", "07", "100", "200");
        assert_eq!(history.len(&key).await, HISTORY_CAPACITY);

        let kept = history.snapshot(&key).await;
        assert_eq!(kept.len(), 50);
        // Measurement #0 was evicted; #1..=#50 remain in order
        assert_eq!(kept[0].signal_strength, -61);
        assert_eq!(kept[49].signal_strength, -110);
        assert_eq!(history.latest(&key).await.unwrap().signal_strength, -110);
    }

    #[tokio::test]
    async fn test_history_keys_are_independent() {
        let history = MeasurementHistory::new();
        history.record(measurement("200", -70, 0)).await;
        history.record(measurement("201", -80, 1)).await;
        history.record(measurement("201", -81, 2)).await;

        assert_eq!(history.cell_count().await, 2);
        assert_eq!(history.len(&CellKey::new("214", "07", "100", "200")).await, 1);
        assert_eq!(history.len(&CellKey::new("214", "07", "100", "201")).await, 2);
        assert!(history.latest(&CellKey::new("214", "07", "100", "999")).await.is_none());

        let latest = history.latest_per_cell().await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].cell_id, "200");
        assert_eq!(latest[1].signal_strength, -81);
    }

    #[test]
    fn test_trajectory_provisional_tail_is_replaced() {
        let mut trajectory = Trajectory::new();
        trajectory.push_provisional(estimate(1.0, Method::TwoCell));
        assert_eq!(trajectory.len(), 1);
        assert!(trajectory.has_provisional_tail());

        trajectory.push(estimate(2.0, Method::Combined));
        assert_eq!(trajectory.len(), 1);
        assert!(!trajectory.has_provisional_tail());
        assert_eq!(trajectory.latest().unwrap().method, Method::Combined);

        trajectory.push(estimate(3.0, Method::Combined));
        assert_eq!(trajectory.len(), 2);
    }

    #[test]
    fn test_trajectory_settled_tail_is_kept() {
        let mut trajectory = Trajectory::new();
        trajectory.push_provisional(estimate(1.0, Method::TwoCell));
        assert_eq!(trajectory.provisional_tail().unwrap().latitude, 1.0);

        trajectory.settle_tail();
        assert!(trajectory.provisional_tail().is_none());

        trajectory.push_provisional(estimate(2.0, Method::TwoCell));
        assert_eq!(trajectory.len(), 2);
        let lats: Vec<f64> = trajectory.iter().map(|e| e.latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0]);
    }

    #[test]
    fn test_trajectory_capacity() {
        let mut trajectory = Trajectory::new();
        for i in 0..(TRAJECTORY_CAPACITY + 5) {
            trajectory.push(estimate(i as f64, Method::Combined));
        }
        assert_eq!(trajectory.len(), TRAJECTORY_CAPACITY);
        assert!((trajectory.iter().next().unwrap().latitude - 5.0).abs() < 1e-12);
    }
}
