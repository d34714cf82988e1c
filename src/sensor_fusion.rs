// sensor_fusion.rs — Tracking session: PDR deltas and marker resets in, position out
//
// Everything in this module is synchronous and free of I/O. A session owns
// its filter, its coordinate frame and the pending marker scan, so it can be
// driven from recorded batches, a live feed or the simulator alike.
//
// Priority rule per tick: a pending marker scan hard-resets the filter and the
// PDR prediction of that tick is skipped. Without a scan the tick predicts with
// the batch displacement.

use std::sync::{Arc, Mutex};

use crate::config::TrackerConfig;
use crate::coords::{haversine_m, CoordinateTransform};
use crate::error::{FilterError, PdrError, TrackerError, TrackerResult};
use crate::filters::{FilterState, FusionFilter};
use crate::live_status::{LiveStatus, PositionReport, SessionStats};
use crate::markers::{floor_from_room, MarkerRegistry, MarkerTree};
use crate::pdr::{PdrOutput, PdrPipeline};
use crate::types::{ImuBatch, MarkerScan, PositionMeasurement, PositionNoise};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    MarkerReset { room: Option<String>, x: f64, y: f64, floor: i32, correction_m: f64 },
    /// A queued scan was dropped because a newer one arrived first.
    ScanSuperseded { dropped_timestamp: f64, kept_timestamp: f64 },
    BatchRejected { reason: String },
    StepsDetected { count: usize, distance_m: f64 },
    Predicted { dx: f64, dy: f64 },
    SoftFixApplied { x: f64, y: f64 },
    OriginChanged { longitude: f64, latitude: f64 },
}

/// Result of one `process_batch` call.
#[derive(Clone, Debug)]
pub struct TickOutcome {
    pub events: Vec<FusionEvent>,
    pub pdr: PdrOutput,
    pub reset_applied: bool,
}

// ─── The session ─────────────────────────────────────────────────────────────

pub struct IndoorTracker {
    config: TrackerConfig,
    pdr: PdrPipeline,
    filter: FusionFilter,
    transform: CoordinateTransform,

    registry: Option<MarkerRegistry>,
    marker_tree: Option<MarkerTree>,

    pending_scan: Option<MarkerScan>,
    last_batch_end: Option<f64>,
    last_timestamp: f64,
    stats: SessionStats,
}

impl IndoorTracker {
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        let filter = FusionFilter::new(&config.filter)?;
        let transform = CoordinateTransform::from_origin(config.origin);
        log::info!(
            "Tracker origin at ({:.6}, {:.6})",
            config.origin.longitude,
            config.origin.latitude
        );
        Ok(Self {
            pdr: PdrPipeline::new(config.pdr.clone()),
            filter,
            transform,
            registry: None,
            marker_tree: None,
            pending_scan: None,
            last_batch_end: None,
            last_timestamp: 0.0,
            stats: SessionStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    /// Attach known marker positions; enables room scans and nearest-marker
    /// reporting.
    pub fn set_registry(&mut self, registry: MarkerRegistry) {
        self.marker_tree = Some(MarkerTree::from_registry(&registry, &self.transform));
        self.registry = Some(registry);
    }

    /// Move the local frame, keeping the physical position of the estimate.
    pub fn set_origin(&mut self, longitude: f64, latitude: f64) -> TrackerResult<FusionEvent> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(FilterError::NonFiniteInput(format!("origin ({}, {})", longitude, latitude)).into());
        }
        let (x, y, floor) = self.filter.position();
        let (lon, lat) = self.transform.to_geo(x, y);

        self.transform.set_origin(longitude, latitude);
        let (new_x, new_y) = self.transform.to_local(lon, lat);
        self.filter.reset(new_x, new_y, floor)?;

        if let Some(registry) = &self.registry {
            self.marker_tree = Some(MarkerTree::from_registry(registry, &self.transform));
        }
        log::info!("Origin moved to ({:.6}, {:.6})", longitude, latitude);
        Ok(FusionEvent::OriginChanged { longitude, latitude })
    }

    /// Store a scan for the next tick. When several arrive before a tick, the
    /// newest by timestamp wins.
    pub fn queue_marker_scan(&mut self, scan: MarkerScan) -> TrackerResult<Option<FusionEvent>> {
        if !scan.is_valid() {
            return Err(TrackerError::InvalidScan(format!(
                "non-finite scan ({}, {}) at {}",
                scan.longitude, scan.latitude, scan.timestamp
            )));
        }
        let superseded = match self.pending_scan.take() {
            Some(existing) if existing.timestamp > scan.timestamp => {
                let event = FusionEvent::ScanSuperseded {
                    dropped_timestamp: scan.timestamp,
                    kept_timestamp: existing.timestamp,
                };
                self.pending_scan = Some(existing);
                return Ok(Some(event));
            }
            Some(existing) => Some(FusionEvent::ScanSuperseded {
                dropped_timestamp: existing.timestamp,
                kept_timestamp: scan.timestamp,
            }),
            None => None,
        };
        log::debug!("Queued marker scan at {:.3}", scan.timestamp);
        self.pending_scan = Some(scan);
        Ok(superseded)
    }

    /// Queue the scan of a registered room's marker.
    pub fn queue_room_scan(&mut self, room: &str, timestamp: f64) -> TrackerResult<Option<FusionEvent>> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| TrackerError::UnknownRoom(room.to_string()))?;
        let scan = registry.scan_for_room(room, timestamp)?;
        self.queue_marker_scan(scan)
    }

    pub fn has_pending_scan(&self) -> bool {
        self.pending_scan.is_some()
    }

    /// One tick driven by an IMU batch.
    ///
    /// Batch problems never fail the call: the batch counts as neutral and a
    /// `BatchRejected` event is emitted. Filter failures are returned.
    pub fn process_batch(&mut self, batch: &ImuBatch) -> TrackerResult<TickOutcome> {
        let mut events = Vec::new();

        let pdr = match self.run_pdr(batch) {
            Ok(output) => {
                self.stats.batches_processed += 1;
                self.stats.steps_total += output.step_count() as u64;
                self.stats.distance_total_m += output.total_distance();
                if let Some(end) = batch.last_timestamp() {
                    self.last_batch_end = Some(end);
                    self.last_timestamp = self.last_timestamp.max(end);
                }
                if output.step_count() > 0 {
                    events.push(FusionEvent::StepsDetected {
                        count: output.step_count(),
                        distance_m: output.total_distance(),
                    });
                }
                output
            }
            Err(e) => {
                log::warn!("IMU batch rejected: {}", e);
                self.stats.batches_rejected += 1;
                events.push(FusionEvent::BatchRejected { reason: e.to_string() });
                PdrOutput::neutral()
            }
        };

        let reset_applied = if let Some(scan) = self.pending_scan.take() {
            events.push(self.apply_scan(scan)?);
            true
        } else {
            self.filter.predict(pdr.delta)?;
            events.push(FusionEvent::Predicted { dx: pdr.delta.dx, dy: pdr.delta.dy });
            false
        };

        Ok(TickOutcome { events, pdr, reset_applied })
    }

    /// Tick without IMU data: only a pending scan can change the state.
    pub fn tick_without_imu(&mut self) -> TrackerResult<Option<FusionEvent>> {
        match self.pending_scan.take() {
            Some(scan) => Ok(Some(self.apply_scan(scan)?)),
            None => Ok(None),
        }
    }

    /// Soft absolute fix through the Kalman update; the floor is left alone.
    pub fn apply_soft_fix(
        &mut self,
        x: f64,
        y: f64,
        floor: i32,
        noise: Option<PositionNoise>,
    ) -> TrackerResult<FusionEvent> {
        self.filter.update(PositionMeasurement::new(x, y, floor as f64), noise)?;
        Ok(FusionEvent::SoftFixApplied { x, y })
    }

    pub fn filter_state(&self) -> FilterState {
        self.filter.get_state()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn position(&self) -> PositionReport {
        let state = self.filter.get_state();
        let (longitude, latitude) = self.transform.to_geo(state.x, state.y);
        let nearest = self.marker_tree.as_ref().and_then(|tree| {
            tree.nearest_on_floor(state.x, state.y, state.floor)
                .or_else(|| tree.nearest(state.x, state.y))
        });
        PositionReport {
            timestamp: self.last_timestamp,
            x: state.x,
            y: state.y,
            floor: state.floor,
            longitude,
            latitude,
            covariance_trace: state.covariance_trace,
            nearest_marker: nearest.map(|(p, _)| p.room.clone()),
            nearest_marker_distance_m: nearest.map(|(_, d)| d),
        }
    }

    pub fn live_status(&self) -> LiveStatus {
        LiveStatus::new(self.position(), self.stats.clone(), self.transform.origin())
    }

    /// Forget everything learned in this session; the frame is kept.
    pub fn reset_session(&mut self) {
        self.filter.reset_to_initial();
        self.pending_scan = None;
        self.last_batch_end = None;
        self.last_timestamp = 0.0;
        self.stats = SessionStats::default();
        log::info!("Session reset");
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn run_pdr(&self, batch: &ImuBatch) -> Result<PdrOutput, PdrError> {
        if let (Some(previous_end), Some(start)) = (self.last_batch_end, batch.first_timestamp()) {
            if start < previous_end {
                return Err(PdrError::OutOfOrderBatch { start, previous_end });
            }
        }
        self.pdr.process(batch)
    }

    fn apply_scan(&mut self, scan: MarkerScan) -> TrackerResult<FusionEvent> {
        let floor = scan
            .floor
            .or_else(|| scan.room.as_deref().and_then(floor_from_room))
            .unwrap_or(self.config.default_floor);

        let (x0, y0, _) = self.filter.position();
        let correction_m = haversine_m(self.transform.to_geo(x0, y0), (scan.longitude, scan.latitude));

        let (x, y) = self.transform.to_local(scan.longitude, scan.latitude);
        self.filter.reset(x, y, floor)?;

        self.stats.marker_resets += 1;
        self.stats.last_marker_room = scan.room.clone();
        self.last_timestamp = self.last_timestamp.max(scan.timestamp);
        log::info!(
            "Marker reset to ({:.2}, {:.2}) floor {} [{}], correction {:.2} m",
            x,
            y,
            floor,
            scan.room.as_deref().unwrap_or("?"),
            correction_m
        );
        Ok(FusionEvent::MarkerReset { room: scan.room, x, y, floor, correction_m })
    }
}

// ─── Shared access ───────────────────────────────────────────────────────────

/// A session shared between threads. Every call holds the lock for its whole
/// duration, so origin changes never interleave with filter operations.
#[derive(Clone)]
pub struct SharedTracker {
    inner: Arc<Mutex<IndoorTracker>>,
}

impl SharedTracker {
    pub fn new(tracker: IndoorTracker) -> Self {
        Self { inner: Arc::new(Mutex::new(tracker)) }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut IndoorTracker) -> R) -> TrackerResult<R> {
        let mut guard = self.inner.lock().map_err(|_| TrackerError::LockPoisoned)?;
        Ok(f(&mut guard))
    }

    pub fn process_batch(&self, batch: &ImuBatch) -> TrackerResult<TickOutcome> {
        self.with(|t| t.process_batch(batch))?
    }

    pub fn queue_marker_scan(&self, scan: MarkerScan) -> TrackerResult<Option<FusionEvent>> {
        self.with(|t| t.queue_marker_scan(scan))?
    }

    pub fn set_origin(&self, longitude: f64, latitude: f64) -> TrackerResult<FusionEvent> {
        self.with(|t| t.set_origin(longitude, latitude))?
    }

    pub fn position(&self) -> TrackerResult<PositionReport> {
        self.with(|t| t.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeltaPolicy, PdrConfig};
    use crate::simulation::SyntheticWalk;
    use approx::assert_abs_diff_eq;

    fn tracker() -> IndoorTracker {
        IndoorTracker::new(TrackerConfig::default()).unwrap()
    }

    fn walking_tracker(walk: &SyntheticWalk) -> IndoorTracker {
        let config = TrackerConfig {
            pdr: PdrConfig {
                weinberg_k: walk.weinberg_k_for(0.7),
                delta_policy: DeltaPolicy::BatchNet,
                ..Default::default()
            },
            ..Default::default()
        };
        IndoorTracker::new(config).unwrap()
    }

    fn scan_at(t: &IndoorTracker, x: f64, y: f64, floor: Option<i32>, timestamp: f64) -> MarkerScan {
        let (longitude, latitude) = t.transform().to_geo(x, y);
        MarkerScan { timestamp, longitude, latitude, floor, room: None }
    }

    #[test]
    fn test_scan_then_walk() {
        let walk = SyntheticWalk::default();
        let mut t = walking_tracker(&walk);
        let scan = scan_at(&t, 50.0, 20.0, Some(3), 0.0);
        t.queue_marker_scan(scan).unwrap();

        // Scan tick: reset wins, the batch displacement is not applied.
        let outcome = t.process_batch(&walk.generate()).unwrap();
        assert!(outcome.reset_applied);
        assert!(outcome.events.iter().any(|e| matches!(e, FusionEvent::MarkerReset { floor: 3, .. })));
        let state = t.filter_state();
        assert_abs_diff_eq!(state.x, 50.0, epsilon = 1e-6);
        assert_abs_diff_eq!(state.y, 20.0, epsilon = 1e-6);
        assert_eq!(state.floor, 3);

        // Next tick predicts with the walk.
        let next = SyntheticWalk { start_time: 20.0, ..walk.clone() };
        let outcome = t.process_batch(&next.generate()).unwrap();
        assert!(!outcome.reset_applied);
        let state = t.filter_state();
        assert_abs_diff_eq!(state.x, 57.0, epsilon = 1.0);
        assert_abs_diff_eq!(state.y, 20.0, epsilon = 1e-3);
        assert_eq!(state.floor, 3);
    }

    #[test]
    fn test_reset_then_fixed_delta() {
        let mut t = tracker();
        t.queue_marker_scan(scan_at(&t, 50.0, 20.0, Some(3), 1.0)).unwrap();
        t.tick_without_imu().unwrap();
        t.filter.predict(crate::types::PositionDelta::new(1.0, 0.5)).unwrap();
        let report = t.position();
        assert_abs_diff_eq!(report.x, 51.0, epsilon = 1e-6);
        assert_abs_diff_eq!(report.y, 20.5, epsilon = 1e-6);
        assert_eq!(report.floor, 3);
    }

    #[test]
    fn test_newest_pending_scan_wins() {
        let mut t = tracker();
        t.queue_marker_scan(scan_at(&t, 1.0, 1.0, Some(1), 10.0)).unwrap();
        let event = t.queue_marker_scan(scan_at(&t, 2.0, 2.0, Some(2), 5.0)).unwrap();
        assert_eq!(
            event,
            Some(FusionEvent::ScanSuperseded { dropped_timestamp: 5.0, kept_timestamp: 10.0 })
        );
        t.queue_marker_scan(scan_at(&t, 3.0, 3.0, Some(3), 12.0)).unwrap();
        t.tick_without_imu().unwrap();
        assert_eq!(t.filter_state().floor, 3);
        assert!(!t.has_pending_scan());
        assert_eq!(t.tick_without_imu().unwrap(), None);
    }

    #[test]
    fn test_invalid_scan_rejected() {
        let mut t = tracker();
        let scan = MarkerScan { timestamp: 0.0, longitude: f64::NAN, latitude: 41.0, floor: None, room: None };
        assert!(matches!(t.queue_marker_scan(scan), Err(TrackerError::InvalidScan(_))));
        assert!(!t.has_pending_scan());
    }

    #[test]
    fn test_floor_falls_back_to_room_then_default() {
        let mut t = tracker();
        let mut scan = scan_at(&t, 0.0, 0.0, None, 0.0);
        scan.room = Some("4-02".into());
        t.queue_marker_scan(scan).unwrap();
        t.tick_without_imu().unwrap();
        assert_eq!(t.filter_state().floor, 4);

        t.queue_marker_scan(scan_at(&t, 0.0, 0.0, None, 1.0)).unwrap();
        t.tick_without_imu().unwrap();
        assert_eq!(t.filter_state().floor, 2);
    }

    #[test]
    fn test_rejected_batch_is_neutral() {
        let mut t = tracker();
        t.queue_marker_scan(scan_at(&t, 5.0, 5.0, Some(2), 0.0)).unwrap();
        t.tick_without_imu().unwrap();

        let empty = ImuBatch::default();
        let outcome = t.process_batch(&empty).unwrap();
        assert!(outcome.events.iter().any(|e| matches!(e, FusionEvent::BatchRejected { .. })));
        let state = t.filter_state();
        assert_abs_diff_eq!(state.x, 5.0, epsilon = 1e-6);
        // The tick still predicted, so uncertainty grew.
        assert!(state.covariance_trace > 3.0);
        assert_eq!(t.stats().batches_rejected, 1);
    }

    #[test]
    fn test_out_of_order_batch_rejected() {
        let walk = SyntheticWalk::default();
        let mut t = walking_tracker(&walk);
        t.process_batch(&SyntheticWalk { start_time: 100.0, ..walk.clone() }.generate()).unwrap();
        let before = t.filter_state();

        let outcome = t.process_batch(&walk.generate()).unwrap();
        assert!(matches!(
            outcome.events.first(),
            Some(FusionEvent::BatchRejected { reason }) if reason.contains("before previous batch")
        ));
        let after = t.filter_state();
        assert_eq!((before.x, before.y), (after.x, after.y));
        assert_eq!(t.stats().batches_processed, 1);
    }

    #[test]
    fn test_origin_change_keeps_physical_position() {
        let mut t = tracker();
        t.queue_marker_scan(scan_at(&t, 30.0, -12.0, Some(2), 0.0)).unwrap();
        t.tick_without_imu().unwrap();
        let before = t.position();

        let event = t.set_origin(before.longitude + 0.0005, before.latitude - 0.0003).unwrap();
        assert!(matches!(event, FusionEvent::OriginChanged { .. }));
        let after = t.position();
        assert_abs_diff_eq!(after.longitude, before.longitude, epsilon = 1e-9);
        assert_abs_diff_eq!(after.latitude, before.latitude, epsilon = 1e-9);
        assert!((after.x - before.x).abs() > 10.0);
        assert_eq!(after.floor, 2);

        assert!(t.set_origin(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_room_scan_and_nearest_marker() {
        let mut t = tracker();
        let mut registry = MarkerRegistry::new();
        let (lon1, lat1) = t.transform().to_geo(0.0, 0.0);
        let (lon2, lat2) = t.transform().to_geo(12.0, 0.0);
        registry.insert("201", lon1, lat1).unwrap();
        registry.insert("202", lon2, lat2).unwrap();
        t.set_registry(registry);

        t.queue_room_scan("202", 3.0).unwrap();
        let event = t.tick_without_imu().unwrap().unwrap();
        match event {
            FusionEvent::MarkerReset { room, floor, .. } => {
                assert_eq!(room.as_deref(), Some("2-02"));
                assert_eq!(floor, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let report = t.position();
        assert_eq!(report.nearest_marker.as_deref(), Some("2-02"));
        assert_abs_diff_eq!(report.nearest_marker_distance_m.unwrap(), 0.0, epsilon = 1e-6);
        assert_eq!(t.stats().last_marker_room.as_deref(), Some("2-02"));

        assert!(matches!(t.queue_room_scan("2-40", 4.0), Err(TrackerError::UnknownRoom(_))));
    }

    #[test]
    fn test_soft_fix_pulls_toward_measurement() {
        let mut t = tracker();
        t.apply_soft_fix(9.0, 0.0, 5, None).unwrap();
        let state = t.filter_state();
        assert_abs_diff_eq!(state.x, 3.0, epsilon = 1e-9);
        assert_eq!(state.floor, 0);
    }

    #[test]
    fn test_soft_fix_rejects_degenerate_noise() {
        let mut t = tracker();
        let err = t.apply_soft_fix(9.0, 0.0, 0, Some(PositionNoise::zeros())).unwrap_err();
        assert!(matches!(err, TrackerError::Filter(FilterError::InvalidNoise(_))));
        assert_eq!(t.filter_state().updates, 0);
        assert_eq!(t.filter_state().x, 0.0);
    }

    #[test]
    fn test_reset_session() {
        let walk = SyntheticWalk::default();
        let mut t = walking_tracker(&walk);
        t.process_batch(&walk.generate()).unwrap();
        assert!(t.stats().steps_total > 0);
        t.reset_session();
        let state = t.filter_state();
        assert_eq!((state.x, state.y, state.floor), (0.0, 0.0, 0));
        assert_eq!(*t.stats(), SessionStats::default());
        // Earlier timestamps are accepted again.
        let outcome = t.process_batch(&walk.generate()).unwrap();
        assert!(!outcome.events.iter().any(|e| matches!(e, FusionEvent::BatchRejected { .. })));
    }

    #[test]
    fn test_shared_tracker_across_threads() {
        let shared = SharedTracker::new(tracker());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let scan = shared
                        .with(|t| scan_at(t, i as f64, 0.0, Some(2), i as f64))
                        .unwrap();
                    shared.queue_marker_scan(scan).unwrap();
                    shared.with(|t| t.tick_without_imu()).unwrap().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let report = shared.position().unwrap();
        assert_eq!(report.floor, 2);
        assert!(shared.with(|t| t.stats().marker_resets).unwrap() >= 1);
    }
}
