//! The device controller: session and mode state machine.
//!
//! [`DeviceController`] owns the engagement session, the rep counter, the
//! test-mode simulator and the live settings. It is driven entirely by the
//! caller: detections, commands and timeouts each come in with the current
//! time, and every resulting event goes out through the injected
//! [`EventSink`].
//!
//! # Modes
//!
//! ```text
//!            new marker                 exercise details
//!   Idle ───────────────► AwaitingExercise ───────────────► Scanning
//!                               ▲   │                          │  ▲
//!                               │   │ marker lost              │  │
//!                               │   ▼                          ▼  │
//!                               └─ Loiter ◄────────────────────┘  │
//!                                   │       next detection         │
//!                                   └──────────────────────────────┘
//! ```

use tracing::{debug, info, warn};

use crate::config::{
    is_valid_loiter_fps, is_valid_max_rep_idle_ms, is_valid_min_travel_cm, is_valid_target_fps,
    ControllerConfig,
};
use crate::protocol::{status_label, DeviceEvent, DeviceMessage, DeviceSnapshot};
use crate::rep_counter::RepCounter;
use crate::session::EngagementSession;
use crate::settings::{PersistedSettings, SettingsStore};
use crate::simulator::DetectionSimulator;
use crate::types::{Detection, DeviceMode, ExerciseName, ExercisePayload, MetadataList};

/// Scanning never runs slower than this, so reps are not missed.
const MIN_SCAN_FPS: f32 = 4.0;

/// Frame interval used when the configured rate is not positive.
const FALLBACK_FRAME_INTERVAL_MS: u64 = 125;

/// Frame interval floor, so capture cannot starve the rest of the loop.
const MIN_FRAME_INTERVAL_MS: f32 = 10.0;

/// Receives every event the controller produces.
///
/// Emission is fire-and-forget: delivery failures are the sink's concern.
pub trait EventSink {
    /// Deliver one message.
    fn emit(&mut self, message: DeviceMessage);
}

impl EventSink for Vec<DeviceMessage> {
    fn emit(&mut self, message: DeviceMessage) {
        self.push(message);
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn emit(&mut self, message: DeviceMessage) {
        (**self).emit(message);
    }
}

/// Session and mode state machine for one cuff.
pub struct DeviceController<S: EventSink> {
    defaults: ControllerConfig,
    config: ControllerConfig,
    sink: S,
    settings: Box<dyn SettingsStore>,
    persisted: PersistedSettings,
    test_mode: bool,
    mode: DeviceMode,
    session: EngagementSession,
    counter: RepCounter,
    simulator: DetectionSimulator,
}

impl<S: EventSink> std::fmt::Debug for DeviceController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceController")
            .field("mode", &self.mode)
            .field("test_mode", &self.test_mode)
            .field("config", &self.config)
            .field("session", &self.session)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl<S: EventSink> DeviceController<S> {
    /// Create a controller from `config`, overlaid with whatever valid values
    /// `settings` holds. Emits nothing.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration; also the target of
    ///   [`factory_reset`](Self::factory_reset)
    /// * `sink` - Receiver of every emitted [`DeviceMessage`]
    /// * `settings` - Durable store for values changed at runtime. Stored
    ///   values outside their accepted range are ignored.
    pub fn new(config: ControllerConfig, sink: S, settings: Box<dyn SettingsStore>) -> Self {
        let counter = RepCounter::new(config.min_travel_cm, config.max_rep_idle_ms);
        let mut controller = Self {
            test_mode: config.test_mode,
            defaults: config.clone(),
            config,
            sink,
            settings,
            persisted: PersistedSettings::default(),
            mode: DeviceMode::Idle,
            session: EngagementSession::new(),
            counter,
            simulator: DetectionSimulator::new(),
        };

        match controller.settings.load() {
            Ok(stored) => controller.apply_persisted(stored),
            Err(e) => warn!(error = %e, code = e.error_code(), "ignoring unreadable settings"),
        }
        controller
    }

    fn apply_persisted(&mut self, stored: PersistedSettings) {
        if let Some(fps) = stored.target_fps.filter(|v| is_valid_target_fps(*v)) {
            self.config.target_fps = fps;
        }
        if let Some(fps) = stored.loiter_fps.filter(|v| is_valid_loiter_fps(*v)) {
            self.config.loiter_fps = fps;
        }
        if let Some(cm) = stored.min_travel_cm.filter(|v| is_valid_min_travel_cm(*v)) {
            self.config.min_travel_cm = cm;
            self.counter.set_min_travel(cm);
        }
        if let Some(ms) = stored.max_rep_idle_ms.filter(|v| is_valid_max_rep_idle_ms(*v)) {
            self.config.max_rep_idle_ms = ms;
            self.counter.set_max_idle_ms(ms);
        }
        if !stored.is_empty() {
            debug!(?stored, "persisted settings applied");
        }
        self.persisted = stored;
    }

    fn persist(&mut self, update: impl FnOnce(&mut PersistedSettings)) {
        update(&mut self.persisted);
        if let Err(e) = self.settings.save(&self.persisted) {
            warn!(error = %e, code = e.error_code(), "failed to persist settings");
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Current mode.
    pub const fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Whether test mode is on.
    pub const fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Scanning frame rate.
    pub const fn target_fps(&self) -> f32 {
        self.config.target_fps
    }

    /// Loiter frame rate.
    pub const fn loiter_fps(&self) -> f32 {
        self.config.loiter_fps
    }

    /// Frame rate for the current mode.
    pub fn effective_fps(&self) -> f32 {
        if self.mode == DeviceMode::Loiter {
            self.config.loiter_fps
        } else {
            self.config.target_fps
        }
    }

    /// Live configuration.
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current engagement session.
    pub const fn session(&self) -> &EngagementSession {
        &self.session
    }

    /// Rep counter.
    pub const fn rep_counter(&self) -> &RepCounter {
        &self.counter
    }

    /// Test-mode simulator.
    pub const fn simulator(&self) -> &DetectionSimulator {
        &self.simulator
    }

    /// Event sink.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Event sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Time between two detection captures in the current mode.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn frame_interval_ms(&self) -> u64 {
        let mut fps = self.effective_fps();
        if self.mode != DeviceMode::Loiter && fps > 0.0 && fps < MIN_SCAN_FPS {
            fps = MIN_SCAN_FPS;
        }
        if fps.is_nan() || fps <= 0.0 {
            return FALLBACK_FRAME_INTERVAL_MS;
        }
        (1000.0 / fps).max(MIN_FRAME_INTERVAL_MS).round() as u64
    }

    /// Read-only view of the current state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            mode: self.mode,
            test_mode: self.test_mode,
            target_fps: self.config.target_fps,
            loiter_fps: self.config.loiter_fps,
            min_travel_cm: self.counter.min_travel_cm(),
            max_rep_idle_ms: self.counter.max_idle_ms(),
            marker_id: self.session.active.then_some(self.session.marker_id),
            metadata_ready: self.session.metadata_ready,
            rep_count: self.counter.count(),
            exercise_name: self.session.exercise_name().cloned(),
        }
    }

    // =========================================================================
    // EMISSION
    // =========================================================================

    /// Stamp `event` with `now_ms` and hand it to the sink.
    pub fn publish(&mut self, now_ms: u64, event: DeviceEvent) {
        debug!(event = event.name(), now_ms, "emit");
        self.sink.emit(DeviceMessage {
            timestamp_ms: now_ms,
            event,
        });
    }

    /// Emit a `Status` with the current mode, effective fps and test-mode flag.
    pub fn publish_status(&mut self, label: &str, now_ms: u64) {
        let event = DeviceEvent::Status {
            label: status_label(label),
            mode: self.mode,
            fps: self.effective_fps(),
            test_mode: self.test_mode,
        };
        self.publish(now_ms, event);
    }

    /// Emit a `Boot` event.
    pub fn publish_boot(&mut self, now_ms: u64) {
        let event = DeviceEvent::Boot {
            test_mode: self.test_mode,
            mode: self.mode,
            fps: self.effective_fps(),
        };
        self.publish(now_ms, event);
    }

    /// Emit a `Snapshot` event.
    pub fn publish_snapshot(&mut self, now_ms: u64) {
        let snapshot = self.snapshot();
        self.publish(now_ms, DeviceEvent::Snapshot(snapshot));
    }

    // =========================================================================
    // SETTERS
    // =========================================================================

    /// Turn test mode on or off. Returns `false` if it already had that value.
    ///
    /// Turning it off ends the current session and returns to `Idle`.
    pub fn set_test_mode(&mut self, enabled: bool, now_ms: u64) -> bool {
        if self.test_mode == enabled {
            return false;
        }
        self.test_mode = enabled;
        info!(enabled, "test mode changed");
        if enabled {
            self.publish_status("testModeEnabled", now_ms);
        } else {
            self.simulator.reset();
            self.session.reset();
            self.mode = DeviceMode::Idle;
            self.publish_status("testModeDisabled", now_ms);
        }
        true
    }

    /// Set the scanning frame rate. Out-of-range values are ignored.
    pub fn set_target_fps(&mut self, fps: f32, now_ms: u64) -> bool {
        if !is_valid_target_fps(fps) {
            warn!(fps, "rejecting target fps");
            return false;
        }
        self.config.target_fps = fps;
        self.persist(|p| p.target_fps = Some(fps));
        self.publish_status("fpsUpdated", now_ms);
        true
    }

    /// Set the loiter frame rate. Out-of-range values are ignored.
    pub fn set_loiter_fps(&mut self, fps: f32, now_ms: u64) -> bool {
        if !is_valid_loiter_fps(fps) {
            warn!(fps, "rejecting loiter fps");
            return false;
        }
        self.config.loiter_fps = fps;
        self.persist(|p| p.loiter_fps = Some(fps));
        self.publish_status("loiterFpsUpdated", now_ms);
        true
    }

    /// Set the rep-detection travel. Out-of-range values are ignored.
    pub fn set_min_travel(&mut self, cm: f32, now_ms: u64) -> bool {
        if !is_valid_min_travel_cm(cm) {
            warn!(cm, "rejecting min travel");
            return false;
        }
        self.config.min_travel_cm = cm;
        self.counter.set_min_travel(cm);
        self.persist(|p| p.min_travel_cm = Some(cm));
        self.publish_status("minTravelUpdated", now_ms);
        true
    }

    /// Set the rep idle timeout. Out-of-range values are ignored.
    pub fn set_max_rep_idle_ms(&mut self, ms: u64, now_ms: u64) -> bool {
        if !is_valid_max_rep_idle_ms(ms) {
            warn!(ms, "rejecting rep idle timeout");
            return false;
        }
        self.config.max_rep_idle_ms = ms;
        self.counter.set_max_idle_ms(ms);
        self.persist(|p| p.max_rep_idle_ms = Some(ms));
        self.publish_status("repIdleUpdated", now_ms);
        true
    }

    /// Restart the rep count from zero.
    pub fn reset_reps(&mut self, now_ms: u64) {
        self.counter.reset(0);
        self.publish_status("repsReset", now_ms);
    }

    /// Forget persisted settings and go back to the construction-time values.
    pub fn factory_reset(&mut self, now_ms: u64) {
        if let Err(e) = self.settings.clear() {
            warn!(error = %e, code = e.error_code(), "failed to clear settings");
        }
        self.persisted = PersistedSettings::default();

        self.config.target_fps = self.defaults.target_fps;
        self.config.loiter_fps = self.defaults.loiter_fps;
        self.config.min_travel_cm = self.defaults.min_travel_cm;
        self.config.max_rep_idle_ms = self.defaults.max_rep_idle_ms;
        self.counter.set_min_travel(self.defaults.min_travel_cm);
        self.counter.set_max_idle_ms(self.defaults.max_rep_idle_ms);

        info!("factory reset");
        self.publish_status("factoryReset", now_ms);
    }

    // =========================================================================
    // DETECTIONS & SESSIONS
    // =========================================================================

    /// Process one marker detection.
    pub fn handle_detection(&mut self, detection: &Detection, now_ms: u64) {
        let marker_id = detection.marker_id;

        if self.session.needs_rebind(marker_id) {
            self.session.bind(marker_id, now_ms);
            self.counter.reset(0);
            self.mode = DeviceMode::AwaitingExercise;
            info!(marker_id, test_mode = self.test_mode, "new station session");
            self.publish(
                now_ms,
                DeviceEvent::Tag {
                    marker_id,
                    from_test_mode: self.test_mode,
                },
            );
            self.publish_status("awaitingExercise", now_ms);
        }

        self.session.touch(now_ms);
        self.exit_loiter(now_ms);

        if !self.session.metadata_ready {
            if self.test_mode {
                self.apply_exercise_metadata(
                    marker_id,
                    self.config.test_exercise_name.clone(),
                    self.config.test_metadata.clone(),
                    now_ms,
                );
            } else if self.session.should_request(now_ms) {
                debug!(marker_id, "requesting exercise details");
                self.publish(now_ms, DeviceEvent::ExerciseRequest { marker_id });
                self.session.mark_requested(now_ms);
            }
        }

        if self.counter.update(detection.distance_cm, now_ms) {
            info!(marker_id, reps = self.counter.count(), "rep");
            let event = DeviceEvent::Rep {
                marker_id: self.session.marker_id,
                rep_count: self.counter.count(),
                exercise_name: self.session.exercise_name().cloned(),
            };
            self.publish(now_ms, event);
        }

        if self.session.metadata_ready {
            let event = DeviceEvent::Scan {
                marker_id,
                distance_cm: detection.distance_cm,
                mode: self.mode,
                fps: self.effective_fps(),
                exercise_name: self.session.exercise_name().cloned(),
            };
            self.publish(now_ms, event);
        }
    }

    /// Generate one simulated detection of the test marker and process it.
    pub fn simulate_detection(&mut self, now_ms: u64) -> Detection {
        let detection = self.simulator.next_detection(self.config.test_marker_id);
        self.handle_detection(&detection, now_ms);
        detection
    }

    /// Enter `Loiter` if the marker has been out of view for too long.
    pub fn evaluate_timeouts(&mut self, now_ms: u64) {
        if self.session.is_lost(now_ms, self.config.marker_lost_ms) {
            self.enter_loiter(now_ms);
        }
    }

    /// In test mode, make sure a synthetic session is running.
    pub fn maintain_test_mode(&mut self, now_ms: u64) {
        if !self.test_mode {
            return;
        }
        if !self.simulator.active() || !self.session.active {
            self.start_test_session(now_ms);
        }
    }

    /// Start a synthetic session with the configured test exercise.
    pub fn start_test_session(&mut self, now_ms: u64) {
        let marker_id = self.config.test_marker_id;
        let name = self.config.test_exercise_name.clone();
        let metadata = self.config.test_metadata.clone();

        self.session.bind(marker_id, now_ms);
        self.counter.reset(0);
        self.mode = DeviceMode::AwaitingExercise;
        info!(marker_id, "starting test session");

        self.publish(
            now_ms,
            DeviceEvent::ExerciseBroadcast {
                exercise_id: marker_id,
                name: name.clone(),
                metadata: (!metadata.is_empty()).then(|| metadata.clone()),
                from_test_mode: true,
            },
        );
        self.apply_exercise_metadata(marker_id, name, metadata, now_ms);
        self.simulator.rewind();
    }

    /// Mark the session's exercise details as known and start scanning.
    pub fn apply_exercise_metadata(
        &mut self,
        marker_id: u32,
        name: ExerciseName,
        metadata: MetadataList,
        now_ms: u64,
    ) {
        debug!(marker_id, name = %name, entries = metadata.len(), "exercise details applied");
        self.session.apply_metadata(marker_id, name, metadata, now_ms);
        self.mode = DeviceMode::Scanning;
        self.publish_status("scanning", now_ms);
    }

    /// Apply exercise details sent by the controller.
    ///
    /// Only accepted for the marker of the active session; returns `false`
    /// otherwise.
    pub fn handle_exercise_payload(&mut self, payload: ExercisePayload, now_ms: u64) -> bool {
        if !self.session.active || self.session.marker_id != payload.id {
            debug!(
                exercise_id = payload.id,
                bound = self.session.marker_id,
                active = self.session.active,
                "ignoring exercise details for another marker"
            );
            return false;
        }

        if let Some(cm) = payload.min_travel_cm {
            self.set_min_travel(cm, now_ms);
        }
        if let Some(fps) = payload.fps {
            self.set_target_fps(fps, now_ms);
        }

        let exercise_id = payload.id;
        self.apply_exercise_metadata(exercise_id, payload.name, payload.metadata, now_ms);
        self.publish(now_ms, DeviceEvent::ExerciseReady { exercise_id });
        true
    }

    fn enter_loiter(&mut self, now_ms: u64) {
        if self.mode != DeviceMode::Loiter {
            info!(marker_id = self.session.marker_id, "marker lost, loitering");
            self.mode = DeviceMode::Loiter;
            self.publish_status("loiter", now_ms);
        }
    }

    fn exit_loiter(&mut self, now_ms: u64) {
        if self.mode == DeviceMode::Loiter {
            let (mode, label) = if self.session.metadata_ready {
                (DeviceMode::Scanning, "scanning")
            } else {
                (DeviceMode::AwaitingExercise, "awaitingExercise")
            };
            info!(mode = %mode, "marker back in view");
            self.mode = mode;
            self.publish_status(label, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;
    use crate::types::bounded;

    type TestController = DeviceController<Vec<DeviceMessage>>;

    fn controller_with(config: ControllerConfig) -> TestController {
        DeviceController::new(config, Vec::new(), Box::new(MemorySettingsStore::new()))
    }

    fn live_config() -> ControllerConfig {
        ControllerConfig {
            test_mode: false,
            ..ControllerConfig::default()
        }
    }

    fn events(controller: &TestController) -> Vec<DeviceEvent> {
        controller.sink().iter().map(|m| m.event.clone()).collect()
    }

    fn labels(controller: &TestController) -> Vec<String> {
        controller
            .sink()
            .iter()
            .filter_map(|m| m.event.status_label().map(str::to_owned))
            .collect()
    }

    fn reps(controller: &TestController) -> Vec<(u32, Option<String>)> {
        controller
            .sink()
            .iter()
            .filter_map(|m| match &m.event {
                DeviceEvent::Rep {
                    rep_count,
                    exercise_name,
                    ..
                } => Some((*rep_count, exercise_name.as_ref().map(|n| n.to_string()))),
                _ => None,
            })
            .collect()
    }

    fn payload(id: u32, name: &str) -> ExercisePayload {
        ExercisePayload {
            id,
            name: bounded(name).unwrap(),
            metadata: MetadataList::new(),
            min_travel_cm: None,
            fps: None,
        }
    }

    fn detect(controller: &mut TestController, marker_id: u32, distance: f32, now: u64) {
        controller.handle_detection(&Detection::new(marker_id, distance), now);
    }

    #[test]
    fn test_new_marker_binds_session() {
        let mut c = controller_with(live_config());
        detect(&mut c, 1234, 80.0, 0);

        assert_eq!(c.mode(), DeviceMode::AwaitingExercise);
        assert!(c.session().active);
        assert_eq!(c.session().marker_id, 1234);

        let events = events(&c);
        assert_eq!(
            events[0],
            DeviceEvent::Tag {
                marker_id: 1234,
                from_test_mode: false
            }
        );
        assert_eq!(events[1].status_label(), Some("awaitingExercise"));
        assert_eq!(events[2], DeviceEvent::ExerciseRequest { marker_id: 1234 });
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_exercise_requests_are_spaced() {
        let mut c = controller_with(live_config());
        for now in [0, 500, 999, 1000, 1500] {
            detect(&mut c, 7, 80.0, now);
        }
        let requests = events(&c)
            .iter()
            .filter(|e| matches!(e, DeviceEvent::ExerciseRequest { .. }))
            .count();
        assert_eq!(requests, 2);
    }

    #[test]
    fn test_different_marker_rebinds_even_when_ready() {
        let mut c = controller_with(live_config());
        detect(&mut c, 1, 80.0, 0);
        assert!(c.handle_exercise_payload(payload(1, "Row"), 10));
        assert_eq!(c.mode(), DeviceMode::Scanning);
        c.sink_mut().clear();

        detect(&mut c, 2, 80.0, 20);
        let events = events(&c);
        assert_eq!(
            events[0],
            DeviceEvent::Tag {
                marker_id: 2,
                from_test_mode: false
            }
        );
        assert_eq!(events[1].status_label(), Some("awaitingExercise"));
        assert!(!c.session().metadata_ready);
        assert_eq!(c.rep_counter().count(), 0);
        assert_eq!(c.mode(), DeviceMode::AwaitingExercise);
    }

    #[test]
    fn test_target_fps_range() {
        let mut c = controller_with(live_config());
        assert!(!c.set_target_fps(0.1, 0));
        assert!(!c.set_target_fps(30.5, 0));
        assert!(!c.set_target_fps(f32::NAN, 0));
        assert!(c.sink().is_empty());
        assert!((c.target_fps() - 12.0).abs() < f32::EPSILON);

        assert!(c.set_target_fps(30.0, 5));
        assert_eq!(labels(&c), vec!["fpsUpdated"]);
        assert!((c.target_fps() - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_other_setters_validate_and_report() {
        let mut c = controller_with(live_config());
        assert!(!c.set_loiter_fps(0.05, 0));
        assert!(!c.set_min_travel(0.5, 0));
        assert!(!c.set_max_rep_idle_ms(60_001, 0));
        assert!(c.sink().is_empty());

        assert!(c.set_loiter_fps(1.0, 0));
        assert!(c.set_min_travel(20.0, 0));
        assert!(c.set_max_rep_idle_ms(800, 0));
        c.reset_reps(0);
        assert_eq!(
            labels(&c),
            vec![
                "loiterFpsUpdated",
                "minTravelUpdated",
                "repIdleUpdated",
                "repsReset"
            ]
        );
        assert!((c.rep_counter().min_travel_cm() - 20.0).abs() < f32::EPSILON);
        assert_eq!(c.rep_counter().max_idle_ms(), 800);
    }

    #[test]
    fn test_loiter_round_trip() {
        let mut c = controller_with(ControllerConfig {
            marker_lost_ms: 2000,
            ..live_config()
        });
        detect(&mut c, 5, 80.0, 0);
        assert!(c.handle_exercise_payload(payload(5, "Squat"), 0));
        c.sink_mut().clear();

        c.evaluate_timeouts(2000);
        assert_eq!(c.mode(), DeviceMode::Scanning);

        c.evaluate_timeouts(2001);
        assert_eq!(c.mode(), DeviceMode::Loiter);
        c.evaluate_timeouts(2050);
        assert_eq!(labels(&c), vec!["loiter"]);
        match &events(&c)[0] {
            DeviceEvent::Status { mode, fps, .. } => {
                assert_eq!(*mode, DeviceMode::Loiter);
                assert!((fps - c.loiter_fps()).abs() < f32::EPSILON);
            }
            other => panic!("unexpected event {other:?}"),
        }

        c.sink_mut().clear();
        detect(&mut c, 5, 80.0, 2100);
        assert_eq!(c.mode(), DeviceMode::Scanning);
        assert_eq!(labels(&c), vec!["scanning"]);
    }

    #[test]
    fn test_loiter_exit_without_metadata_awaits() {
        let mut c = controller_with(ControllerConfig {
            marker_lost_ms: 2000,
            ..live_config()
        });
        detect(&mut c, 5, 80.0, 0);
        c.evaluate_timeouts(3000);
        assert_eq!(c.mode(), DeviceMode::Loiter);

        detect(&mut c, 5, 80.0, 3100);
        assert_eq!(c.mode(), DeviceMode::AwaitingExercise);
    }

    #[test]
    fn test_twenty_simulated_ticks_make_one_rep() {
        let mut c = controller_with(ControllerConfig {
            test_mode: true,
            min_travel_cm: 12.0,
            ..ControllerConfig::default()
        });
        c.maintain_test_mode(0);
        assert!(c.session().metadata_ready);
        c.sink_mut().clear();

        for tick in 1..=20 {
            c.simulate_detection(tick * 100);
        }
        assert_eq!(reps(&c), vec![(1, Some("Demo Exercise".to_owned()))]);
        assert_eq!(c.rep_counter().count(), 1);
    }

    #[test]
    fn test_simulated_session_keeps_counting() {
        let mut c = controller_with(ControllerConfig {
            test_mode: true,
            ..ControllerConfig::default()
        });
        let mut now = 0;
        for _ in 0..80 {
            c.maintain_test_mode(now);
            c.simulate_detection(now);
            now += 200;
        }
        let counted = reps(&c);
        assert!(counted.len() >= 3);
        assert_eq!(counted.last().map(|r| r.0), Some(c.rep_counter().count()));
        assert!(events(&c).iter().any(|e| matches!(
            e,
            DeviceEvent::Scan {
                marker_id: 4242,
                ..
            }
        )));
    }

    #[test]
    fn test_maintain_does_not_restart_running_session() {
        let mut c = controller_with(ControllerConfig {
            test_mode: true,
            ..ControllerConfig::default()
        });
        c.maintain_test_mode(0);
        assert!(c.simulator().active());
        c.sink_mut().clear();

        c.maintain_test_mode(10);
        assert!(c.sink().is_empty());
    }

    #[test]
    fn test_test_session_broadcasts_exercise() {
        let mut c = controller_with(live_config());
        assert!(!c.set_test_mode(false, 0));
        assert!(c.set_test_mode(true, 0));
        c.maintain_test_mode(5);

        let events = events(&c);
        assert_eq!(events[0].status_label(), Some("testModeEnabled"));
        match &events[1] {
            DeviceEvent::ExerciseBroadcast {
                exercise_id,
                name,
                metadata,
                from_test_mode,
            } => {
                assert_eq!(*exercise_id, 4242);
                assert_eq!(name.as_str(), "Demo Exercise");
                assert_eq!(metadata.as_ref().map(|m| m.len()), Some(3));
                assert!(*from_test_mode);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[2].status_label(), Some("scanning"));
        assert_eq!(c.mode(), DeviceMode::Scanning);
    }

    #[test]
    fn test_largest_test_session_fits_in_frames() {
        use crate::protocol::send_message;
        use crate::types::{
            MetadataEntry, EXERCISE_NAME_CAPACITY, MAX_METADATA_ENTRIES, METADATA_KEY_CAPACITY,
            METADATA_VALUE_CAPACITY,
        };

        let mut test_metadata = MetadataList::new();
        for i in 0..MAX_METADATA_ENTRIES {
            let key = format!("{i:k>width$}", width = METADATA_KEY_CAPACITY);
            let value = "v".repeat(METADATA_VALUE_CAPACITY);
            test_metadata
                .push(MetadataEntry::new(&key, &value).unwrap())
                .unwrap();
        }
        let config = ControllerConfig {
            test_mode: true,
            test_marker_id: u32::MAX,
            test_exercise_name: bounded(&"n".repeat(EXERCISE_NAME_CAPACITY)).unwrap(),
            test_metadata,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_ok());

        let mut c = controller_with(config);
        c.maintain_test_mode(0);
        assert!(events(&c)
            .iter()
            .any(|e| matches!(e, DeviceEvent::ExerciseBroadcast { .. })));
        for message in c.sink() {
            assert!(send_message(message, |_| {}), "{} did not fit", message.event.name());
        }
    }

    #[test]
    fn test_disabling_test_mode_goes_idle() {
        let mut c = controller_with(ControllerConfig {
            test_mode: true,
            ..ControllerConfig::default()
        });
        c.maintain_test_mode(0);
        c.sink_mut().clear();

        assert!(c.set_test_mode(false, 10));
        assert_eq!(c.mode(), DeviceMode::Idle);
        assert!(!c.session().active);
        assert!(!c.simulator().active());
        assert_eq!(labels(&c), vec!["testModeDisabled"]);

        c.maintain_test_mode(20);
        assert!(!c.session().active);
    }

    #[test]
    fn test_payload_overrides_and_scan_name() {
        let mut c = controller_with(ControllerConfig {
            target_fps: 6.0,
            loiter_fps: 1.0,
            ..live_config()
        });
        detect(&mut c, 1234, 80.0, 0);

        let mut bench = payload(1234, "Bench");
        bench.min_travel_cm = Some(5.0);
        bench.fps = Some(5.0);
        assert!(c.handle_exercise_payload(bench, 0));
        assert!((c.target_fps() - 5.0).abs() < 0.001);
        assert!((c.rep_counter().min_travel_cm() - 5.0).abs() < 0.001);
        assert!(events(&c).contains(&DeviceEvent::ExerciseReady { exercise_id: 1234 }));

        c.sink_mut().clear();
        let mut now = 0;
        for _ in 0..12 {
            detect(&mut c, 1234, 80.0, now);
            now += 150;
        }
        let scans: Vec<_> = events(&c)
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Scan { exercise_name, .. } => Some(exercise_name),
                _ => None,
            })
            .collect();
        assert_eq!(scans.len(), 12);
        assert!(scans.iter().all(|n| n.as_deref() == Some("Bench")));
    }

    #[test]
    fn test_payload_for_other_marker_is_ignored() {
        let mut c = controller_with(live_config());
        assert!(!c.handle_exercise_payload(payload(1, "Row"), 0));

        detect(&mut c, 1, 80.0, 0);
        c.sink_mut().clear();
        assert!(!c.handle_exercise_payload(payload(2, "Row"), 0));
        assert!(c.sink().is_empty());
        assert_eq!(c.mode(), DeviceMode::AwaitingExercise);
    }

    #[test]
    fn test_reps_before_metadata_carry_over() {
        let mut c = controller_with(live_config());
        for (i, d) in [80.0, 60.0, 70.0, 80.0].into_iter().enumerate() {
            detect(&mut c, 5, d, i as u64 * 100);
        }
        assert!(c.handle_exercise_payload(payload(5, "Row"), 400));
        for (i, d) in [60.0, 70.0, 80.0].into_iter().enumerate() {
            detect(&mut c, 5, d, 500 + i as u64 * 100);
        }

        assert_eq!(reps(&c), vec![(1, None), (2, Some("Row".to_owned()))]);
    }

    #[test]
    fn test_no_scan_before_metadata() {
        let mut c = controller_with(live_config());
        detect(&mut c, 5, 80.0, 0);
        detect(&mut c, 5, 79.0, 100);
        assert!(!events(&c)
            .iter()
            .any(|e| matches!(e, DeviceEvent::Scan { .. })));
    }

    #[test]
    fn test_frame_interval() {
        let mut c = controller_with(live_config());
        assert_eq!(c.frame_interval_ms(), 83);

        c.set_target_fps(2.0, 0);
        assert_eq!(c.frame_interval_ms(), 250);

        c.set_target_fps(30.0, 0);
        assert_eq!(c.frame_interval_ms(), 33);

        detect(&mut c, 1, 80.0, 0);
        c.evaluate_timeouts(20_000);
        assert_eq!(c.mode(), DeviceMode::Loiter);
        assert_eq!(c.frame_interval_ms(), 3000);

        let fast = controller_with(ControllerConfig {
            target_fps: 500.0,
            ..live_config()
        });
        assert_eq!(fast.frame_interval_ms(), 10);

        let stopped = controller_with(ControllerConfig {
            target_fps: 0.0,
            ..live_config()
        });
        assert_eq!(stopped.frame_interval_ms(), 125);
    }

    #[test]
    fn test_settings_write_through_and_reload() {
        let store = MemorySettingsStore::new();
        let mut c: TestController =
            DeviceController::new(live_config(), Vec::new(), Box::new(store.clone()));
        c.set_target_fps(20.0, 0);
        c.set_loiter_fps(2.0, 0);
        c.set_min_travel(15.0, 0);
        c.set_max_rep_idle_ms(2500, 0);

        let stored = store.load().unwrap();
        assert_eq!(stored.target_fps, Some(20.0));
        assert_eq!(stored.max_rep_idle_ms, Some(2500));

        let reloaded: TestController =
            DeviceController::new(live_config(), Vec::new(), Box::new(store));
        assert!((reloaded.target_fps() - 20.0).abs() < f32::EPSILON);
        assert!((reloaded.loiter_fps() - 2.0).abs() < f32::EPSILON);
        assert!((reloaded.rep_counter().min_travel_cm() - 15.0).abs() < f32::EPSILON);
        assert_eq!(reloaded.rep_counter().max_idle_ms(), 2500);
        assert!(reloaded.sink().is_empty());
    }

    #[test]
    fn test_invalid_persisted_values_are_ignored() {
        let store = MemorySettingsStore::with_settings(PersistedSettings {
            target_fps: Some(99.0),
            min_travel_cm: Some(0.0),
            ..PersistedSettings::default()
        });
        let c: TestController = DeviceController::new(live_config(), Vec::new(), Box::new(store));
        assert!((c.target_fps() - 12.0).abs() < f32::EPSILON);
        assert!((c.rep_counter().min_travel_cm() - 12.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_factory_reset_restores_defaults() {
        let store = MemorySettingsStore::new();
        let mut c: TestController =
            DeviceController::new(live_config(), Vec::new(), Box::new(store.clone()));
        c.set_target_fps(25.0, 0);
        c.set_min_travel(30.0, 0);
        c.sink_mut().clear();

        c.factory_reset(10);
        assert!((c.target_fps() - 12.0).abs() < f32::EPSILON);
        assert!((c.rep_counter().min_travel_cm() - 12.0).abs() < f32::EPSILON);
        assert!(store.load().unwrap().is_empty());
        assert_eq!(labels(&c), vec!["factoryReset"]);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut c = controller_with(live_config());
        let idle = c.snapshot();
        assert_eq!(idle.mode, DeviceMode::Idle);
        assert_eq!(idle.marker_id, None);

        detect(&mut c, 9, 80.0, 0);
        c.handle_exercise_payload(payload(9, "Curl"), 0);
        c.publish_snapshot(5);

        match events(&c).last() {
            Some(DeviceEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.mode, DeviceMode::Scanning);
                assert_eq!(snapshot.marker_id, Some(9));
                assert!(snapshot.metadata_ready);
                assert_eq!(snapshot.exercise_name.as_deref(), Some("Curl"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_boot_and_timestamps() {
        let mut c = controller_with(live_config());
        c.publish_boot(42);
        let message = &c.sink()[0];
        assert_eq!(message.timestamp_ms, 42);
        assert_eq!(
            message.event,
            DeviceEvent::Boot {
                test_mode: false,
                mode: DeviceMode::Idle,
                fps: 12.0
            }
        );
    }
}
