//! The device poll loop.
//!
//! [`Runtime`] owns the controller and everything the controller consults.
//! The link task never touches the controller; it posts [`Inbound`] messages
//! and the loop drains them at the start of each [`Runtime::tick`].

use cuff_core::protocol::{handle_command_frame, DispatchOutcome};
use cuff_core::{
    DetectionSource, DeviceController, EventSink, NeverThrottle, NoCamera, ResetScheduler,
    ThrottleAdvisor,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// How often the binary calls [`Runtime::tick`].
pub const TICK_INTERVAL_MS: u64 = 10;

/// Messages from the link task to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete command frame, length prefix included.
    Frame(Vec<u8>),
    /// A controller connected.
    Connected,
    /// The controller went away.
    Disconnected,
}

/// What the owner of the loop should do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking.
    Continue,
    /// Stop and restart the device.
    Restart(String),
}

/// Poll loop state.
pub struct Runtime<S: EventSink> {
    controller: DeviceController<S>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    source: Box<dyn DetectionSource + Send>,
    throttle: Box<dyn ThrottleAdvisor + Send>,
    scheduler: ResetScheduler,
    last_capture_ms: Option<u64>,
    notify_pending: bool,
    connected: bool,
}

impl<S: EventSink> std::fmt::Debug for Runtime<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("controller", &self.controller)
            .field("scheduler", &self.scheduler)
            .field("last_capture_ms", &self.last_capture_ms)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl<S: EventSink> Runtime<S> {
    /// Create a loop with no camera, no throttling and the default restart
    /// grace period.
    ///
    /// # Arguments
    ///
    /// * `controller` - The controller this loop drives. It is owned here and
    ///   nowhere else.
    /// * `inbox` - Receiving end of the link task's [`Inbound`] channel
    ///
    /// Use [`with_source`](Self::with_source),
    /// [`with_throttle`](Self::with_throttle) and
    /// [`with_reset_grace`](Self::with_reset_grace) to replace the defaults.
    pub fn new(controller: DeviceController<S>, inbox: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self {
            controller,
            inbox,
            source: Box::new(NoCamera),
            throttle: Box::new(NeverThrottle),
            scheduler: ResetScheduler::default(),
            last_capture_ms: None,
            notify_pending: false,
            connected: false,
        }
    }

    /// Use `source` for live detections.
    #[must_use]
    pub fn with_source(mut self, source: impl DetectionSource + Send + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Consult `throttle` before each capture.
    #[must_use]
    pub fn with_throttle(mut self, throttle: impl ThrottleAdvisor + Send + 'static) -> Self {
        self.throttle = Box::new(throttle);
        self
    }

    /// Delay restarts by `grace_ms`.
    #[must_use]
    pub fn with_reset_grace(mut self, grace_ms: u64) -> Self {
        self.scheduler = ResetScheduler::new(grace_ms);
        self
    }

    /// The controller.
    pub const fn controller(&self) -> &DeviceController<S> {
        &self.controller
    }

    /// The controller, mutably.
    pub fn controller_mut(&mut self) -> &mut DeviceController<S> {
        &mut self.controller
    }

    /// Whether a controller is connected.
    pub const fn connected(&self) -> bool {
        self.connected
    }

    /// The restart scheduler.
    pub const fn scheduler(&self) -> &ResetScheduler {
        &self.scheduler
    }

    /// Run one pass of the loop at `now_ms`.
    ///
    /// # Order
    ///
    /// 1. Drain the inbox, applying every queued frame and link change
    /// 2. Send the pending `connected` status and `Boot` event, if any
    /// 3. Keep the synthetic test session running
    /// 4. Capture one detection if a frame interval has passed and the
    ///    throttle allows it
    /// 5. Evaluate marker and rep timeouts
    /// 6. Service the restart scheduler
    ///
    /// A tick that applied at least one command frame counts as busy, which
    /// postpones a pending restart so the reply can leave first.
    ///
    /// # Returns
    ///
    /// [`TickOutcome::Restart`] with the requested reason once a scheduled
    /// restart is due, otherwise [`TickOutcome::Continue`].
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let mut busy = false;
        while let Ok(message) = self.inbox.try_recv() {
            busy |= matches!(message, Inbound::Frame(_));
            self.handle_inbound(message, now_ms);
        }

        if std::mem::take(&mut self.notify_pending) {
            self.controller.publish_status("connected", now_ms);
            self.controller.publish_boot(now_ms);
        }

        self.controller.maintain_test_mode(now_ms);

        if self.capture_due(now_ms) {
            if self.throttle.should_throttle(now_ms) {
                debug!(now_ms, "capture throttled");
            } else {
                self.last_capture_ms = Some(now_ms);
                self.capture(now_ms);
            }
        }

        self.controller.evaluate_timeouts(now_ms);

        match self.scheduler.service(now_ms, busy) {
            Some(reason) => TickOutcome::Restart(reason),
            None => TickOutcome::Continue,
        }
    }

    /// Apply one inbound message immediately.
    ///
    /// Frames are decoded and dispatched; a power-off or factory reset is
    /// handed to the restart scheduler. `Connected` queues the status
    /// notification for the next tick, `Disconnected` cancels it.
    pub fn handle_inbound(&mut self, message: Inbound, now_ms: u64) {
        match message {
            Inbound::Frame(frame) => {
                if let DispatchOutcome::Restart(reason) =
                    handle_command_frame(&mut self.controller, &frame, now_ms)
                {
                    self.scheduler.request(&reason, now_ms);
                }
            }
            Inbound::Connected => {
                info!("controller connected");
                self.connected = true;
                self.notify_pending = true;
            }
            Inbound::Disconnected => {
                info!("controller disconnected");
                self.connected = false;
                self.notify_pending = false;
            }
        }
    }

    fn capture_due(&self, now_ms: u64) -> bool {
        self.last_capture_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.controller.frame_interval_ms())
    }

    fn capture(&mut self, now_ms: u64) {
        if self.controller.test_mode() {
            self.controller.simulate_detection(now_ms);
        } else if let Some(detection) = self.source.next_detection(now_ms) {
            self.controller.handle_detection(&detection, now_ms);
        } else {
            trace!(now_ms, "no marker in view");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use cuff_core::protocol::encode_frame;
    use cuff_core::{
        ControllerConfig, Detection, DeviceCommand, DeviceEvent, DeviceMessage, DeviceMode,
        MemorySettingsStore,
    };

    use super::*;

    type TestRuntime = Runtime<Vec<DeviceMessage>>;

    fn runtime(config: ControllerConfig) -> (TestRuntime, mpsc::UnboundedSender<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller =
            DeviceController::new(config, Vec::new(), Box::new(MemorySettingsStore::new()));
        (Runtime::new(controller, rx), tx)
    }

    fn frame(command: &DeviceCommand) -> Inbound {
        Inbound::Frame(encode_frame(command).unwrap())
    }

    fn events(runtime: &TestRuntime) -> Vec<DeviceEvent> {
        runtime
            .controller()
            .sink()
            .iter()
            .map(|m| m.event.clone())
            .collect()
    }

    fn counting_source(
        calls: &Arc<AtomicUsize>,
        detection: Option<Detection>,
    ) -> impl FnMut(u64) -> Option<Detection> {
        let calls = Arc::clone(calls);
        move |_now| {
            calls.fetch_add(1, Ordering::SeqCst);
            detection
        }
    }

    #[test]
    fn test_connect_sends_status_and_boot_once() {
        let (mut rt, tx) = runtime(ControllerConfig::default());
        tx.send(Inbound::Connected).unwrap();

        assert_eq!(rt.tick(0), TickOutcome::Continue);
        assert!(rt.connected());
        let events = events(&rt);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status_label(), Some("connected"));
        assert!(matches!(events[1], DeviceEvent::Boot { .. }));

        rt.tick(10);
        assert_eq!(rt.controller().sink().len(), 2);
    }

    #[test]
    fn test_disconnect_before_tick_drops_notification() {
        let (mut rt, tx) = runtime(ControllerConfig::default());
        tx.send(Inbound::Connected).unwrap();
        tx.send(Inbound::Disconnected).unwrap();
        rt.tick(0);
        assert!(!rt.connected());
        assert!(rt.controller().sink().is_empty());
    }

    #[test]
    fn test_captures_follow_frame_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (rt, _tx) = runtime(ControllerConfig::default());
        let mut rt = rt.with_source(counting_source(&calls, None));

        for now in [0, 50, 82, 83, 100, 166] {
            rt.tick(now);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_throttle_skips_capture() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (rt, _tx) = runtime(ControllerConfig::default());
        let mut rt = rt
            .with_source(counting_source(&calls, None))
            .with_throttle(|now: u64| now < 1000);

        rt.tick(0);
        rt.tick(500);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        rt.tick(1000);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_commands_apply_in_tick() {
        let (mut rt, tx) = runtime(ControllerConfig::default());
        tx.send(frame(&DeviceCommand::SetTestMode { enabled: true })).unwrap();
        rt.tick(0);

        assert!(rt.controller().test_mode());
        assert_eq!(rt.controller().mode(), DeviceMode::Scanning);
        assert!(events(&rt).iter().any(|e| matches!(e, DeviceEvent::Scan { .. })));
    }

    #[test]
    fn test_test_mode_counts_reps_without_camera() {
        let (mut rt, _tx) = runtime(ControllerConfig {
            test_mode: true,
            ..ControllerConfig::default()
        });
        let mut now = 0;
        while now < 10_000 {
            rt.tick(now);
            now += TICK_INTERVAL_MS;
        }
        assert!(rt.controller().rep_counter().count() >= 3);
    }

    #[test]
    fn test_bad_frame_changes_nothing() {
        let (mut rt, tx) = runtime(ControllerConfig::default());
        tx.send(Inbound::Frame(vec![0x01])).unwrap();
        tx.send(Inbound::Frame(vec![9, 0, 1])).unwrap();
        assert_eq!(rt.tick(0), TickOutcome::Continue);
        assert!(rt.controller().sink().is_empty());
        assert!(!rt.scheduler().pending());
    }

    #[test]
    fn test_lost_marker_loiters() {
        let (rt, _tx) = runtime(ControllerConfig {
            marker_lost_ms: 2000,
            ..ControllerConfig::default()
        });
        let mut seen = Some(Detection::new(5, 80.0));
        let mut rt = rt.with_source(move |_now: u64| seen.take());

        rt.tick(0);
        assert_eq!(rt.controller().mode(), DeviceMode::AwaitingExercise);
        rt.tick(1000);
        rt.tick(2001);
        assert_eq!(rt.controller().mode(), DeviceMode::Loiter);
    }

    #[test]
    fn test_power_off_restarts_after_grace() {
        let (rt, tx) = runtime(ControllerConfig::default());
        let mut rt = rt.with_reset_grace(1500);
        tx.send(frame(&DeviceCommand::Power { shutdown: true })).unwrap();

        assert_eq!(rt.tick(0), TickOutcome::Continue);
        assert_eq!(rt.scheduler().pending_reason(), Some("power-off"));
        assert!(events(&rt).contains(&DeviceEvent::PowerEvent { shutdown: true }));

        assert_eq!(rt.tick(1499), TickOutcome::Continue);
        assert_eq!(rt.tick(1500), TickOutcome::Restart("power-off".to_owned()));
        assert_eq!(rt.tick(1510), TickOutcome::Continue);
    }

    #[test]
    fn test_factory_reset_restarts() {
        let (rt, tx) = runtime(ControllerConfig::default());
        let mut rt = rt.with_reset_grace(0);
        tx.send(frame(&DeviceCommand::FactoryReset { confirm: true })).unwrap();

        // frames keep the device busy for the tick they arrive in
        assert_eq!(rt.tick(0), TickOutcome::Continue);
        assert_eq!(
            rt.tick(10),
            TickOutcome::Restart("factory-reset".to_owned())
        );
    }
}
