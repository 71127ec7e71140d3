//! Repetition counting over a one-dimensional distance signal.
//!
//! A larger distance means the cuff is further from the marker, which is the
//! "bottom" of the movement. A repetition is a travel of at least
//! `min_travel_cm` towards the marker followed by a return to within a
//! quarter of that travel of where it started.
//!
//! The detector is a three-phase hysteresis machine:
//!
//! - [`RepPhase::WaitingBottom`] tracks the furthest distance seen and waits
//!   for the signal to climb `min_travel_cm` above it.
//! - [`RepPhase::Ascending`] follows the closest point reached and waits for a
//!   partial reversal (30 % of the travel) to confirm the top.
//! - [`RepPhase::Descending`] waits for the signal to come back within 25 % of
//!   the travel of the original bottom, then counts the rep.
//!
//! A user who stops mid-movement would otherwise leave the machine stuck, so
//! after `max_idle_ms` without movement the phase falls back to
//! `WaitingBottom` around the current distance.

use tracing::trace;

/// Default minimum travel for a rep, in centimetres.
pub const DEFAULT_MIN_TRAVEL_CM: f32 = 12.0;

/// Default time without movement before the phase is reset.
pub const DEFAULT_MAX_IDLE_MS: u64 = 5000;

/// Changes smaller than this are treated as sensor noise, not movement.
const MOVEMENT_EPSILON_CM: f32 = 0.2;

/// Fraction of the travel that confirms the top of the movement.
const REVERSAL_FRACTION: f32 = 0.3;

/// How close to the original bottom the return has to get.
const RETURN_TOLERANCE_FRACTION: f32 = 0.25;

/// Phase of the rep detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepPhase {
    /// Waiting for the signal to leave the bottom.
    #[default]
    WaitingBottom,
    /// Moving towards the marker.
    Ascending,
    /// Returning to the bottom.
    Descending,
}

/// Reference points, all established by the first sample after a reset.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tracking {
    bottom_ref: f32,
    peak_distance: f32,
    descent_target: f32,
    last_distance: f32,
}

impl Tracking {
    const fn seeded(distance: f32) -> Self {
        Self {
            bottom_ref: distance,
            peak_distance: distance,
            descent_target: distance,
            last_distance: distance,
        }
    }

    fn reseed(&mut self, distance: f32) {
        self.bottom_ref = distance;
        self.peak_distance = distance;
        self.descent_target = distance;
    }
}

/// Counts repetitions from `(distance, time)` samples.
#[derive(Debug, Clone)]
pub struct RepCounter {
    phase: RepPhase,
    reps: u32,
    min_travel_cm: f32,
    max_idle_ms: u64,
    tracking: Option<Tracking>,
    last_movement_ms: u64,
}

impl Default for RepCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TRAVEL_CM, DEFAULT_MAX_IDLE_MS)
    }
}

impl RepCounter {
    /// Create a counter. Non-positive arguments fall back to the defaults.
    #[must_use]
    pub fn new(min_travel_cm: f32, max_idle_ms: u64) -> Self {
        let mut counter = Self {
            phase: RepPhase::WaitingBottom,
            reps: 0,
            min_travel_cm: DEFAULT_MIN_TRAVEL_CM,
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            tracking: None,
            last_movement_ms: 0,
        };
        counter.set_min_travel(min_travel_cm);
        counter.set_max_idle_ms(max_idle_ms);
        counter
    }

    /// Forget all tracking state and restart counting from `start_count`.
    pub fn reset(&mut self, start_count: u32) {
        self.reps = start_count;
        self.phase = RepPhase::WaitingBottom;
        self.tracking = None;
        self.last_movement_ms = 0;
    }

    /// Repetitions counted since the last reset.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.reps
    }

    /// Current detector phase.
    #[must_use]
    pub const fn phase(&self) -> RepPhase {
        self.phase
    }

    /// Travel required for a rep, in centimetres.
    #[must_use]
    pub const fn min_travel_cm(&self) -> f32 {
        self.min_travel_cm
    }

    /// Idle time after which the phase is reset.
    #[must_use]
    pub const fn max_idle_ms(&self) -> u64 {
        self.max_idle_ms
    }

    /// Set the travel required for a rep. Ignored unless positive.
    pub fn set_min_travel(&mut self, travel_cm: f32) {
        if travel_cm > 0.0 {
            self.min_travel_cm = travel_cm;
        }
    }

    /// Set the idle timeout. Ignored if zero.
    pub fn set_max_idle_ms(&mut self, max_idle_ms: u64) {
        if max_idle_ms > 0 {
            self.max_idle_ms = max_idle_ms;
        }
    }

    /// Feed one sample. Returns `true` exactly when this sample completed a rep.
    pub fn update(&mut self, distance: f32, now_ms: u64) -> bool {
        let Some(mut t) = self.tracking else {
            self.tracking = Some(Tracking::seeded(distance));
            self.last_movement_ms = now_ms;
            trace!(distance, "rep tracking seeded");
            return false;
        };

        if (distance - t.last_distance).abs() > MOVEMENT_EPSILON_CM {
            self.last_movement_ms = now_ms;
        }
        t.last_distance = distance;
        t.bottom_ref = t.bottom_ref.max(distance);

        let mut completed = false;
        match self.phase {
            RepPhase::WaitingBottom => {
                if t.bottom_ref - distance >= self.min_travel_cm {
                    self.phase = RepPhase::Ascending;
                    t.peak_distance = distance;
                    t.descent_target = t.bottom_ref;
                    trace!(distance, target = t.descent_target, "phase -> ascending");
                }
            }
            RepPhase::Ascending => {
                t.peak_distance = t.peak_distance.min(distance);
                if distance - t.peak_distance >= self.min_travel_cm * REVERSAL_FRACTION {
                    self.phase = RepPhase::Descending;
                    trace!(distance, peak = t.peak_distance, "phase -> descending");
                }
            }
            RepPhase::Descending => {
                t.bottom_ref = t.bottom_ref.max(distance);
                if distance >= t.descent_target - self.min_travel_cm * RETURN_TOLERANCE_FRACTION {
                    self.reps = self.reps.saturating_add(1);
                    self.phase = RepPhase::WaitingBottom;
                    t.reseed(distance);
                    self.last_movement_ms = now_ms;
                    completed = true;
                    trace!(distance, reps = self.reps, "rep completed");
                }
            }
        }

        if now_ms.saturating_sub(self.last_movement_ms) > self.max_idle_ms {
            if self.phase != RepPhase::WaitingBottom {
                trace!(distance, "idle timeout, phase -> waiting bottom");
            }
            self.phase = RepPhase::WaitingBottom;
            t.reseed(distance);
        }

        self.tracking = Some(t);
        completed
    }
}
