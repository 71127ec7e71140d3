//! Synthetic detections for test mode.
//!
//! Produces a triangle wave between [`BOTTOM_CM`] and [`TOP_CM`] so the whole
//! pipeline (session, rep counting, events) can run without a camera.

use crate::types::Detection;

/// Furthest simulated distance.
pub const BOTTOM_CM: f32 = 85.0;
/// Closest simulated distance.
pub const TOP_CM: f32 = 35.0;
/// Distance change per generated sample.
pub const STEP_CM: f32 = 5.0;

/// Deterministic triangle-wave detection source.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSimulator {
    active: bool,
    distance_cm: f32,
    moving_up: bool,
}

impl Default for DetectionSimulator {
    fn default() -> Self {
        Self {
            active: false,
            distance_cm: BOTTOM_CM,
            moving_up: true,
        }
    }
}

impl DetectionSimulator {
    /// Create an inactive simulator at the bottom of the wave.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Go back to the bottom of the wave and stop.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Go back to the bottom of the wave, staying active.
    pub fn rewind(&mut self) {
        self.reset();
        self.active = true;
    }

    /// `true` once a session has been started or a sample generated.
    #[must_use]
    pub const fn active(&self) -> bool {
        self.active
    }

    /// Current simulated distance.
    #[must_use]
    pub const fn distance_cm(&self) -> f32 {
        self.distance_cm
    }

    /// Advance one step and write the sample into `detection`. Always succeeds.
    pub fn generate(&mut self, marker_id: u32, detection: &mut Detection) -> bool {
        self.active = true;
        if self.moving_up {
            self.distance_cm -= STEP_CM;
            if self.distance_cm <= TOP_CM {
                self.distance_cm = TOP_CM;
                self.moving_up = false;
            }
        } else {
            self.distance_cm += STEP_CM;
            if self.distance_cm >= BOTTOM_CM {
                self.distance_cm = BOTTOM_CM;
                self.moving_up = true;
            }
        }

        detection.marker_id = marker_id;
        detection.distance_cm = self.distance_cm;
        true
    }

    /// Convenience wrapper around [`generate`](Self::generate).
    pub fn next_detection(&mut self, marker_id: u32) -> Detection {
        let mut detection = Detection::default();
        self.generate(marker_id, &mut detection);
        detection
    }
}
