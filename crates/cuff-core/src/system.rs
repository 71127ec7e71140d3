//! System collaborators the controller loop consults: deferred restarts and
//! capture throttling.

use tracing::{info, warn};

/// Default delay between a restart request and the restart itself.
pub const DEFAULT_RESET_GRACE_MS: u64 = 1500;

/// Reason reported when a restart is requested with an empty reason.
const UNSPECIFIED_REASON: &str = "unspecified";

/// Schedules a restart after a grace period, so the response to the command
/// that caused it can still reach the controller.
#[derive(Debug, Clone)]
pub struct ResetScheduler {
    grace_ms: u64,
    pending: Option<PendingReset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReset {
    reason: String,
    due_ms: u64,
}

impl Default for ResetScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_GRACE_MS)
    }
}

impl ResetScheduler {
    /// Create a scheduler with the given grace period.
    #[must_use]
    pub const fn new(grace_ms: u64) -> Self {
        Self {
            grace_ms,
            pending: None,
        }
    }

    /// Request a restart `grace_ms` from `now_ms`. A later request replaces an
    /// earlier one.
    pub fn request(&mut self, reason: &str, now_ms: u64) {
        let reason = if reason.is_empty() {
            UNSPECIFIED_REASON
        } else {
            reason
        };
        info!(reason, grace_ms = self.grace_ms, "restart scheduled");
        self.pending = Some(PendingReset {
            reason: reason.to_owned(),
            due_ms: now_ms.saturating_add(self.grace_ms),
        });
    }

    /// Check the schedule. Returns the reason exactly once, when the restart is
    /// due. While `busy` the deadline keeps moving out by the grace period.
    pub fn service(&mut self, now_ms: u64, busy: bool) -> Option<String> {
        let pending = self.pending.as_mut()?;

        if busy {
            pending.due_ms = now_ms.saturating_add(self.grace_ms);
            return None;
        }
        if now_ms < pending.due_ms {
            return None;
        }

        let fired = self.pending.take().map(|p| p.reason);
        if let Some(reason) = &fired {
            warn!(reason = %reason, "performing scheduled restart");
        }
        fired
    }

    /// Drop any pending restart.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// `true` while a restart is scheduled.
    #[must_use]
    pub const fn pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Reason of the scheduled restart, if any.
    #[must_use]
    pub fn pending_reason(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.reason.as_str())
    }
}

/// Advisory consulted before every detection capture.
///
/// Returning `true` skips the capture for this tick; the rest of the loop
/// carries on.
pub trait ThrottleAdvisor {
    /// `true` if capture should be skipped at `now_ms`.
    fn should_throttle(&self, now_ms: u64) -> bool;
}

impl<F> ThrottleAdvisor for F
where
    F: Fn(u64) -> bool,
{
    fn should_throttle(&self, now_ms: u64) -> bool {
        self(now_ms)
    }
}

/// Throttle advisory that never throttles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverThrottle;

impl ThrottleAdvisor for NeverThrottle {
    fn should_throttle(&self, _now_ms: u64) -> bool {
        false
    }
}
