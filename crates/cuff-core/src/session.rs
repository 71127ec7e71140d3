//! Station engagement tracking.
//!
//! An [`EngagementSession`] records which marker the cuff is bound to, whether
//! the exercise details for it have arrived, and when they were last asked for.

use crate::types::{ExerciseName, MetadataList};

/// Minimum spacing between two exercise requests for the same marker.
pub const REQUEST_RETRY_MS: u64 = 1000;

/// The station the cuff is currently engaged with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementSession {
    /// A marker is bound.
    pub active: bool,
    /// Exercise details have been applied.
    pub metadata_ready: bool,
    /// At least one exercise request has gone out.
    pub request_sent: bool,
    /// Bound marker id.
    pub marker_id: u32,
    /// Exercise name, empty until details arrive.
    pub name: ExerciseName,
    /// Exercise metadata, empty until details arrive.
    pub metadata: MetadataList,
    /// Last time the marker was in view.
    pub last_seen_ms: u64,
    /// Last time an exercise request was sent.
    pub last_request_ms: u64,
}

impl EngagementSession {
    /// Create an empty, inactive session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Start a fresh session bound to `marker_id`.
    pub fn bind(&mut self, marker_id: u32, now_ms: u64) {
        self.reset();
        self.active = true;
        self.marker_id = marker_id;
        self.last_seen_ms = now_ms;
    }

    /// `true` if a detection of `marker_id` has to start a new session.
    #[must_use]
    pub const fn needs_rebind(&self, marker_id: u32) -> bool {
        !self.active || self.marker_id != marker_id
    }

    /// Record that the marker was seen.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen_ms = now_ms;
    }

    /// Store exercise details for `marker_id` and mark them ready.
    ///
    /// Counts as a completed request so no further requests are sent.
    pub fn apply_metadata(
        &mut self,
        marker_id: u32,
        name: ExerciseName,
        metadata: MetadataList,
        now_ms: u64,
    ) {
        self.marker_id = marker_id;
        self.metadata_ready = true;
        self.request_sent = true;
        self.last_request_ms = now_ms;
        self.name = name;
        self.metadata = metadata;
        self.last_seen_ms = now_ms;
    }

    /// `true` if an exercise request should go out now.
    #[must_use]
    pub const fn should_request(&self, now_ms: u64) -> bool {
        !self.metadata_ready
            && (!self.request_sent || now_ms.saturating_sub(self.last_request_ms) >= REQUEST_RETRY_MS)
    }

    /// Record that an exercise request was sent.
    pub fn mark_requested(&mut self, now_ms: u64) {
        self.request_sent = true;
        self.last_request_ms = now_ms;
    }

    /// `true` if the marker has been out of view for longer than `lost_after_ms`.
    #[must_use]
    pub const fn is_lost(&self, now_ms: u64, lost_after_ms: u64) -> bool {
        self.active && now_ms.saturating_sub(self.last_seen_ms) > lost_after_ms
    }

    /// Exercise name, if details have arrived and the name is not empty.
    #[must_use]
    pub fn exercise_name(&self) -> Option<&ExerciseName> {
        (self.metadata_ready && !self.name.is_empty()).then_some(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{bounded, MetadataEntry};

    fn bench() -> (ExerciseName, MetadataList) {
        let mut metadata = MetadataList::new();
        metadata
            .push(MetadataEntry::new("muscleGroup", "Chest").unwrap())
            .unwrap();
        (bounded("Bench").unwrap(), metadata)
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = EngagementSession::new();
        assert!(!session.active);
        assert!(session.needs_rebind(0));
        assert_eq!(session.exercise_name(), None);
    }

    #[test]
    fn test_bind_clears_previous_details() {
        let mut session = EngagementSession::new();
        let (name, metadata) = bench();
        session.bind(1, 0);
        session.apply_metadata(1, name, metadata, 10);

        session.bind(2, 50);
        assert!(session.active);
        assert_eq!(session.marker_id, 2);
        assert!(!session.metadata_ready);
        assert!(!session.request_sent);
        assert!(session.metadata.is_empty());
        assert_eq!(session.last_seen_ms, 50);
    }

    #[test]
    fn test_rebind_only_for_other_marker() {
        let mut session = EngagementSession::new();
        session.bind(7, 0);
        assert!(!session.needs_rebind(7));
        assert!(session.needs_rebind(8));
    }

    #[test]
    fn test_request_retry_spacing() {
        let mut session = EngagementSession::new();
        session.bind(3, 0);
        assert!(session.should_request(0));

        session.mark_requested(0);
        assert!(!session.should_request(999));
        assert!(session.should_request(1000));
    }

    #[test]
    fn test_no_requests_once_metadata_ready() {
        let mut session = EngagementSession::new();
        let (name, metadata) = bench();
        session.bind(3, 0);
        session.apply_metadata(3, name, metadata, 0);
        assert!(!session.should_request(10_000));
        assert_eq!(session.exercise_name().map(|n| n.as_str()), Some("Bench"));
    }

    #[test]
    fn test_empty_name_is_not_reported() {
        let mut session = EngagementSession::new();
        session.bind(3, 0);
        session.apply_metadata(3, ExerciseName::new(), MetadataList::new(), 0);
        assert_eq!(session.exercise_name(), None);
    }

    #[test]
    fn test_lost_is_strictly_after_timeout() {
        let mut session = EngagementSession::new();
        assert!(!session.is_lost(1_000_000, 10));

        session.bind(3, 0);
        assert!(!session.is_lost(2000, 2000));
        assert!(session.is_lost(2001, 2000));

        session.touch(2001);
        assert!(!session.is_lost(2001, 2000));
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut session = EngagementSession::new();
        let (name, metadata) = bench();
        session.bind(9, 5);
        session.apply_metadata(9, name, metadata, 6);
        session.reset();
        assert_eq!(session, EngagementSession::default());
    }
}
