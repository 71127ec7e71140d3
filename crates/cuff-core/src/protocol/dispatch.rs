//! Inbound command dispatch.
//!
//! Each command maps to one controller call. Commands that change settings
//! are followed by a fresh [`Snapshot`](super::DeviceEvent::Snapshot) so the
//! controller's view stays current. Nothing here blocks or fails loudly:
//! rejected frames are logged and leave the controller untouched.

use tracing::{debug, info, warn};

use super::codec::decode_command_frame;
use super::{status_label, DeviceCommand, DeviceEvent};
use crate::controller::{DeviceController, EventSink};
use crate::error::CuffError;
use crate::types::ExercisePayload;

/// Restart reason after a shutdown request.
pub const RESTART_POWER_OFF: &str = "power-off";

/// Restart reason after a factory reset.
pub const RESTART_FACTORY_RESET: &str = "factory-reset";

/// What came of one inbound command.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The controller accepted the command.
    Applied,
    /// The command was valid but had no effect.
    Ignored,
    /// The command was applied and the device should restart for `reason`.
    Restart(String),
    /// The frame never reached the controller.
    Rejected(CuffError),
}

impl DispatchOutcome {
    /// The restart reason, if one was requested.
    #[must_use]
    pub fn restart_reason(&self) -> Option<&str> {
        match self {
            Self::Restart(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Decode one framed command and apply it.
///
/// This is the entry point for every frame the link delivers. A frame that
/// fails framing or decoding changes nothing: the error is logged (`info`
/// for a command this build does not know, `warn` otherwise) and returned
/// as [`DispatchOutcome::Rejected`].
///
/// # Arguments
///
/// * `controller` - The controller to apply the command to
/// * `frame` - One complete frame, length prefix included
/// * `now_ms` - Current loop time, stamped on any emitted event
///
/// # Returns
///
/// The [`DispatchOutcome`]; callers act on
/// [`DispatchOutcome::Restart`] by scheduling a deferred restart.
pub fn handle_command_frame<S: EventSink>(
    controller: &mut DeviceController<S>,
    frame: &[u8],
    now_ms: u64,
) -> DispatchOutcome {
    match decode_command_frame(frame) {
        Ok(command) => dispatch_command(controller, command, now_ms),
        Err(e) => {
            if matches!(e, CuffError::UnknownCommand) {
                info!(error = %e, "ignoring unknown command");
            } else {
                warn!(error = %e, code = e.error_code(), len = frame.len(), "rejecting frame");
            }
            DispatchOutcome::Rejected(e)
        }
    }
}

/// Apply a decoded command.
pub fn dispatch_command<S: EventSink>(
    controller: &mut DeviceController<S>,
    command: DeviceCommand,
    now_ms: u64,
) -> DispatchOutcome {
    debug!(command = command.name(), now_ms, "dispatch");

    match command {
        DeviceCommand::SetTestMode { enabled } => {
            let accepted = controller.set_test_mode(enabled, now_ms);
            refresh_if(controller, accepted, now_ms)
        }
        DeviceCommand::SetTargetFps { fps } => {
            let accepted = controller.set_target_fps(fps, now_ms);
            refresh_if(controller, accepted, now_ms)
        }
        DeviceCommand::ExerciseUpdate {
            exercise_id,
            name,
            min_travel_cm,
            fps,
            metadata,
        } => {
            let payload = ExercisePayload {
                id: exercise_id,
                name,
                metadata: metadata.unwrap_or_default(),
                min_travel_cm,
                fps,
            };
            if controller.handle_exercise_payload(payload, now_ms) {
                DispatchOutcome::Applied
            } else {
                DispatchOutcome::Ignored
            }
        }
        DeviceCommand::ResetReps => {
            controller.reset_reps(now_ms);
            refresh_if(controller, true, now_ms)
        }
        DeviceCommand::Power { shutdown } => {
            if !shutdown {
                debug!("power command without shutdown");
                return DispatchOutcome::Ignored;
            }
            controller.publish(now_ms, DeviceEvent::PowerEvent { shutdown: true });
            DispatchOutcome::Restart(RESTART_POWER_OFF.to_owned())
        }
        DeviceCommand::FactoryReset { confirm } => {
            if !confirm {
                info!("unconfirmed factory reset ignored");
                return DispatchOutcome::Ignored;
            }
            controller.factory_reset(now_ms);
            DispatchOutcome::Restart(RESTART_FACTORY_RESET.to_owned())
        }
        DeviceCommand::UpdateDeviceConfig {
            target_fps,
            loiter_fps,
            min_travel_cm,
            max_rep_idle_ms,
        } => {
            let mut accepted = false;
            if let Some(fps) = target_fps {
                accepted |= controller.set_target_fps(fps, now_ms);
            }
            if let Some(fps) = loiter_fps {
                accepted |= controller.set_loiter_fps(fps, now_ms);
            }
            if let Some(cm) = min_travel_cm {
                accepted |= controller.set_min_travel(cm, now_ms);
            }
            if let Some(ms) = max_rep_idle_ms {
                accepted |= controller.set_max_rep_idle_ms(u64::from(ms), now_ms);
            }
            refresh_if(controller, accepted, now_ms)
        }
        DeviceCommand::SnapshotRequest => {
            controller.publish_snapshot(now_ms);
            DispatchOutcome::Applied
        }
        DeviceCommand::TakePhoto | DeviceCommand::StartVideo | DeviceCommand::StopVideo => {
            debug!(command = command.name(), "camera capture not available");
            DispatchOutcome::Ignored
        }
        DeviceCommand::OtaBegin { .. }
        | DeviceCommand::OtaChunk { .. }
        | DeviceCommand::OtaComplete { .. } => {
            info!(command = command.name(), "firmware update not supported");
            controller.publish(
                now_ms,
                DeviceEvent::OtaStatus {
                    accepted: false,
                    reason: status_label("unsupported"),
                },
            );
            DispatchOutcome::Ignored
        }
    }
}

fn refresh_if<S: EventSink>(
    controller: &mut DeviceController<S>,
    accepted: bool,
    now_ms: u64,
) -> DispatchOutcome {
    if accepted {
        controller.publish_snapshot(now_ms);
        DispatchOutcome::Applied
    } else {
        DispatchOutcome::Ignored
    }
}
