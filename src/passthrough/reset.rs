// Scoped SCSI resets through SG_SCSI_RESET

use super::sg::{ResetOp, ResetState, SgTransport};
use crate::{DeviceError, DeviceIdentity, DeviceResult, OsHandle};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::os::unix::io::AsRawFd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetScope {
    Device,
    Bus,
    /// Host adapter reset; affects every device behind the controller
    Controller,
}

impl ResetScope {
    fn op(self) -> ResetOp {
        match self {
            ResetScope::Device => ResetOp::Device,
            ResetScope::Bus => ResetOp::Bus,
            ResetScope::Controller => ResetOp::Host,
        }
    }
}

/// Issue a scoped reset and wait for the device to leave the busy state.
///
/// With `poll_limit` of `None` the wait keeps polling for as long as the
/// device was last seen busy: an accepted status query does not by itself end
/// the wait, so a device that never reports a fresh state keeps the caller
/// here. `Some(n)` trusts the state each query reports and gives up with
/// `Blocked` after `n` busy answers.
pub fn reset(
    sg: &dyn SgTransport,
    device: &mut DeviceIdentity,
    scope: ResetScope,
    poll_limit: Option<u32>,
) -> DeviceResult<()> {
    let fd = match &device.os_handle {
        Some(OsHandle::Scsi(file)) => file.as_raw_fd(),
        _ => {
            return Err(DeviceError::BadParameter(format!(
                "{} has no open SCSI handle",
                device.name
            )))
        }
    };

    tracing::info!(device = %device.name, scope = ?scope, "Issuing SCSI reset");

    let state = match sg.scsi_reset(fd, scope.op()) {
        Ok(state) => state,
        Err(errno) => {
            device.last_error = Some(errno as i32);
            tracing::debug!(device = %device.name, error = %errno, "Reset failure");
            return Err(if errno == Errno::EAFNOSUPPORT {
                DeviceError::NotSupported(format!("{:?} reset: {}", scope, errno.desc()))
            } else {
                DeviceError::Blocked(format!("{:?} reset: {}", scope, errno.desc()))
            });
        }
    };

    let mut busy = state == ResetState::Busy;
    let mut polls: u32 = 0;

    if busy {
        tracing::debug!(device = %device.name, "Reset in progress, polling for completion");
    }

    while busy {
        if let Some(limit) = poll_limit {
            if polls >= limit {
                tracing::warn!(device = %device.name, polls, "Device still busy after reset");
                return Err(DeviceError::Blocked(format!(
                    "{} still busy after {} reset polls",
                    device.name, polls
                )));
            }
        }
        polls += 1;

        busy = match sg.scsi_reset(fd, ResetOp::Nothing) {
            Err(Errno::EBUSY) => true,
            Err(errno) => {
                tracing::debug!(error = %errno, "Reset poll ended");
                false
            }
            // only a bounded wait takes the reported state at face value
            Ok(state) if poll_limit.is_some() => state == ResetState::Busy,
            Ok(_) => true,
        };
    }

    device.last_error = Some(0);
    tracing::info!(device = %device.name, polls, "Reset complete");
    Ok(())
}
