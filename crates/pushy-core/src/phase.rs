use std::sync::{Mutex, PoisonError};

use crate::config::Config;
use crate::outcome::StatusCode;

/// Where the client is in its update lifecycle.
///
/// Checking and the two updating phases never overlap: a check ends before a
/// download it triggers takes over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    /// Interactive or forced download/install in flight.
    Updating,
    SilentUpdating,
    /// Silent install finished. Stays here until the process restarts.
    SilentUpdated,
}

impl UpdatePhase {
    /// Status returned to a caller who tries to check while in this phase.
    #[must_use]
    pub fn busy_status(self) -> Option<StatusCode> {
        match self {
            UpdatePhase::Idle => None,
            UpdatePhase::Checking => Some(StatusCode::AlreadyChecking),
            UpdatePhase::SilentUpdating => Some(StatusCode::AlreadySilentUpdating),
            UpdatePhase::SilentUpdated => Some(StatusCode::AlreadyUpdatedPendingRestart),
            UpdatePhase::Updating => Some(StatusCode::AlreadyUpdating),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PhaseMachine {
    phase: Mutex<UpdatePhase>,
}

impl PhaseMachine {
    pub(crate) fn current(&self) -> UpdatePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the entry guards and claim the Checking phase in one step.
    ///
    /// Phase guards come before config guards, so a busy client reports
    /// busy even when it has since been disabled.
    pub(crate) fn begin_check(&self, config: &Config) -> Result<(), StatusCode> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(status) = phase.busy_status() {
            return Err(status);
        }
        if !config.update_enabled {
            return Err(StatusCode::UpdateDisabled);
        }
        if config.update_url.trim().is_empty() {
            return Err(StatusCode::NoEndpointConfigured);
        }
        if config.project_id.trim().is_empty() {
            return Err(StatusCode::NoProjectId);
        }

        *phase = UpdatePhase::Checking;
        Ok(())
    }

    /// Move to `to` if the current phase is one of `from`.
    pub(crate) fn transition(&self, from: &[UpdatePhase], to: UpdatePhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if from.contains(&*phase) {
            *phase = to;
            true
        } else {
            false
        }
    }

    /// Leave Checking unless dispatch already moved on to an update phase.
    pub(crate) fn finish_check(&self) {
        self.transition(&[UpdatePhase::Checking], UpdatePhase::Idle);
    }
}
