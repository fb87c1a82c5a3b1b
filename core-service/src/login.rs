//! Login gate over the progressive lockout.

use core_gateway::Actor;
use tracing::{info, warn};

use crate::CoreService;

/// Whether a sign-in attempt for an actor may be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginGate {
    Allowed,
    /// Reject without checking credentials; retry after the given seconds.
    Locked { retry_after_secs: u64 },
}

impl LoginGate {
    fn from_delay(delay_secs: u64) -> Self {
        if delay_secs == 0 {
            LoginGate::Allowed
        } else {
            LoginGate::Locked {
                retry_after_secs: delay_secs,
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginGate::Allowed)
    }
}

impl CoreService {
    /// Check the lockout for `actor` before verifying credentials.
    pub fn check_login(&self, actor: &Actor) -> LoginGate {
        LoginGate::from_delay(self.lockout().get_delay(actor.as_str()))
    }

    /// Record a failed sign-in. Returns the gate for the next attempt.
    pub fn login_failed(&self, actor: &Actor) -> LoginGate {
        let gate = LoginGate::from_delay(self.lockout().record_failure(actor.as_str()));
        if let LoginGate::Locked { retry_after_secs } = gate {
            warn!(actor = %actor, retry_after_secs, "Login locked out");
        }
        gate
    }

    /// Record a successful sign-in, clearing the actor's failure history.
    pub fn login_succeeded(&self, actor: &Actor) {
        self.lockout().record_success(actor.as_str());
        info!(actor = %actor, "Login succeeded");
    }
}
