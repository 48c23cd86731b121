use super::BridgeError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Installed,
    /// An older bridge still controls the clients.
    Waiting,
    Activating,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    has_controller: bool,
    skip_requested: bool,
}

impl Lifecycle {
    pub fn new(has_controller: bool) -> Self {
        Self {
            state: LifecycleState::Installing,
            has_controller,
            skip_requested: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn transition(&mut self, to: LifecycleState) -> Result<LifecycleState, BridgeError> {
        use LifecycleState::*;
        let allowed = matches!(
            (self.state, to),
            (Installing, Installed)
                | (Installed, Waiting)
                | (Installed, Activating)
                | (Waiting, Activating)
                | (Activating, Active)
        );
        if !allowed {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(to)
    }

    /// Leave `Installed`: wait behind an existing controller unless the
    /// clients already asked to skip waiting.
    pub fn after_install(&mut self) -> Result<LifecycleState, BridgeError> {
        if self.has_controller && !self.skip_requested {
            self.transition(LifecycleState::Waiting)
        } else {
            self.transition(LifecycleState::Activating)
        }
    }

    /// `SKIP_WAITING` from a client. Returns true when it released a waiting
    /// bridge; before that point it is remembered for `after_install`.
    pub fn skip_waiting(&mut self) -> Result<bool, BridgeError> {
        match self.state {
            LifecycleState::Waiting => {
                self.transition(LifecycleState::Activating)?;
                Ok(true)
            }
            LifecycleState::Installing | LifecycleState::Installed => {
                self.skip_requested = true;
                Ok(false)
            }
            LifecycleState::Activating | LifecycleState::Active => Ok(false),
        }
    }
}
