//! Orchestrator state machine
//!
//! ```text
//! Idle -> Compiling -> Rendering -> Validating -> Launching -> Running
//!           \______________\____________\____________\---> Idle (abort)
//! Running -> Idle (stop)
//! Idle -> ConfirmPending -> Wiping -> Idle
//!              \-----------------------> Idle (token mismatch)
//! ```

use std::fmt;

/// Where an orchestrator run currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrchestratorState {
    Idle,
    Compiling,
    Rendering,
    Validating,
    Launching,
    Running,
    ConfirmPending,
    Wiping,
}

impl OrchestratorState {
    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Idle, Compiling)
                | (Compiling, Rendering)
                | (Rendering, Validating)
                | (Validating, Launching)
                | (Launching, Running)
                | (Compiling | Rendering | Validating | Launching, Idle)
                | (Running, Idle)
                | (Idle, ConfirmPending)
                | (ConfirmPending, Wiping)
                | (ConfirmPending, Idle)
                | (Wiping, Idle)
        )
    }

    /// States of the start pipeline that abort back to `Idle` on error
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Compiling | Self::Rendering | Self::Validating | Self::Launching
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Compiling => "compiling",
            Self::Rendering => "rendering",
            Self::Validating => "validating",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::ConfirmPending => "confirm-pending",
            Self::Wiping => "wiping",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
