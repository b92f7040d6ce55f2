//! Server lifecycle state machine.
//!
//! ```text
//!          start claimed            unit ready
//!   ┌─────────┐ ────────▶ ┌──────────┐ ────────▶ ┌────────┐
//!   │ Stopped │           │ Starting │           │  Live  │
//!   └─────────┘ ◀──────── └──────────┘           └────────┘
//!     ▲    ▲   launch failed / stale               │   │
//!     │    │                                       │   │ idle
//!     │    └────────────── unit died ──────────────┘   ▼
//!     │                                          ┌──────────┐
//!     └──────────────── terminated ───────────── │ Stopping │
//!                                                └──────────┘
//! ```

use lodestone_core::ServerId;
use lodestone_store::LifecycleState;

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    server_id: &ServerId,
    from: LifecycleState,
    to: LifecycleState,
) -> Result<LifecycleState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            server_id: server_id.clone(),
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::{Live, Starting, Stopped, Stopping};

    matches!(
        (from, to),
        (Stopped, Starting)
            // Starting reverts to Stopped when the launch fails or goes stale
            | (Starting, Live | Stopped)
            // Live goes straight to Stopped when its unit died underneath it
            | (Live, Stopping | Stopped)
            | (Stopping, Stopped)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: LifecycleState) -> Vec<LifecycleState> {
    use LifecycleState::{Live, Starting, Stopped, Stopping};

    match state {
        Stopped => vec![Starting],
        Starting => vec![Live, Stopped],
        Live => vec![Stopping, Stopped],
        Stopping => vec![Stopped],
    }
}

/// Returns true if a compute unit may exist in this state.
#[must_use]
pub const fn is_active(state: LifecycleState) -> bool {
    !matches!(state, LifecycleState::Stopped)
}

/// Returns true for states a healthy server only passes through.
#[must_use]
pub const fn is_transient(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Starting | LifecycleState::Stopping)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> ServerId {
        ServerId::parse("s1").unwrap()
    }

    #[test]
    fn valid_transitions() {
        use LifecycleState::*;

        assert!(is_valid_transition(Stopped, Starting));
        assert!(is_valid_transition(Starting, Live));
        assert!(is_valid_transition(Starting, Stopped));
        assert!(is_valid_transition(Live, Stopping));
        assert!(is_valid_transition(Live, Stopped));
        assert!(is_valid_transition(Stopping, Stopped));
    }

    #[test]
    fn invalid_transitions() {
        use LifecycleState::*;

        // Can't skip the claim
        assert!(!is_valid_transition(Stopped, Live));
        // Can't restart while shutting down
        assert!(!is_valid_transition(Stopping, Starting));
        assert!(!is_valid_transition(Stopping, Live));
        assert!(!is_valid_transition(Live, Starting));
        assert!(!is_valid_transition(Stopped, Stopping));
    }

    #[test]
    fn no_self_transitions() {
        for state in LifecycleState::ALL {
            assert!(!is_valid_transition(state, state));
        }
    }

    #[test]
    fn transitions_from_agrees_with_predicate() {
        for from in LifecycleState::ALL {
            let targets = valid_transitions_from(from);
            for to in LifecycleState::ALL {
                assert_eq!(targets.contains(&to), is_valid_transition(from, to));
            }
        }
    }

    #[test]
    fn validate_transition_err() {
        let result = validate_transition(&sid(), LifecycleState::Stopping, LifecycleState::Starting);

        match result {
            Err(ControlError::InvalidState { from, to, .. }) => {
                assert_eq!(from, LifecycleState::Stopping);
                assert_eq!(to, LifecycleState::Starting);
            }
            _ => panic!("expected InvalidState error"),
        }
    }

    #[test]
    fn active_and_transient_states() {
        assert!(!is_active(LifecycleState::Stopped));
        assert!(is_active(LifecycleState::Live));
        assert!(is_active(LifecycleState::Stopping));
        assert!(is_transient(LifecycleState::Starting));
        assert!(!is_transient(LifecycleState::Live));
    }
}
