//! Pure transition table for `Server.status`. No I/O, no clock — callers
//! are responsible for persisting the result and running the auto-restart
//! policy (see `crate::gateway` for that side-effectful wiring).

use super::server::ServerStatus;
use ServerStatus::*;

/// Outcome of validating a proposed transition against the current state.
/// Per the resolved Open Question in DESIGN.md, the Gateway always applies
/// the proposed state regardless of this result — `Denied` only governs
/// whether an audit log entry is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    Allowed,
    Denied,
}

fn legal_targets(from: ServerStatus) -> &'static [ServerStatus] {
    match from {
        Stopped => &[Installing, Starting, Error],
        Installing => &[Stopped, Error],
        Starting => &[Running, Error, Stopped],
        Running => &[Stopping, Crashed, Error],
        Stopping => &[Stopped, Error],
        Crashed => &[Starting, Stopped],
        Error => &[Stopped],
    }
}

/// Validate `(current, proposed)` against the transition table in
/// spec.md §4.2. A transition to the same state is never "legal" (it is
/// not listed in any row) but is also not a meaningful change; callers
/// that receive `current == proposed` should treat it as a no-op report
/// rather than calling this at all.
pub fn transition(current: ServerStatus, proposed: ServerStatus) -> TransitionResult {
    if legal_targets(current).contains(&proposed) {
        TransitionResult::Allowed
    } else {
        TransitionResult::Denied
    }
}

pub fn can_start(state: ServerStatus) -> bool {
    matches!(state, Stopped | Crashed)
}

pub fn can_stop(state: ServerStatus) -> bool {
    matches!(state, Running | Starting)
}

pub fn can_restart(state: ServerStatus) -> bool {
    matches!(state, Running | Stopped)
}

pub fn is_terminal(state: ServerStatus) -> bool {
    matches!(state, Error | Crashed)
}

pub fn is_transitioning(state: ServerStatus) -> bool {
    matches!(state, Starting | Stopping)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ServerStatus; 7] = [
        Stopped, Installing, Starting, Running, Stopping, Crashed, Error,
    ];

    /// Testable property 1 (spec.md §8): for every state `s` and every
    /// `s' ∉ TRANSITIONS[s]`, the machine rejects `(s, s')`, and allows
    /// all `s' ∈ TRANSITIONS[s]`.
    #[test]
    fn transition_closure_matches_table() {
        for &from in &ALL_STATES {
            let allowed = legal_targets(from);
            for &to in &ALL_STATES {
                let result = transition(from, to);
                if allowed.contains(&to) {
                    assert_eq!(
                        result,
                        TransitionResult::Allowed,
                        "{:?} -> {:?} should be allowed",
                        from,
                        to
                    );
                } else {
                    assert_eq!(
                        result,
                        TransitionResult::Denied,
                        "{:?} -> {:?} should be denied",
                        from,
                        to
                    );
                }
            }
        }
    }

    #[test]
    fn predicates_match_spec() {
        assert!(can_start(Stopped));
        assert!(can_start(Crashed));
        assert!(!can_start(Running));

        assert!(can_stop(Running));
        assert!(can_stop(Starting));
        assert!(!can_stop(Stopped));

        assert!(can_restart(Running));
        assert!(can_restart(Stopped));
        assert!(!can_restart(Crashed));

        assert!(is_terminal(Error));
        assert!(is_terminal(Crashed));
        assert!(!is_terminal(Running));

        assert!(is_transitioning(Starting));
        assert!(is_transitioning(Stopping));
        assert!(!is_transitioning(Running));
    }

    #[test]
    fn stopped_to_running_is_denied_but_stopped_to_installing_is_allowed() {
        assert_eq!(transition(Stopped, Running), TransitionResult::Denied);
        assert_eq!(transition(Stopped, Installing), TransitionResult::Allowed);
    }
}
