use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a recording session
///
/// Forward order: Idle → Configuring → Prepared → Recording → Stopping → Released.
/// `Failed` is reachable from Configuring, Prepared or Recording and is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Configuring,
    Prepared,
    Recording,
    Stopping,
    Released,
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Configuring => "Configuring",
            SessionState::Prepared => "Prepared",
            SessionState::Recording => "Recording",
            SessionState::Stopping => "Stopping",
            SessionState::Released => "Released",
            SessionState::Failed => "Failed",
        }
    }

    /// A session in one of these states owns the capture device
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Configuring
                | SessionState::Prepared
                | SessionState::Recording
                | SessionState::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Released | SessionState::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Configuring)
                | (Released, Configuring)
                | (Failed, Configuring)
                | (Configuring, Prepared)
                | (Prepared, Recording)
                | (Recording, Stopping)
                | (Stopping, Released)
                | (Configuring, Failed)
                | (Prepared, Failed)
                | (Recording, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_legal() {
        use SessionState::*;
        let path = [Idle, Configuring, Prepared, Recording, Stopping, Released];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_or_resuming() {
        use SessionState::*;
        assert!(!Idle.can_transition_to(Recording));
        assert!(!Configuring.can_transition_to(Recording));
        assert!(!Failed.can_transition_to(Recording));
        assert!(!Released.can_transition_to(Stopping));
        assert!(!Stopping.can_transition_to(Failed));
    }

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        use SessionState::*;
        for s in [Idle, Configuring, Prepared, Recording, Stopping, Released, Failed] {
            assert!(!(s.is_active() && s.is_terminal()));
        }
        assert!(!Idle.is_active());
        assert!(Stopping.is_active());
    }
}
