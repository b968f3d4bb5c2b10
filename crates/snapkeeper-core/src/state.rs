use crate::error::{Error, Result};

/// Pipeline state persisted in ProjectSettings so that reopening a project
/// restores where the user left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Scanning,
    ScanPaused,
    Hashing,
    HashPaused,
    Planning,
    ReadyToCopy,
    Copying,
    CopyPaused,
    Completed,
    Faulted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Scanning => "Scanning",
            PipelineState::ScanPaused => "ScanPaused",
            PipelineState::Hashing => "Hashing",
            PipelineState::HashPaused => "HashPaused",
            PipelineState::Planning => "Planning",
            PipelineState::ReadyToCopy => "ReadyToCopy",
            PipelineState::Copying => "Copying",
            PipelineState::CopyPaused => "CopyPaused",
            PipelineState::Completed => "Completed",
            PipelineState::Faulted => "Faulted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Idle" => Some(PipelineState::Idle),
            "Scanning" => Some(PipelineState::Scanning),
            "ScanPaused" => Some(PipelineState::ScanPaused),
            "Hashing" => Some(PipelineState::Hashing),
            "HashPaused" => Some(PipelineState::HashPaused),
            "Planning" => Some(PipelineState::Planning),
            "ReadyToCopy" => Some(PipelineState::ReadyToCopy),
            "Copying" => Some(PipelineState::Copying),
            "CopyPaused" => Some(PipelineState::CopyPaused),
            "Completed" => Some(PipelineState::Completed),
            "Faulted" => Some(PipelineState::Faulted),
            _ => None,
        }
    }

    /// Whether `self -> to` is an allowed transition. Anything not listed
    /// here is rejected without a state change.
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (*self, to),
            (Idle, Scanning)
                | (Scanning, ScanPaused)
                | (Scanning, Hashing)
                | (Scanning, Idle)
                | (Scanning, Faulted)
                | (ScanPaused, Scanning)
                | (ScanPaused, Idle)
                | (Hashing, HashPaused)
                | (Hashing, Planning)
                | (Hashing, Idle)
                | (Hashing, Faulted)
                | (HashPaused, Hashing)
                | (HashPaused, Idle)
                | (Planning, ReadyToCopy)
                | (Planning, Idle)
                | (ReadyToCopy, Copying)
                | (ReadyToCopy, Planning)
                | (ReadyToCopy, Idle)
                | (Copying, CopyPaused)
                | (Copying, Completed)
                | (Copying, Idle)
                | (Copying, Faulted)
                | (CopyPaused, Copying)
                | (CopyPaused, Idle)
                | (Completed, Idle)
                | (Faulted, Idle)
                // Resume edges after reopening a project.
                | (Idle, Hashing)
                | (Idle, Planning)
                | (Idle, ReadyToCopy)
                | (Idle, Copying)
        )
    }

    pub fn transition_to(&self, to: PipelineState) -> Result<PipelineState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    const ALL: [PipelineState; 11] = [
        Idle, Scanning, ScanPaused, Hashing, HashPaused, Planning, ReadyToCopy, Copying,
        CopyPaused, Completed, Faulted,
    ];

    #[test]
    fn test_happy_path_transitions() {
        let chain = [
            Idle, Scanning, Hashing, Planning, ReadyToCopy, Copying, Completed, Idle,
        ];
        for pair in chain.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_pause_round_trips() {
        assert!(Scanning.can_transition_to(ScanPaused));
        assert!(ScanPaused.can_transition_to(Scanning));
        assert!(Hashing.can_transition_to(HashPaused));
        assert!(HashPaused.can_transition_to(Hashing));
        assert!(Copying.can_transition_to(CopyPaused));
        assert!(CopyPaused.can_transition_to(Copying));
    }

    #[test]
    fn test_rejected_transitions_leave_state_unchanged() {
        let state = Idle;
        let err = state.transition_to(Completed).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(state, Idle);

        assert!(!ScanPaused.can_transition_to(Hashing));
        assert!(!Completed.can_transition_to(Copying));
        assert!(!Faulted.can_transition_to(Scanning));
        assert!(!Planning.can_transition_to(Copying));
    }

    #[test]
    fn test_faulted_and_completed_only_return_to_idle() {
        for to in ALL {
            let faulted_ok = Faulted.can_transition_to(to);
            assert_eq!(faulted_ok, to == Idle, "Faulted -> {:?}", to);
            let completed_ok = Completed.can_transition_to(to);
            assert_eq!(completed_ok, to == Idle, "Completed -> {:?}", to);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for state in ALL {
            assert_eq!(PipelineState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PipelineState::parse("Bogus"), None);
    }
}
