//! Job lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job record
///
/// ```text
/// READY -> REQUESTED -> SCHEDULED -> RUNNING -> FINISHED
///   ^                                              |
///   +------------------- release ------------------+
/// ```
///
/// `release` may return a record to `Ready` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Record is free
    Ready,
    /// Id acquired; arguments may be set
    Requested,
    /// Assigned to a slot, awaiting execution
    Scheduled,
    /// Executing on the assigned slot; return value unstable
    Running,
    /// Execution finished; return value is valid
    Finished,
}

impl JobState {
    /// Returns whether `set_state` may move a job from `self` to `next`
    ///
    /// Moves into `Requested` and `Ready` are reserved for acquire and
    /// release and are never legal here.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Requested, JobState::Scheduled)
                | (JobState::Scheduled, JobState::Running)
                | (JobState::Running, JobState::Finished)
        )
    }

    /// Returns whether arguments, kernel id and transfers may be changed
    pub fn accepts_arguments(self) -> bool {
        self == JobState::Requested
    }

    /// Returns whether the record is owned by a caller
    pub fn is_live(self) -> bool {
        self != JobState::Ready
    }

    /// Returns whether the job occupies its slot
    pub fn occupies_slot(self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Ready => write!(f, "READY"),
            JobState::Requested => write!(f, "REQUESTED"),
            JobState::Scheduled => write!(f, "SCHEDULED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Finished => write!(f, "FINISHED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobState; 5] = [
        JobState::Ready,
        JobState::Requested,
        JobState::Scheduled,
        JobState::Running,
        JobState::Finished,
    ];

    #[test]
    fn test_forward_chain_is_legal() {
        assert!(JobState::Requested.can_transition_to(JobState::Scheduled));
        assert!(JobState::Scheduled.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Finished));
    }

    #[test]
    fn test_skips_and_reversals_are_illegal() {
        assert!(!JobState::Ready.can_transition_to(JobState::Running));
        assert!(!JobState::Requested.can_transition_to(JobState::Finished));
        assert!(!JobState::Scheduled.can_transition_to(JobState::Finished));
        assert!(!JobState::Finished.can_transition_to(JobState::Running));
    }

    #[test]
    fn test_ready_and_requested_never_targets() {
        for from in ALL {
            assert!(!from.can_transition_to(JobState::Ready));
            assert!(!from.can_transition_to(JobState::Requested));
        }
    }

    #[test]
    fn test_only_requested_accepts_arguments() {
        for state in ALL {
            assert_eq!(state.accepts_arguments(), state == JobState::Requested);
        }
    }
}
