// Domain rules - Phase transition table

use crate::domain::errors::*;
use crate::domain::model::*;

/// Exhaustive transition table of the recording phase machine
pub struct PhaseRules;

impl PhaseRules {
    /// Next phase for `event` in `from`, or `None` when no edge matches
    pub fn next(from: Phase, event: PhaseEvent) -> Option<Phase> {
        use Phase::*;
        use PhaseEvent::*;

        match (from, event) {
            (Idle, StartSegment) => Some(Recording),
            (Recording, StopSegment) => Some(Finishing),
            (Recording, CapReached) => Some(Finishing),
            (Finishing, SegmentFinalized { cap_reached: true }) => Some(Stitching),
            (Finishing, SegmentFinalized { cap_reached: false }) => Some(Idle),
            (Recording | Finishing, SegmentAborted) => Some(Idle),
            (Stitching, StitchCompleted) => Some(Idle),

            (Idle, StopSegment | CapReached | SegmentFinalized { .. } | SegmentAborted | StitchCompleted)
            | (Recording, StartSegment | SegmentFinalized { .. } | StitchCompleted)
            | (Finishing, StartSegment | StopSegment | CapReached | StitchCompleted)
            | (Stitching, StartSegment | StopSegment | CapReached | SegmentFinalized { .. } | SegmentAborted) => None,
        }
    }

    /// Like [`PhaseRules::next`] but reports a rejected request as an error
    pub fn apply(from: Phase, event: PhaseEvent) -> Result<Phase, DomainError> {
        Self::next(from, event).ok_or_else(|| {
            DomainError::InvalidTransition(format!("{} is not accepted while {}", event, from))
        })
    }

    /// Whether the source may be reconfigured (camera switch, orientation change)
    pub fn allows_reconfiguration(phase: Phase) -> bool {
        !phase.is_capturing()
    }
}
