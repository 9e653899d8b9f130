//! Recording engine: session state, drain loop, segments and stitching

pub mod drain;
pub mod events;
pub mod progress;
pub mod recorder;
pub mod segment;
pub mod session;
pub mod stitcher;

pub use drain::{DrainCommand, DrainLinks, DrainLoop, DrainReport, PollTimeouts, StepOutcome};
pub use events::{EventSink, RecorderEvent};
pub use progress::{ConsoleProgress, JsonProgress, ProgressHandle, ProgressReporter};
pub use recorder::{assemble, Pipeline, Recorder, RecorderDeps, SessionControl, ShutdownReport};
pub use segment::{Segment, SegmentWriter, UnitTiming};
pub use session::{PhaseCell, SessionState};
pub use stitcher::{StitchJob, StitchWorker, Stitcher};
