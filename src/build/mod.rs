//! Build coordination
//!
//! - [`BuildCoordinator`]: one transform per target, process-wide and across processes
//! - [`BuildMarker`]: the exclusive `.wait` file marking a build in flight
//! - [`MarkerWatch`]: waits for a foreign marker to disappear

mod coordinator;
mod marker;
mod watch;

pub use coordinator::BuildCoordinator;
pub use marker::{marker_path, BuildMarker, MARKER_SUFFIX};
pub use watch::{MarkerWatch, WaitOutcome};
