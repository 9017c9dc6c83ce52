//! The seam between the orchestration core and the media framework.
//!
//! The lifecycle controller only needs two things from a runtime: begin
//! processing, and release everything. Data-plane concurrency (decode,
//! convert, infer, render) lives entirely behind this trait; the core never
//! reimplements it.

use anyhow::Result;

#[cfg(feature = "runtime-gstreamer")]
pub mod gstreamer;

#[cfg(feature = "runtime-gstreamer")]
pub use gstreamer::GstRuntime;

pub trait GraphRuntime {
    /// Request the graph to begin processing. Startup progress and all later
    /// conditions are reported on the event channel, not returned here.
    fn start(&mut self) -> Result<()>;

    /// Tear the graph down to its null resource state. Must be safe to call
    /// more than once and from any run state.
    fn shutdown(&mut self) -> Result<()>;
}
