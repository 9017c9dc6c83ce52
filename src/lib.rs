//! streamsight
//!
//! This crate implements the orchestration core of a live-stream object
//! detection pipeline.
//!
//! # Architecture
//!
//! A single processing graph runs for the life of the process:
//!
//! encoded bytes -> transport decrypt (if secure) -> depayload/parse ->
//! hardware decode -> memory-domain convert -> batch -> inference ->
//! overlay -> display
//!
//! The shape of that graph is only partially known at start time. The core
//! handles the parts that cannot be wired statically:
//!
//! - dynamic sub-stream discovery (the decoder exposes output ports only once
//!   it has seen real data; only the video port is wired onward)
//! - on-demand SRTP key provisioning for encrypted ingest
//! - sampled extraction of per-frame detection metadata without stalling the
//!   data plane
//! - a single authoritative lifecycle state machine owning startup, drain,
//!   failure, and resource release
//!
//! # Module Structure
//!
//! - `graph`: declarative stage/port/link model, graph builder, dynamic link
//!   resolution
//! - `keys`: decryption key material records and the on-demand provider
//! - `sampler`: per-frame detection records and the sampling cadence
//! - `lifecycle`: run states, the pipeline event channel, and the controller
//! - `config`: daemon configuration (file + environment)
//! - `model`: inference engine config artifact (generated once if absent)
//! - `runtime`: the seam to the media framework; real GStreamer realization
//!   behind the `runtime-gstreamer` feature

pub mod config;
pub mod graph;
pub mod keys;
pub mod lifecycle;
pub mod model;
pub mod runtime;
pub mod sampler;

pub use config::{Config, IngestTransport};
pub use graph::{
    CapabilityProbe, FormatFamily, Graph, GraphSpec, Link, LinkState, MediaDescriptor, PortRef,
    ResolveOutcome, StageCreationError, StageSpec,
};
pub use keys::{KeyMaterial, KeyProvider, KeyUnavailable};
pub use lifecycle::{EventSender, LifecycleController, PipelineEvent, RunOutcome, RunState};
pub use runtime::GraphRuntime;
pub use sampler::{Detection, FrameDetections, MetadataSampler};
