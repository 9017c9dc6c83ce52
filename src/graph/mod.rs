//! The pipeline graph: stages, ports, links, and the builder.
//!
//! The graph model is framework-free. Stage capabilities name element kinds
//! the media runtime instantiates; the builder only checks that the host
//! environment can provide them and that declared links are well formed.
//! Dynamic link resolution (sub-stream discovery) mutates nothing but the
//! single affected link, and is idempotent.

mod builder;
mod descriptor;
mod link;
mod stage;

pub use builder::{AssumeAvailable, CapabilityProbe, Graph, GraphSpec, StageCreationError};
pub use descriptor::{FormatFamily, MediaAttrs, MediaDescriptor};
pub use link::{resolve, Link, LinkState, PortRef, ResolveOutcome};
pub use stage::{validate_stage_name, PortSpec, Stage, StageSpec};
