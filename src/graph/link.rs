//! Links and dynamic link resolution.
//!
//! A link is a directed edge from one stage's output port to another's input
//! port. Static links are resolved at construction time. Dynamic links wait
//! for the upstream stage to discover a matching sub-stream; resolution is a
//! pure function of the current link state and the discovered descriptor, so
//! duplicate or out-of-order discovery events cannot corrupt the graph.

use crate::graph::descriptor::{FormatFamily, MediaDescriptor};

/// (stage, port) address of one end of a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortRef {
    pub stage: String,
    pub port: String,
}

impl PortRef {
    pub fn new(stage: &str, port: &str) -> Self {
        Self {
            stage: stage.to_string(),
            port: port.to_string(),
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.stage, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting on a dynamic upstream port to appear.
    Pending,
    Resolved,
    /// Last discovery attempt carried an incompatible descriptor. The
    /// affected sub-stream is dropped; a later compatible one may still
    /// resolve the link.
    Rejected { reason: String },
}

/// Outcome of offering a discovered port to a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    Linked,
    /// The link was already resolved; duplicate discovery is a no-op.
    AlreadyLinked,
    /// Wrong format family; the port is deliberately left unlinked.
    Ignored(FormatFamily),
    Incompatible(String),
}

#[derive(Clone, Debug)]
pub struct Link {
    pub from: PortRef,
    pub to: PortRef,
    /// What the downstream input port accepts.
    pub expected: MediaDescriptor,
    pub state: LinkState,
}

impl Link {
    pub fn resolved(from: PortRef, to: PortRef, expected: MediaDescriptor) -> Self {
        Self {
            from,
            to,
            expected,
            state: LinkState::Resolved,
        }
    }

    pub fn pending(from: PortRef, to: PortRef, expected: MediaDescriptor) -> Self {
        Self {
            from,
            to,
            expected,
            state: LinkState::Pending,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == LinkState::Resolved
    }

    /// Offer a discovered upstream port to this link.
    ///
    /// Applies [`resolve`] and, when the link resolves, records the concrete
    /// port name in place of the declared template.
    pub fn offer(&mut self, port: &str, discovered: &MediaDescriptor) -> ResolveOutcome {
        let (next, outcome) = resolve(&self.state, &self.expected, discovered);
        if outcome == ResolveOutcome::Linked {
            self.from.port = port.to_string();
        }
        self.state = next;
        outcome
    }

    /// Roll a resolved link back after the physical connection failed.
    ///
    /// A resolved link must connect exactly one output to one input; if the
    /// runtime cannot complete the connection the resolution is void and a
    /// later discovery must be allowed to try again.
    pub fn revoke(&mut self, reason: &str) {
        self.state = LinkState::Rejected {
            reason: reason.to_string(),
        };
    }
}

/// Pure resolver: (current state, expected descriptor, discovered descriptor)
/// -> (next state, outcome).
///
/// - already resolved: no-op, never an error
/// - wrong family: state unchanged, port left unlinked
/// - compatible: resolved
/// - same family but incompatible attributes: rejected, non-fatal
pub fn resolve(
    current: &LinkState,
    expected: &MediaDescriptor,
    discovered: &MediaDescriptor,
) -> (LinkState, ResolveOutcome) {
    if *current == LinkState::Resolved {
        return (LinkState::Resolved, ResolveOutcome::AlreadyLinked);
    }
    if discovered.family != expected.family {
        return (current.clone(), ResolveOutcome::Ignored(discovered.family));
    }
    if expected.compatible_with(discovered) {
        return (LinkState::Resolved, ResolveOutcome::Linked);
    }
    let reason = format!(
        "descriptor mismatch: expected {:?}, discovered {:?}",
        expected.attrs, discovered.attrs
    );
    (
        LinkState::Rejected {
            reason: reason.clone(),
        },
        ResolveOutcome::Incompatible(reason),
    )
}
