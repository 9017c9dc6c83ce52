//! Stages and their ports.
//!
//! A stage is a named processing node with a declared capability (the element
//! kind the host environment must instantiate), key/value settings applied
//! before activation, and typed input/output ports. Ports are either static
//! (connectable at construction time) or dynamic (they appear only once the
//! stage has seen real data).

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

use crate::graph::descriptor::MediaDescriptor;

/// Stage names are local identifiers, unique within one graph.
///
/// Allowed: "rtmp-source", "infer_primary", "osd0"
/// Disallowed: whitespace, uppercase, punctuation outside [_-].
pub fn validate_stage_name(name: &str) -> Result<()> {
    static STAGE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = STAGE_NAME_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").unwrap());
    if !re.is_match(name) {
        return Err(anyhow!(
            "stage name must match ^[a-z][a-z0-9_-]{{0,63}}$, got {:?}",
            name
        ));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub descriptor: MediaDescriptor,
    /// Dynamic ports appear only after the stage starts processing data.
    pub dynamic: bool,
}

#[derive(Clone, Debug)]
pub struct StageSpec {
    pub name: String,
    /// Capability the host environment must provide (element kind).
    pub capability: String,
    /// Optional stand-in capability used when the primary one is absent.
    pub fallback_capability: Option<String>,
    /// Applied to the stage before activation, in declaration order.
    pub settings: Vec<(String, String)>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

impl StageSpec {
    pub fn new(name: &str, capability: &str) -> Self {
        Self {
            name: name.to_string(),
            capability: capability.to_string(),
            fallback_capability: None,
            settings: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn fallback(mut self, capability: &str) -> Self {
        self.fallback_capability = Some(capability.to_string());
        self
    }

    pub fn setting(mut self, name: &str, value: impl ToString) -> Self {
        self.settings.push((name.to_string(), value.to_string()));
        self
    }

    pub fn input(mut self, name: &str, descriptor: MediaDescriptor) -> Self {
        self.inputs.push(PortSpec {
            name: name.to_string(),
            descriptor,
            dynamic: false,
        });
        self
    }

    pub fn output(mut self, name: &str, descriptor: MediaDescriptor) -> Self {
        self.outputs.push(PortSpec {
            name: name.to_string(),
            descriptor,
            dynamic: false,
        });
        self
    }

    /// Declare an output that only appears at runtime (e.g. decoder
    /// sub-stream ports). The name is a template, not a concrete port.
    pub fn dynamic_output(mut self, name: &str, descriptor: MediaDescriptor) -> Self {
        self.outputs.push(PortSpec {
            name: name.to_string(),
            descriptor,
            dynamic: true,
        });
        self
    }

    pub fn input_port(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// A constructed stage inside a graph. The capability recorded here is the
/// one actually selected (primary or fallback).
#[derive(Clone, Debug)]
pub struct Stage {
    pub name: String,
    pub capability: String,
    pub settings: Vec<(String, String)>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_follow_the_allowlist() {
        assert!(validate_stage_name("rtmp-source").is_ok());
        assert!(validate_stage_name("infer_primary").is_ok());
        assert!(validate_stage_name("Bad Name").is_err());
        assert!(validate_stage_name("").is_err());
        assert!(validate_stage_name("9starts-with-digit").is_err());
    }

    #[test]
    fn spec_builder_records_settings_in_order() {
        let spec = StageSpec::new("batcher", "nvstreammux")
            .setting("width", 1920)
            .setting("height", 1080)
            .setting("live-source", true);
        assert_eq!(spec.settings[0], ("width".to_string(), "1920".to_string()));
        assert_eq!(spec.settings[2].1, "true");
    }
}
