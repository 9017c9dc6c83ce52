//! Graph construction.
//!
//! The builder takes an ordered stage list with static configuration,
//! validates it against what the host environment can instantiate, and
//! creates all static links in declaration order. Dynamic links are created
//! in the pending state and resolved later by discovery events.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use crate::config::{Config, IngestTransport};
use crate::graph::descriptor::MediaDescriptor;
use crate::graph::link::{Link, PortRef};
use crate::graph::stage::{validate_stage_name, PortSpec, Stage, StageSpec};

/// What the host environment can instantiate. The media runtime implements
/// this against its element registry; tests substitute a fixed set.
pub trait CapabilityProbe {
    fn available(&self, capability: &str) -> bool;
}

/// Probe that accepts every capability. Used for structural validation when
/// no runtime is attached yet.
pub struct AssumeAvailable;

impl CapabilityProbe for AssumeAvailable {
    fn available(&self, _capability: &str) -> bool {
        true
    }
}

/// The environment is missing a capability a stage requires. Fatal; raised
/// before the graph is activated.
#[derive(Clone, Debug)]
pub struct StageCreationError {
    pub stage: String,
    pub capability: String,
}

impl std::fmt::Display for StageCreationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot create stage {:?}: capability {:?} is not available in this environment",
            self.stage, self.capability
        )
    }
}
impl std::error::Error for StageCreationError {}

#[derive(Clone, Debug, Default)]
pub struct GraphSpec {
    pub stages: Vec<StageSpec>,
    /// Output -> input pairs connectable at construction time.
    pub static_links: Vec<(PortRef, PortRef)>,
    /// Output template -> designated input, completed at runtime.
    pub dynamic_links: Vec<(PortRef, PortRef)>,
}

impl GraphSpec {
    /// The canonical detection pipeline for the configured ingest transport.
    ///
    /// Both transport variants normalize into the same tail: decoder with a
    /// dynamic video output, memory-domain conversion into device memory,
    /// batch formation, inference, overlay, display. The display stage
    /// carries a portable fallback capability for hosts without the
    /// accelerated sink.
    pub fn detection_pipeline(cfg: &Config) -> Self {
        let mut spec = GraphSpec::default();

        match &cfg.ingest.transport {
            IngestTransport::RtmpPull { url } => {
                spec.stages.push(
                    StageSpec::new("source", "rtmpsrc")
                        .setting("location", url)
                        .setting("do-timestamp", true)
                        .output("src", MediaDescriptor::video()),
                );
                spec.static_links
                    .push((PortRef::new("source", "src"), PortRef::new("decoder", "sink")));
            }
            IngestTransport::SrtpListen { port, payload_type } => {
                spec.stages.push(
                    StageSpec::new("listener", "udpsrc")
                        .setting("port", port)
                        .setting("timeout", cfg.ingest.first_buffer_timeout_ms * 1_000_000)
                        .setting(
                            "caps",
                            format!(
                                "application/x-srtp,media=(string)video,\
                                 encoding-name=(string)H264,payload=(int){},\
                                 clock-rate=(int)90000",
                                payload_type
                            ),
                        )
                        .output("src", MediaDescriptor::video()),
                );
                spec.stages.push(
                    StageSpec::new("decrypt", "srtpdec")
                        .input("rtp_sink", MediaDescriptor::video())
                        .output("rtp_src", MediaDescriptor::video()),
                );
                spec.stages.push(
                    StageSpec::new("jitter", "rtpjitterbuffer")
                        .input("sink", MediaDescriptor::video())
                        .output("src", MediaDescriptor::video()),
                );
                spec.stages.push(
                    StageSpec::new("depay", "rtph264depay")
                        .input("sink", MediaDescriptor::video())
                        .output("src", MediaDescriptor::video()),
                );
                spec.stages.push(
                    StageSpec::new("parse", "h264parse")
                        .input("sink", MediaDescriptor::video())
                        .output("src", MediaDescriptor::video()),
                );
                spec.static_links.extend([
                    (
                        PortRef::new("listener", "src"),
                        PortRef::new("decrypt", "rtp_sink"),
                    ),
                    (
                        PortRef::new("decrypt", "rtp_src"),
                        PortRef::new("jitter", "sink"),
                    ),
                    (PortRef::new("jitter", "src"), PortRef::new("depay", "sink")),
                    (PortRef::new("depay", "src"), PortRef::new("parse", "sink")),
                    (PortRef::new("parse", "src"), PortRef::new("decoder", "sink")),
                ]);
            }
        }

        spec.stages.push(
            StageSpec::new("decoder", "decodebin")
                .input("sink", MediaDescriptor::video())
                .dynamic_output("src_%u", MediaDescriptor::video()),
        );

        spec.stages.push(
            StageSpec::new("mem-convert", "nvvideoconvert")
                .input("sink", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("caps-filter", "capsfilter")
                .setting("caps", "video/x-raw(memory:NVMM), format=NV12")
                .input("sink", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("batcher", "nvstreammux")
                .setting("width", cfg.batcher.width)
                .setting("height", cfg.batcher.height)
                .setting("batch-size", cfg.batcher.batch_size)
                .setting("batched-push-timeout", cfg.batcher.push_timeout_us)
                .setting("live-source", if cfg.batcher.live_source { 1 } else { 0 })
                .input("sink_0", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("infer", "nvinfer")
                .setting("config-file-path", cfg.infer.config_path.display())
                .input("sink", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("osd-convert", "nvvideoconvert")
                .input("sink", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("osd", "nvdsosd")
                .input("sink", MediaDescriptor::video())
                .output("src", MediaDescriptor::video()),
        );
        spec.stages.push(
            StageSpec::new("display", &cfg.display.preferred_sink)
                .fallback(&cfg.display.fallback_sink)
                .setting("sync", cfg.display.sync)
                .input("sink", MediaDescriptor::video()),
        );

        // The decoder's video sub-stream, once discovered, feeds the
        // designated memory-convert input.
        spec.dynamic_links.push((
            PortRef::new("decoder", "src_%u"),
            PortRef::new("mem-convert", "sink"),
        ));

        spec.static_links.extend([
            (
                PortRef::new("mem-convert", "src"),
                PortRef::new("caps-filter", "sink"),
            ),
            (
                PortRef::new("caps-filter", "src"),
                PortRef::new("batcher", "sink_0"),
            ),
            (PortRef::new("batcher", "src"), PortRef::new("infer", "sink")),
            (
                PortRef::new("infer", "src"),
                PortRef::new("osd-convert", "sink"),
            ),
            (PortRef::new("osd-convert", "src"), PortRef::new("osd", "sink")),
            (PortRef::new("osd", "src"), PortRef::new("display", "sink")),
        ]);

        spec
    }
}

/// A constructed graph: stages in declaration order, static links resolved,
/// dynamic links pending.
#[derive(Clone, Debug)]
pub struct Graph {
    stages: Vec<Stage>,
    static_links: Vec<Link>,
    dynamic_links: Vec<Link>,
}

impl Graph {
    pub fn build(spec: &GraphSpec, probe: &dyn CapabilityProbe) -> Result<Self> {
        let mut names = BTreeSet::new();
        for stage in &spec.stages {
            validate_stage_name(&stage.name)?;
            if !names.insert(stage.name.as_str()) {
                return Err(anyhow!("duplicate stage name {:?}", stage.name));
            }
        }

        let mut stages = Vec::with_capacity(spec.stages.len());
        for stage in &spec.stages {
            let capability = select_capability(stage, probe)?;
            stages.push(Stage {
                name: stage.name.clone(),
                capability,
                settings: stage.settings.clone(),
                inputs: stage.inputs.clone(),
                outputs: stage.outputs.clone(),
            });
        }

        let mut used_ports = BTreeSet::new();
        let mut claim = |port: &PortRef| -> Result<()> {
            if !used_ports.insert((port.stage.clone(), port.port.clone())) {
                return Err(anyhow!("port {} serves more than one link", port));
            }
            Ok(())
        };

        let mut static_links = Vec::with_capacity(spec.static_links.len());
        for (from, to) in &spec.static_links {
            let out = lookup_output(&spec.stages, from)?;
            let inp = lookup_input(&spec.stages, to)?;
            if out.dynamic {
                return Err(anyhow!(
                    "static link {} -> {} starts at a dynamic port",
                    from,
                    to
                ));
            }
            if !out.descriptor.compatible_with(&inp.descriptor) {
                return Err(anyhow!(
                    "static link {} -> {} has incompatible descriptors",
                    from,
                    to
                ));
            }
            claim(from)?;
            claim(to)?;
            static_links.push(Link::resolved(from.clone(), to.clone(), inp.descriptor.clone()));
        }

        let mut dynamic_links = Vec::with_capacity(spec.dynamic_links.len());
        for (from, to) in &spec.dynamic_links {
            let out = lookup_output(&spec.stages, from)?;
            if !out.dynamic {
                return Err(anyhow!(
                    "dynamic link {} -> {} starts at a static port",
                    from,
                    to
                ));
            }
            let inp = lookup_input(&spec.stages, to)?;
            claim(from)?;
            claim(to)?;
            dynamic_links.push(Link::pending(from.clone(), to.clone(), inp.descriptor.clone()));
        }

        Ok(Self {
            stages,
            static_links,
            dynamic_links,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn static_links(&self) -> &[Link] {
        &self.static_links
    }

    pub fn dynamic_links(&self) -> &[Link] {
        &self.dynamic_links
    }

    pub fn dynamic_links_mut(&mut self) -> &mut [Link] {
        &mut self.dynamic_links
    }

    /// The pending link fed by the named upstream stage, if any.
    pub fn dynamic_link_from_mut(&mut self, stage: &str) -> Option<&mut Link> {
        self.dynamic_links.iter_mut().find(|l| l.from.stage == stage)
    }
}

fn select_capability(stage: &StageSpec, probe: &dyn CapabilityProbe) -> Result<String> {
    if probe.available(&stage.capability) {
        return Ok(stage.capability.clone());
    }
    if let Some(fallback) = &stage.fallback_capability {
        if probe.available(fallback) {
            log::warn!(
                "stage {}: capability {} unavailable, falling back to {}",
                stage.name,
                stage.capability,
                fallback
            );
            return Ok(fallback.clone());
        }
    }
    Err(StageCreationError {
        stage: stage.name.clone(),
        capability: stage.capability.clone(),
    }
    .into())
}

fn lookup_stage<'a>(stages: &'a [StageSpec], name: &str) -> Result<&'a StageSpec> {
    stages
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| anyhow!("link references unknown stage {:?}", name))
}

fn lookup_output<'a>(stages: &'a [StageSpec], port: &PortRef) -> Result<&'a PortSpec> {
    lookup_stage(stages, &port.stage)?
        .output_port(&port.port)
        .ok_or_else(|| anyhow!("stage {:?} has no output port {:?}", port.stage, port.port))
}

fn lookup_input<'a>(stages: &'a [StageSpec], port: &PortRef) -> Result<&'a PortSpec> {
    lookup_stage(stages, &port.stage)?
        .input_port(&port.port)
        .ok_or_else(|| anyhow!("stage {:?} has no input port {:?}", port.stage, port.port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct FixedProbe(Vec<&'static str>);

    impl CapabilityProbe for FixedProbe {
        fn available(&self, capability: &str) -> bool {
            self.0.contains(&capability)
        }
    }

    #[test]
    fn detection_pipeline_builds_with_all_capabilities() -> Result<()> {
        let cfg = Config::default();
        let graph = Graph::build(&GraphSpec::detection_pipeline(&cfg), &AssumeAvailable)?;
        assert!(graph.stage("decoder").is_some());
        assert!(graph.stage("infer").is_some());
        assert_eq!(graph.dynamic_links().len(), 1);
        assert!(graph.static_links().iter().all(|l| l.is_resolved()));
        Ok(())
    }

    #[test]
    fn missing_capability_is_a_stage_creation_error() {
        let spec = GraphSpec {
            stages: vec![StageSpec::new("infer", "nvinfer")],
            ..GraphSpec::default()
        };
        let err = Graph::build(&spec, &FixedProbe(vec![])).unwrap_err();
        let creation = err
            .downcast_ref::<StageCreationError>()
            .expect("StageCreationError");
        assert_eq!(creation.stage, "infer");
        assert_eq!(creation.capability, "nvinfer");
    }

    #[test]
    fn display_falls_back_to_portable_sink() -> Result<()> {
        let cfg = Config::default();
        let spec = GraphSpec::detection_pipeline(&cfg);
        let caps: Vec<&'static str> = vec![
            "rtmpsrc",
            "decodebin",
            "nvvideoconvert",
            "capsfilter",
            "nvstreammux",
            "nvinfer",
            "nvdsosd",
            "xvimagesink",
        ];
        let graph = Graph::build(&spec, &FixedProbe(caps))?;
        assert_eq!(graph.stage("display").unwrap().capability, "xvimagesink");
        Ok(())
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let spec = GraphSpec {
            stages: vec![
                StageSpec::new("osd", "nvdsosd"),
                StageSpec::new("osd", "nvdsosd"),
            ],
            ..GraphSpec::default()
        };
        assert!(Graph::build(&spec, &AssumeAvailable).is_err());
    }

    #[test]
    fn a_port_cannot_serve_two_links() {
        let mut spec = GraphSpec::detection_pipeline(&Config::default());
        // Second link into the already-claimed display input.
        spec.static_links.push((
            PortRef::new("osd-convert", "src"),
            PortRef::new("display", "sink"),
        ));
        let err = Graph::build(&spec, &AssumeAvailable).unwrap_err();
        assert!(err.to_string().contains("more than one link"));
    }

    #[test]
    fn srtp_variant_builds_the_decrypt_head() -> Result<()> {
        let mut cfg = Config::default();
        cfg.ingest.transport = crate::config::IngestTransport::SrtpListen {
            port: 5004,
            payload_type: 96,
        };
        let graph = Graph::build(&GraphSpec::detection_pipeline(&cfg), &AssumeAvailable)?;
        assert_eq!(graph.stage("decrypt").unwrap().capability, "srtpdec");
        assert!(graph.stage("source").is_none());
        Ok(())
    }
}
