//! GStreamer realization of the pipeline graph.
//!
//! Maps the declarative graph onto real elements, wires the three runtime
//! callbacks (sub-stream discovery, key requests, the metadata probe), and
//! pumps the pipeline bus into the lifecycle event channel. All callbacks
//! run on framework threads and complete without blocking I/O; anything
//! lifecycle-relevant is forwarded on the channel instead of being handled
//! in place.

use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::graph::{CapabilityProbe, Graph, GraphSpec, Link, MediaDescriptor, ResolveOutcome};
use crate::keys::KeyProvider;
use crate::lifecycle::{EventSender, PipelineEvent};
use crate::runtime::GraphRuntime;
use crate::sampler::{FrameDetections, MetadataSampler};

/// Buffer meta under which the inference stage attaches serialized
/// per-frame detection records.
const DETECTION_META: &str = "streamsight-detections";

/// Capability probe backed by the element registry.
pub struct GstProbe;

impl CapabilityProbe for GstProbe {
    fn available(&self, capability: &str) -> bool {
        gst::ElementFactory::find(capability).is_some()
    }
}

pub struct GstRuntime {
    pipeline: gst::Pipeline,
    events: EventSender,
    stop: Arc<AtomicBool>,
    bus_thread: Option<JoinHandle<()>>,
}

impl GstRuntime {
    pub fn new(
        spec: &GraphSpec,
        keys: Arc<KeyProvider>,
        sampler: MetadataSampler,
        events: EventSender,
    ) -> Result<Self> {
        gst::init().context("initialize gstreamer")?;
        if !gst::meta::CustomMeta::is_registered(DETECTION_META) {
            gst::meta::CustomMeta::register(DETECTION_META, &[]);
        }

        let graph = Graph::build(spec, &GstProbe)?;
        let pipeline = gst::Pipeline::builder().name("streamsight").build();

        let mut elements: HashMap<String, gst::Element> = HashMap::new();
        for stage in graph.stages() {
            let mut builder = gst::ElementFactory::make(&stage.capability).name(&stage.name);
            for (name, value) in &stage.settings {
                builder = builder.property_from_str(name, value);
            }
            let element = builder.build().with_context(|| {
                format!(
                    "create stage {:?} ({})",
                    stage.name, stage.capability
                )
            })?;
            pipeline
                .add(&element)
                .with_context(|| format!("add stage {:?} to pipeline", stage.name))?;
            elements.insert(stage.name.clone(), element);
        }

        for link in graph.static_links() {
            let src = pad_on(&elements, &link.from.stage, &link.from.port)?;
            let sink = pad_on(&elements, &link.to.stage, &link.to.port)?;
            src.link(&sink).map_err(|e| {
                anyhow!("static link {} -> {} failed: {:?}", link.from, link.to, e)
            })?;
        }

        let runtime = Self {
            pipeline,
            events,
            stop: Arc::new(AtomicBool::new(false)),
            bus_thread: None,
        };

        for link in graph.dynamic_links() {
            runtime.wire_discovery(&elements, link)?;
        }
        runtime.wire_key_requests(&elements, &graph, keys);
        runtime.wire_metadata_probe(&elements, sampler)?;

        Ok(runtime)
    }

    /// Register the pad-added callback completing a pending link once the
    /// upstream stage discovers a matching sub-stream.
    fn wire_discovery(
        &self,
        elements: &HashMap<String, gst::Element>,
        link: &Link,
    ) -> Result<()> {
        let upstream = elements
            .get(&link.from.stage)
            .ok_or_else(|| anyhow!("dynamic link from unknown stage {:?}", link.from.stage))?;
        let target = pad_on(elements, &link.to.stage, &link.to.port)?;
        let shared = Arc::new(Mutex::new(link.clone()));
        let events = self.events.clone();

        upstream.connect_pad_added(move |stage, pad| {
            let caps = pad
                .current_caps()
                .unwrap_or_else(|| pad.query_caps(None));
            let media_type = caps
                .structure(0)
                .map(|s| s.name().to_string())
                .unwrap_or_default();
            let discovered = MediaDescriptor::from_media_type(&media_type);

            let Ok(mut link) = shared.lock() else {
                return;
            };
            match link.offer(pad.name().as_str(), &discovered) {
                ResolveOutcome::Linked => {
                    if let Err(e) = pad.link(&target) {
                        // The resolution only counts once the pads are
                        // physically connected; void it so a later
                        // sub-stream can still resolve this link.
                        link.revoke(&format!("pad link failed: {:?}", e));
                        log::warn!(
                            "link {}:{} -> {} failed to connect, awaiting another sub-stream: {:?}",
                            stage.name(),
                            pad.name(),
                            link.to,
                            e
                        );
                        let _ = events.send(PipelineEvent::Warning {
                            source: stage.name().to_string(),
                            message: format!("sub-stream {} dropped: pad link {:?}", pad.name(), e),
                        });
                    } else {
                        log::info!(
                            "linked {}:{} ({}) -> {}",
                            stage.name(),
                            pad.name(),
                            media_type,
                            link.to
                        );
                    }
                }
                ResolveOutcome::AlreadyLinked => {
                    log::info!(
                        "{}:{} discovered after video input already linked, ignoring",
                        stage.name(),
                        pad.name()
                    );
                }
                ResolveOutcome::Ignored(family) => {
                    log::info!(
                        "leaving {} sub-stream {}:{} unlinked",
                        family,
                        stage.name(),
                        pad.name()
                    );
                }
                ResolveOutcome::Incompatible(reason) => {
                    log::warn!(
                        "dropping sub-stream {}:{}: {}",
                        stage.name(),
                        pad.name(),
                        reason
                    );
                    let _ = events.send(PipelineEvent::Warning {
                        source: stage.name().to_string(),
                        message: format!("sub-stream {} dropped: {}", pad.name(), reason),
                    });
                }
            }
        });
        Ok(())
    }

    /// Answer the decrypting stage's key requests from the provider. A miss
    /// is fatal for the decode path and is escalated on the event channel.
    fn wire_key_requests(
        &self,
        elements: &HashMap<String, gst::Element>,
        graph: &Graph,
        keys: Arc<KeyProvider>,
    ) {
        for stage in graph.stages() {
            if stage.capability != "srtpdec" {
                continue;
            }
            let Some(element) = elements.get(&stage.name) else {
                continue;
            };
            let events = self.events.clone();
            let keys = keys.clone();
            let stage_name = stage.name.clone();
            element.connect("request-key", false, move |args| {
                let ssrc = args
                    .get(1)
                    .and_then(|v| v.get::<u32>().ok())
                    .unwrap_or_default();
                let key_id = ssrc.to_string();
                // Per-ssrc provisioning wins; a single shared key for the
                // whole session is registered as "default".
                let material = keys
                    .material(&key_id)
                    .or_else(|_| keys.material("default"));
                match material {
                    Ok(material) => {
                        log::info!("{}: provisioned key for ssrc {}", stage_name, ssrc);
                        Some(srtp_caps(material).to_value())
                    }
                    Err(e) => {
                        let _ = events.send(PipelineEvent::Fatal {
                            source: stage_name.clone(),
                            message: e.to_string(),
                        });
                        None
                    }
                }
            });
        }
    }

    /// Attach the observational probe between inference and render.
    fn wire_metadata_probe(
        &self,
        elements: &HashMap<String, gst::Element>,
        sampler: MetadataSampler,
    ) -> Result<()> {
        let osd = elements
            .get("osd")
            .ok_or_else(|| anyhow!("graph has no osd stage for the metadata probe"))?;
        let pad = osd
            .static_pad("sink")
            .ok_or_else(|| anyhow!("osd stage has no sink pad"))?;
        let sampler = Mutex::new(sampler);
        pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
            if let Some(gst::PadProbeData::Buffer(buffer)) = &info.data {
                if let Some(batch) = read_detection_meta(buffer) {
                    if let Ok(mut sampler) = sampler.lock() {
                        for line in sampler.observe(&batch) {
                            log::info!("{}", line);
                        }
                    }
                }
            }
            // Observational only: the buffer always continues downstream.
            gst::PadProbeReturn::Ok
        });
        Ok(())
    }
}

impl GraphRuntime for GstRuntime {
    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .context("set pipeline to Playing")?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| anyhow!("pipeline has no bus"))?;
        let events = self.events.clone();
        let stop = self.stop.clone();
        let pipeline = self.pipeline.clone();
        self.bus_thread = Some(std::thread::spawn(move || {
            pump_bus(&bus, &pipeline, &events, &stop);
        }));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.bus_thread.take() {
            let _ = handle.join();
        }
        self.pipeline
            .set_state(gst::State::Null)
            .context("set pipeline to Null")?;
        Ok(())
    }
}

impl Drop for GstRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("pipeline teardown on drop failed: {:#}", e);
        }
    }
}

/// Translate bus messages into lifecycle events until the stream ends, a
/// fatal error arrives, or shutdown is requested.
fn pump_bus(
    bus: &gst::Bus,
    pipeline: &gst::Pipeline,
    events: &EventSender,
    stop: &AtomicBool,
) {
    let mut reported_started = false;
    while !stop.load(Ordering::Relaxed) {
        let Some(message) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
            continue;
        };
        use gst::MessageView;
        match message.view() {
            MessageView::Eos(..) => {
                let _ = events.send(PipelineEvent::EndOfStream);
                break;
            }
            MessageView::Error(err) => {
                let _ = events.send(PipelineEvent::Fatal {
                    source: message_source(&message),
                    message: err.error().to_string(),
                });
                break;
            }
            MessageView::Warning(warn) => {
                let _ = events.send(PipelineEvent::Warning {
                    source: message_source(&message),
                    message: warn.error().to_string(),
                });
            }
            MessageView::Element(_) => {
                let is_timeout = message
                    .structure()
                    .map(|s| s.name() == "GstUDPSrcTimeout")
                    .unwrap_or(false);
                if is_timeout {
                    let _ = events.send(udp_timeout_event(
                        message_source(&message),
                        reported_started,
                    ));
                }
            }
            MessageView::StateChanged(changed) => {
                let from_pipeline = message
                    .src()
                    .map(|s| s == pipeline.upcast_ref::<gst::Object>())
                    .unwrap_or(false);
                if from_pipeline
                    && changed.current() == gst::State::Playing
                    && !reported_started
                {
                    reported_started = true;
                    let _ = events.send(PipelineEvent::StreamStarted);
                }
            }
            _ => {}
        }
    }
}

/// udpsrc posts a timeout message when no datagram arrives within its
/// configured window. Before the stream has started that means the bounded
/// first-buffer wait expired with nothing on the port; after that it is a
/// mid-stream gap the jitter buffer may still ride out.
fn udp_timeout_event(source: String, streaming: bool) -> PipelineEvent {
    if streaming {
        PipelineEvent::Warning {
            source,
            message: "no data on the listen port within the receive timeout".to_string(),
        }
    } else {
        PipelineEvent::Fatal {
            source,
            message: "no buffer arrived within the first-buffer timeout".to_string(),
        }
    }
}

fn message_source(message: &gst::Message) -> String {
    message
        .src()
        .map(|s| s.path_string().to_string())
        .unwrap_or_else(|| "pipeline".to_string())
}

/// A pad by name, whether static or request-allocated (the batcher exposes
/// its sink pads on request only).
fn pad_on(
    elements: &HashMap<String, gst::Element>,
    stage: &str,
    port: &str,
) -> Result<gst::Pad> {
    let element = elements
        .get(stage)
        .ok_or_else(|| anyhow!("link references unknown stage {:?}", stage))?;
    element
        .static_pad(port)
        .or_else(|| element.request_pad_simple(port))
        .ok_or_else(|| anyhow!("stage {:?} has no pad {:?}", stage, port))
}

/// Caps answering an srtpdec request-key signal: key material plus cipher
/// and auth profile. The key bytes live only inside the returned caps.
fn srtp_caps(material: &crate::keys::KeyMaterial) -> gst::Caps {
    let key_buffer = gst::Buffer::from_mut_slice(material.concatenated());
    let auth = srtp_auth_name(material.auth_tag_len);
    gst::Caps::builder("application/x-srtp")
        .field("srtp-key", key_buffer)
        .field("srtp-cipher", material.cipher.as_str())
        .field("srtp-auth", auth)
        .field("srtcp-cipher", material.cipher.as_str())
        .field("srtcp-auth", auth)
        .build()
}

fn srtp_auth_name(auth_tag_len: u8) -> &'static str {
    match auth_tag_len {
        4 => "hmac-sha1-32",
        _ => "hmac-sha1-80",
    }
}

/// Per-frame detection records attached to the buffer by the inference
/// stage. Absent or malformed metadata is not an error; the probe is a
/// pass-through.
fn read_detection_meta(buffer: &gst::BufferRef) -> Option<Vec<FrameDetections>> {
    let meta = gst::meta::CustomMeta::from_buffer(buffer, DETECTION_META).ok()?;
    let records = meta.structure().get::<&str>("records").ok()?;
    match serde_json::from_str::<Vec<FrameDetections>>(records) {
        Ok(batch) => Some(batch),
        Err(e) => {
            log::debug!("unreadable detection metadata: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_timeout_before_streaming_is_fatal() {
        let event = udp_timeout_event("listener".to_string(), false);
        assert!(matches!(event, PipelineEvent::Fatal { .. }));
    }

    #[test]
    fn receive_timeout_mid_stream_is_a_warning() {
        let event = udp_timeout_event("listener".to_string(), true);
        assert!(matches!(event, PipelineEvent::Warning { .. }));
    }
}
