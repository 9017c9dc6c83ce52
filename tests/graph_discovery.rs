//! Sub-stream discovery against the full detection graph.
//!
//! Walks the common live-source case: the decoder reveals a video and an
//! audio sub-stream in arbitrary order, and only the video one may feed the
//! detection tail.

use anyhow::Result;

use streamsight::graph::AssumeAvailable;
use streamsight::keys::{KeyEntry, KeySpec};
use streamsight::{
    Config, FormatFamily, Graph, GraphSpec, IngestTransport, KeyProvider, MediaDescriptor,
    ResolveOutcome,
};

#[test]
fn only_the_video_substream_is_wired_onward() -> Result<()> {
    let cfg = Config::default();
    let mut graph = Graph::build(&GraphSpec::detection_pipeline(&cfg), &AssumeAvailable)?;
    assert_eq!(graph.dynamic_links().len(), 1);

    let link = graph.dynamic_link_from_mut("decoder").unwrap();

    // Audio appears first and is deliberately left unlinked.
    assert_eq!(
        link.offer("src_1", &MediaDescriptor::from_media_type("audio/mpeg")),
        ResolveOutcome::Ignored(FormatFamily::Audio)
    );
    assert!(!link.is_resolved());

    // Video resolves the link onto the concrete port.
    assert_eq!(
        link.offer("src_0", &MediaDescriptor::from_media_type("video/x-raw")),
        ResolveOutcome::Linked
    );
    assert!(link.is_resolved());
    assert_eq!(link.from.port, "src_0");
    assert_eq!(link.to.stage, "mem-convert");

    // The decoder re-announcing the pad must not rewire anything.
    assert_eq!(
        link.offer("src_2", &MediaDescriptor::from_media_type("video/x-raw")),
        ResolveOutcome::AlreadyLinked
    );
    assert_eq!(link.from.port, "src_0");

    assert_eq!(
        graph.dynamic_links().iter().filter(|l| l.is_resolved()).count(),
        1
    );
    Ok(())
}

#[test]
fn discovery_order_does_not_matter() -> Result<()> {
    let cfg = Config::default();
    let mut graph = Graph::build(&GraphSpec::detection_pipeline(&cfg), &AssumeAvailable)?;
    let link = graph.dynamic_link_from_mut("decoder").unwrap();

    assert_eq!(
        link.offer("src_0", &MediaDescriptor::from_media_type("video/x-h264")),
        ResolveOutcome::Linked
    );
    assert_eq!(
        link.offer("src_1", &MediaDescriptor::from_media_type("audio/x-raw")),
        ResolveOutcome::AlreadyLinked
    );
    Ok(())
}

#[test]
fn srtp_graph_carries_a_decrypt_stage_and_keys_resolve() -> Result<()> {
    let mut cfg = Config::default();
    cfg.ingest.transport = IngestTransport::SrtpListen {
        port: 5004,
        payload_type: 96,
    };
    cfg.keys = vec![KeyEntry {
        id: "default".to_string(),
        spec: KeySpec::Seed {
            passphrase: "orchard-gate".to_string(),
        },
    }];
    cfg.validate()?;

    let graph = Graph::build(&GraphSpec::detection_pipeline(&cfg), &AssumeAvailable)?;
    assert_eq!(graph.stage("decrypt").unwrap().capability, "srtpdec");
    assert!(graph.stage("source").is_none(), "no rtmp head in srtp mode");

    // The key the decrypt stage will request is servable, and stable across
    // repeated requests for the same identifier.
    let provider = KeyProvider::from_entries(&cfg.keys)?;
    let first = provider.material("default")?.concatenated();
    let second = provider.material("default")?.concatenated();
    assert_eq!(first, second);
    assert_eq!(first.len(), 30);
    Ok(())
}
