use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::keys::KeyEntry;

const DEFAULT_RTMP_URL: &str = "rtmp://localhost/live/stream";
const DEFAULT_FIRST_BUFFER_TIMEOUT_MS: u64 = 4_000;
const DEFAULT_SRTP_PORT: u16 = 5_004;
const DEFAULT_PAYLOAD_TYPE: u8 = 96;
const DEFAULT_BATCH_WIDTH: u32 = 1920;
const DEFAULT_BATCH_HEIGHT: u32 = 1080;
const DEFAULT_BATCH_SIZE: u32 = 1;
const DEFAULT_PUSH_TIMEOUT_US: u64 = 40_000;
const DEFAULT_MODEL_CONFIG_PATH: &str = "config_infer_primary.txt";
const DEFAULT_CADENCE: u64 = 30;
const DEFAULT_PREFERRED_SINK: &str = "nveglglessink";
const DEFAULT_FALLBACK_SINK: &str = "xvimagesink";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    ingest: Option<IngestConfigFile>,
    batcher: Option<BatcherConfigFile>,
    infer: Option<InferConfigFile>,
    sampler: Option<SamplerConfigFile>,
    keys: Option<Vec<KeyEntry>>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    transport: Option<String>,
    url: Option<String>,
    port: Option<u16>,
    payload_type: Option<u8>,
    first_buffer_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BatcherConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    batch_size: Option<u32>,
    push_timeout_us: Option<u64>,
    live_source: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct InferConfigFile {
    config_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplerConfigFile {
    cadence: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    preferred_sink: Option<String>,
    fallback_sink: Option<String>,
    sync: Option<bool>,
}

/// How encoded bytes reach the pipeline. Exactly the two variants the
/// deployment supports: plain pull from an RTMP endpoint, or an encrypted
/// SRTP push onto a local UDP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestTransport {
    RtmpPull { url: String },
    SrtpListen { port: u16, payload_type: u8 },
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub transport: IngestTransport,
    /// Bounded wait for the first buffer on a live source.
    pub first_buffer_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub push_timeout_us: u64,
    pub live_source: bool,
}

#[derive(Debug, Clone)]
pub struct InferSettings {
    /// key=value config artifact for the inference engine; generated once if
    /// absent (see `model`).
    pub config_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub cadence: u64,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub preferred_sink: String,
    pub fallback_sink: String,
    pub sync: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ingest: IngestSettings,
    pub batcher: BatcherSettings,
    pub infer: InferSettings,
    pub sampler: SamplerSettings,
    pub keys: Vec<KeyEntry>,
    pub display: DisplaySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(ConfigFile::default()).expect("defaults are valid")
    }
}

impl Config {
    /// Load from the file named by `STREAMSIGHT_CONFIG` (if any), then apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMSIGHT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as [`Config::load`], with an explicit config file path. Callers
    /// that override fields afterwards must re-run [`Config::validate`].
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let ingest_file = file.ingest.unwrap_or_default();
        let transport = match ingest_file.transport.as_deref() {
            None | Some("rtmp") => IngestTransport::RtmpPull {
                url: ingest_file
                    .url
                    .unwrap_or_else(|| DEFAULT_RTMP_URL.to_string()),
            },
            Some("srtp") => IngestTransport::SrtpListen {
                port: ingest_file.port.unwrap_or(DEFAULT_SRTP_PORT),
                payload_type: ingest_file.payload_type.unwrap_or(DEFAULT_PAYLOAD_TYPE),
            },
            Some(other) => return Err(anyhow!("unknown ingest transport {:?}", other)),
        };
        let ingest = IngestSettings {
            transport,
            first_buffer_timeout_ms: ingest_file
                .first_buffer_timeout_ms
                .unwrap_or(DEFAULT_FIRST_BUFFER_TIMEOUT_MS),
        };

        let batcher_file = file.batcher.unwrap_or_default();
        let batcher = BatcherSettings {
            width: batcher_file.width.unwrap_or(DEFAULT_BATCH_WIDTH),
            height: batcher_file.height.unwrap_or(DEFAULT_BATCH_HEIGHT),
            batch_size: batcher_file.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            push_timeout_us: batcher_file.push_timeout_us.unwrap_or(DEFAULT_PUSH_TIMEOUT_US),
            live_source: batcher_file.live_source.unwrap_or(true),
        };

        let infer = InferSettings {
            config_path: file
                .infer
                .and_then(|infer| infer.config_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_CONFIG_PATH)),
        };

        let sampler = SamplerSettings {
            cadence: file
                .sampler
                .and_then(|sampler| sampler.cadence)
                .unwrap_or(DEFAULT_CADENCE),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            preferred_sink: display_file
                .preferred_sink
                .unwrap_or_else(|| DEFAULT_PREFERRED_SINK.to_string()),
            fallback_sink: display_file
                .fallback_sink
                .unwrap_or_else(|| DEFAULT_FALLBACK_SINK.to_string()),
            sync: display_file.sync.unwrap_or(false),
        };

        Ok(Self {
            ingest,
            batcher,
            infer,
            sampler,
            keys: file.keys.unwrap_or_default(),
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("STREAMSIGHT_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.ingest.transport = IngestTransport::RtmpPull { url };
            }
        }
        if let Ok(port) = std::env::var("STREAMSIGHT_LISTEN_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("STREAMSIGHT_LISTEN_PORT must be a UDP port number"))?;
            let payload_type = match &self.ingest.transport {
                IngestTransport::SrtpListen { payload_type, .. } => *payload_type,
                IngestTransport::RtmpPull { .. } => DEFAULT_PAYLOAD_TYPE,
            };
            self.ingest.transport = IngestTransport::SrtpListen { port, payload_type };
        }
        if let Ok(cadence) = std::env::var("STREAMSIGHT_CADENCE") {
            let cadence: u64 = cadence
                .parse()
                .map_err(|_| anyhow!("STREAMSIGHT_CADENCE must be a frame count"))?;
            self.sampler.cadence = cadence;
        }
        if let Ok(path) = std::env::var("STREAMSIGHT_MODEL_CONFIG") {
            if !path.trim().is_empty() {
                self.infer.config_path = PathBuf::from(path);
            }
        }
        if let Ok(passphrase) = std::env::var("STREAMSIGHT_KEY_SEED") {
            if !passphrase.trim().is_empty() {
                self.keys.retain(|entry| entry.id != "default");
                self.keys.push(KeyEntry {
                    id: "default".to_string(),
                    spec: crate::keys::KeySpec::Seed { passphrase },
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match &self.ingest.transport {
            IngestTransport::RtmpPull { url } => {
                let parsed =
                    url::Url::parse(url).map_err(|e| anyhow!("invalid source url {:?}: {}", url, e))?;
                if !matches!(parsed.scheme(), "rtmp" | "rtmps") {
                    return Err(anyhow!(
                        "source url must use rtmp:// or rtmps://, got {:?}",
                        parsed.scheme()
                    ));
                }
            }
            IngestTransport::SrtpListen { port, payload_type } => {
                if *port == 0 {
                    return Err(anyhow!("listen port must be non-zero"));
                }
                if *payload_type > 127 {
                    return Err(anyhow!("rtp payload type must be 0..=127"));
                }
                if self.keys.is_empty() {
                    return Err(anyhow!(
                        "srtp ingest requires at least one provisioned key (keys[] or STREAMSIGHT_KEY_SEED)"
                    ));
                }
            }
        }
        if self.batcher.batch_size == 0 {
            return Err(anyhow!("batch size must be at least 1"));
        }
        if self.sampler.cadence == 0 {
            return Err(anyhow!("sampling cadence must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_rtmp_pipeline() {
        let cfg = Config::default();
        assert_eq!(
            cfg.ingest.transport,
            IngestTransport::RtmpPull {
                url: DEFAULT_RTMP_URL.to_string()
            }
        );
        assert_eq!(cfg.batcher.width, 1920);
        assert_eq!(cfg.batcher.batch_size, 1);
        assert_eq!(cfg.sampler.cadence, 30);
        assert!(!cfg.display.sync);
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "ingest": {"transport": "srtp", "port": 6000, "payload_type": 97},
                "sampler": {"cadence": 10},
                "keys": [{"id": "cam0", "kind": "seed", "passphrase": "orchard-gate"}]
            }"#,
        )?;
        let cfg = Config::from_file(file)?;
        cfg.validate()?;
        assert_eq!(
            cfg.ingest.transport,
            IngestTransport::SrtpListen {
                port: 6000,
                payload_type: 97
            }
        );
        assert_eq!(cfg.sampler.cadence, 10);
        assert_eq!(cfg.keys.len(), 1);
        Ok(())
    }

    #[test]
    fn srtp_without_keys_fails_validation() -> Result<()> {
        let file: ConfigFile =
            serde_json::from_str(r#"{"ingest": {"transport": "srtp", "port": 6000}}"#)?;
        let cfg = Config::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn bad_source_urls_are_rejected() -> Result<()> {
        let file: ConfigFile =
            serde_json::from_str(r#"{"ingest": {"transport": "rtmp", "url": "http://nope"}}"#)?;
        let cfg = Config::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn unknown_transport_is_an_error() {
        let file: ConfigFile =
            serde_json::from_str(r#"{"ingest": {"transport": "carrier-pigeon"}}"#).unwrap();
        assert!(Config::from_file(file).is_err());
    }

    #[test]
    fn zero_cadence_fails_validation() -> Result<()> {
        let file: ConfigFile = serde_json::from_str(r#"{"sampler": {"cadence": 0}}"#)?;
        let cfg = Config::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }
}
