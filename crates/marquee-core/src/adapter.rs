//! Pipeline adapter
//!
//! Isolates the state machine from the engine: forwards commands with
//! argument validation only, and normalizes the engine's loosely typed
//! notifications into the closed [`InternalEvent`] set.

use crate::engine::{kinds, Engine, EngineState, NotificationSink, PipelineHandle};
use crate::error::{EngineError, PlaybackError, PreconditionError, ProtocolError};
use crate::media_info::{
    AudioStreamInfo, Fraction, MediaInfo, StreamCommon, StreamInfo, StreamType,
    SubtitleStreamInfo, Tags, VideoStreamInfo,
};
use crate::recovery::RecoveryPolicy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Normalized engine notification
#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    Buffering(u8),
    DurationChanged(Option<Duration>),
    PositionTick(Duration),
    EndOfStream,
    Error(PlaybackError),
    Warning(String),
    TopologyDiscovered(MediaInfo),
    VideoDimensions { width: u32, height: u32 },
    EngineState(EngineState),
}

/// Builds the notification sink for a given playback generation
pub type SinkFactory = Box<dyn Fn(u64) -> NotificationSink + Send + Sync>;

#[derive(Deserialize)]
struct BufferingPayload {
    percent: i64,
}

#[derive(Deserialize)]
struct DurationPayload {
    duration_ns: Option<u64>,
}

#[derive(Deserialize)]
struct PositionPayload {
    position_ns: u64,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct WarningPayload {
    message: String,
}

#[derive(Deserialize)]
struct DimensionsPayload {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct StatePayload {
    state: EngineState,
}

#[derive(Deserialize)]
struct TopologyPayload {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    seekable: bool,
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    container_format: Option<String>,
    streams: Vec<StreamDescriptor>,
}

#[derive(Deserialize)]
struct StreamDescriptor {
    #[serde(rename = "type")]
    stream_type: String,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    codec: Option<String>,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    caps: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    bitrate: Option<u32>,
    #[serde(default)]
    max_bitrate: Option<u32>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    framerate: Option<(u32, u32)>,
    #[serde(default)]
    pixel_aspect_ratio: Option<(u32, u32)>,
}

fn parse<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, ProtocolError> {
    T::deserialize(payload).map_err(|source| ProtocolError::MalformedPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Forwards commands to the engine and owns the current pipeline handle
pub struct PipelineAdapter {
    engine: Arc<dyn Engine>,
    sinks: SinkFactory,
    policy: RecoveryPolicy,
    uri: Option<String>,
    pipeline: Option<PipelineHandle>,
}

impl PipelineAdapter {
    pub fn new(engine: Arc<dyn Engine>, sinks: SinkFactory) -> Self {
        Self {
            engine,
            sinks,
            policy: RecoveryPolicy::new(),
            uri: None,
            pipeline: None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    /// Validate and remember the URI used by the next pipeline
    pub fn set_uri(&mut self, uri: &str) -> Result<(), PreconditionError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(PreconditionError::EmptyUri);
        }
        Url::parse(uri).map_err(|e| PreconditionError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        self.uri = Some(uri.to_string());
        Ok(())
    }

    /// Create the pipeline for `generation` if none is open
    pub fn open(&mut self, generation: u64) -> Result<PipelineHandle, EngineError> {
        if let Some(handle) = self.pipeline {
            return Ok(handle);
        }
        let uri = self
            .uri
            .as_deref()
            .ok_or(EngineError::Failed("no URI".to_string()))?;
        let handle = self.engine.create_pipeline(uri, (self.sinks)(generation))?;
        debug!(%handle, generation, uri, "Pipeline created");
        self.pipeline = Some(handle);
        Ok(handle)
    }

    fn current(&self) -> Result<PipelineHandle, EngineError> {
        self.pipeline.ok_or(EngineError::UnknownPipeline)
    }

    pub fn play(&self) -> Result<(), EngineError> {
        self.engine.set_state(self.current()?, EngineState::Playing)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.engine.set_state(self.current()?, EngineState::Paused)
    }

    pub fn seek(&self, position: Duration) -> Result<(), EngineError> {
        self.engine.seek(self.current()?, position)
    }

    pub fn select_stream(&self, stream_type: StreamType, index: u32) -> Result<(), EngineError> {
        self.engine.select_stream(self.current()?, stream_type, index)
    }

    /// Stop and release the current pipeline, if any
    pub fn stop(&mut self) {
        if let Some(handle) = self.pipeline.take() {
            if let Err(e) = self.engine.set_state(handle, EngineState::Stopped) {
                warn!(%handle, error = %e, "Engine refused to stop pipeline");
            }
            self.engine.release(handle);
            debug!(%handle, "Pipeline released");
        }
    }

    /// Map an engine notification onto an internal event
    pub fn on_notify(&self, kind: &str, payload: &Value) -> Result<InternalEvent, ProtocolError> {
        match kind {
            kinds::BUFFERING => {
                let p: BufferingPayload = parse(kind, payload)?;
                let percent = u8::try_from(p.percent)
                    .ok()
                    .filter(|percent| *percent <= 100)
                    .ok_or_else(|| ProtocolError::OutOfRange {
                        kind: kind.to_string(),
                        field: "percent",
                        value: p.percent.to_string(),
                    })?;
                Ok(InternalEvent::Buffering(percent))
            }
            kinds::DURATION => {
                let p: DurationPayload = parse(kind, payload)?;
                Ok(InternalEvent::DurationChanged(p.duration_ns.map(Duration::from_nanos)))
            }
            kinds::POSITION => {
                let p: PositionPayload = parse(kind, payload)?;
                Ok(InternalEvent::PositionTick(Duration::from_nanos(p.position_ns)))
            }
            kinds::END_OF_STREAM => Ok(InternalEvent::EndOfStream),
            kinds::ERROR => match parse::<ErrorPayload>(kind, payload) {
                Ok(p) => Ok(InternalEvent::Error(
                    self.policy.from_notification(&p.code, p.message, p.detail),
                )),
                // A broken error report is still an error
                Err(e) => Ok(InternalEvent::Error(self.policy.malformed(e.to_string()))),
            },
            kinds::WARNING => {
                let p: WarningPayload = parse(kind, payload)?;
                Ok(InternalEvent::Warning(p.message))
            }
            kinds::VIDEO_DIMENSIONS => {
                let p: DimensionsPayload = parse(kind, payload)?;
                Ok(InternalEvent::VideoDimensions {
                    width: p.width,
                    height: p.height,
                })
            }
            kinds::STATE => {
                let p: StatePayload = parse(kind, payload)?;
                Ok(InternalEvent::EngineState(p.state))
            }
            kinds::STREAM_TOPOLOGY => {
                let p: TopologyPayload = parse(kind, payload)?;
                Ok(InternalEvent::TopologyDiscovered(self.media_info_from(kind, p)?))
            }
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }

    fn media_info_from(
        &self,
        kind: &str,
        topology: TopologyPayload,
    ) -> Result<MediaInfo, ProtocolError> {
        let mut next_index = [0u32; 4];
        let streams = topology
            .streams
            .into_iter()
            .map(|descriptor| {
                let stream_type = match descriptor.stream_type.as_str() {
                    "audio" => StreamType::Audio,
                    "video" => StreamType::Video,
                    "subtitle" | "text" => StreamType::Subtitle,
                    _ => StreamType::Unknown,
                };
                let slot = &mut next_index[stream_type as usize];
                let index = descriptor.index.unwrap_or(*slot);
                *slot = index.checked_add(1).ok_or_else(|| ProtocolError::OutOfRange {
                    kind: kind.to_string(),
                    field: "index",
                    value: index.to_string(),
                })?;
                Ok(stream_from(stream_type, index, descriptor))
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        let uri = topology
            .uri
            .or_else(|| self.uri.clone())
            .unwrap_or_default();

        Ok(MediaInfo::new(uri, topology.seekable, streams)
            .with_title(topology.title)
            .with_container_format(topology.container_format)
            .with_live(topology.is_live))
    }
}

impl Drop for PipelineAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_from(stream_type: StreamType, index: u32, d: StreamDescriptor) -> StreamInfo {
    let common = StreamCommon {
        index,
        codec: d.codec,
        tags: d.tags,
        caps: d.caps,
    };
    let fraction = |pair: Option<(u32, u32)>| {
        pair.map(|(n, d)| Fraction::new(n, d)).unwrap_or_default()
    };
    match stream_type {
        StreamType::Audio => {
            let language = d.language.or_else(|| common.tags.get("language-code").cloned());
            StreamInfo::Audio(AudioStreamInfo {
                common,
                sample_rate: d.sample_rate.unwrap_or(0),
                channels: d.channels.unwrap_or(0),
                bitrate: d.bitrate.unwrap_or(0),
                max_bitrate: d.max_bitrate.unwrap_or(0),
                language,
            })
        }
        StreamType::Video => StreamInfo::Video(VideoStreamInfo {
            common,
            width: d.width.unwrap_or(0),
            height: d.height.unwrap_or(0),
            framerate: fraction(d.framerate),
            pixel_aspect_ratio: fraction(d.pixel_aspect_ratio),
            bitrate: d.bitrate.unwrap_or(0),
            max_bitrate: d.max_bitrate.unwrap_or(0),
        }),
        StreamType::Subtitle => {
            let language = d.language.or_else(|| common.tags.get("language-code").cloned());
            StreamInfo::Subtitle(SubtitleStreamInfo { common, language })
        }
        StreamType::Unknown => StreamInfo::Unknown(common),
    }
}
