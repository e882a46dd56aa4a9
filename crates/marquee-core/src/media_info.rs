//! Stream info model
//!
//! Immutable description of one resolved media resource and the streams the
//! engine discovered in it. A new [`MediaInfo`] is built for every topology
//! discovery and shared behind `Arc`, so observers holding an older one keep a
//! stable view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form stream tags (language, title, encoder, ...)
pub type Tags = BTreeMap<String, String>;

/// Declared media type of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Subtitle => "subtitle",
            StreamType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numerator/denominator pair (framerate, pixel aspect ratio)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub numer: u32,
    pub denom: u32,
}

impl Fraction {
    pub const fn new(numer: u32, denom: u32) -> Self {
        Self { numer, denom }
    }

    /// Value as a float, 0.0 when the denominator is zero
    pub fn as_f64(&self) -> f64 {
        if self.denom == 0 {
            0.0
        } else {
            self.numer as f64 / self.denom as f64
        }
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

/// Fields shared by every stream type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCommon {
    /// Zero-based index among streams of the same type
    pub index: u32,
    pub codec: Option<String>,
    pub tags: Tags,
    /// Negotiated capability description
    pub caps: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    #[serde(flatten)]
    pub common: StreamCommon,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
    pub max_bitrate: u32,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    #[serde(flatten)]
    pub common: StreamCommon,
    pub width: u32,
    pub height: u32,
    pub framerate: Fraction,
    pub pixel_aspect_ratio: Fraction,
    pub bitrate: u32,
    pub max_bitrate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleStreamInfo {
    #[serde(flatten)]
    pub common: StreamCommon,
    pub language: Option<String>,
}

/// One discovered stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamInfo {
    Audio(AudioStreamInfo),
    Video(VideoStreamInfo),
    Subtitle(SubtitleStreamInfo),
    Unknown(StreamCommon),
}

impl StreamInfo {
    pub fn common(&self) -> &StreamCommon {
        match self {
            StreamInfo::Audio(a) => &a.common,
            StreamInfo::Video(v) => &v.common,
            StreamInfo::Subtitle(s) => &s.common,
            StreamInfo::Unknown(c) => c,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamInfo::Audio(_) => StreamType::Audio,
            StreamInfo::Video(_) => StreamType::Video,
            StreamInfo::Subtitle(_) => StreamType::Subtitle,
            StreamInfo::Unknown(_) => StreamType::Unknown,
        }
    }

    pub fn index(&self) -> u32 {
        self.common().index
    }

    pub fn codec(&self) -> Option<&str> {
        self.common().codec.as_deref()
    }

    pub fn tags(&self) -> &Tags {
        &self.common().tags
    }

    pub fn caps(&self) -> Option<&str> {
        self.common().caps.as_deref()
    }

    pub fn as_audio(&self) -> Option<&AudioStreamInfo> {
        match self {
            StreamInfo::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoStreamInfo> {
        match self {
            StreamInfo::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_subtitle(&self) -> Option<&SubtitleStreamInfo> {
        match self {
            StreamInfo::Subtitle(s) => Some(s),
            _ => None,
        }
    }
}

/// Number of streams per declared type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounts {
    pub audio: usize,
    pub video: usize,
    pub subtitle: usize,
    pub unknown: usize,
}

impl StreamCounts {
    pub fn total(&self) -> usize {
        self.audio + self.video + self.subtitle + self.unknown
    }
}

/// Description of one resolved media resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    uri: String,
    seekable: bool,
    is_live: bool,
    title: Option<String>,
    container_format: Option<String>,
    streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// Build from discovery results. Stream order is kept as given.
    pub fn new(uri: impl Into<String>, seekable: bool, streams: Vec<StreamInfo>) -> Self {
        Self {
            uri: uri.into(),
            seekable,
            is_live: false,
            title: None,
            container_format: None,
            streams,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_container_format(mut self, container_format: Option<String>) -> Self {
        self.container_format = container_format;
        self
    }

    pub fn with_live(mut self, is_live: bool) -> Self {
        self.is_live = is_live;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn container_format(&self) -> Option<&str> {
        self.container_format.as_deref()
    }

    /// All streams in discovery order
    pub fn stream_list(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &AudioStreamInfo> {
        self.streams.iter().filter_map(StreamInfo::as_audio)
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &VideoStreamInfo> {
        self.streams.iter().filter_map(StreamInfo::as_video)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &SubtitleStreamInfo> {
        self.streams.iter().filter_map(StreamInfo::as_subtitle)
    }

    pub fn has_video(&self) -> bool {
        self.video_streams().next().is_some()
    }

    /// Find a stream by type and per-type index
    pub fn stream(&self, stream_type: StreamType, index: u32) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| s.stream_type() == stream_type && s.index() == index)
    }

    /// Lowest-indexed stream of a type
    pub fn first_of(&self, stream_type: StreamType) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.stream_type() == stream_type)
            .min_by_key(|s| s.index())
    }

    pub fn stream_counts(&self) -> StreamCounts {
        let mut counts = StreamCounts::default();
        for stream in &self.streams {
            match stream.stream_type() {
                StreamType::Audio => counts.audio += 1,
                StreamType::Video => counts.video += 1,
                StreamType::Subtitle => counts.subtitle += 1,
                StreamType::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}
