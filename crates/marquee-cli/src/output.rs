//! Output formatting for CLI

use chrono::{DateTime, Utc};
use marquee_core::{Delivery, MediaInfo, PlaybackState, PlayerId, Signal, StreamInfo};
use serde::Serialize;
use std::time::Duration;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// One printed signal
#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub player_id: PlayerId,
    #[serde(flatten)]
    pub signal: Signal,
    /// Player state right after the signal
    pub state: PlaybackState,
}

impl SignalRecord {
    pub fn new(player_id: PlayerId, delivery: &Delivery) -> Self {
        Self {
            sequence: delivery.sequence,
            timestamp: Utc::now(),
            player_id,
            signal: delivery.signal.clone(),
            state: delivery.snapshot.state,
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
            }
            OutputFormat::Text => format!(
                "{} #{:<4} {:<24} {:<28} [{}]",
                self.timestamp.format("%H:%M:%S%.3f"),
                self.sequence,
                self.signal.name(),
                describe(&self.signal),
                self.state
            ),
        }
    }
}

fn seconds(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}

fn describe(signal: &Signal) -> String {
    match signal {
        Signal::Buffering { percent } => format!("{percent}%"),
        Signal::DurationChanged { duration } => {
            duration.map(seconds).unwrap_or_else(|| "unknown".to_string())
        }
        Signal::EndOfStream => String::new(),
        Signal::Error { error } => format!("{} ({})", error.message, error.class),
        Signal::PositionUpdated { position } => seconds(*position),
        Signal::StateChanged { state } => state.to_string(),
        Signal::VideoDimensionsChanged { width, height } => format!("{width}x{height}"),
        Signal::MediaInfoUpdated { media_info } => {
            let counts = media_info.stream_counts();
            format!(
                "{} streams ({} audio, {} video, {} subtitle)",
                counts.total(),
                counts.audio,
                counts.video,
                counts.subtitle
            )
        }
    }
}

/// Multi-line description of a resolved resource
pub fn render_media_info(info: &MediaInfo, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return format_output(info, "json");
    }

    let mut out = String::new();
    out.push_str(&format!("URI:       {}\n", info.uri()));
    if let Some(title) = info.title() {
        out.push_str(&format!("Title:     {title}\n"));
    }
    if let Some(container) = info.container_format() {
        out.push_str(&format!("Container: {container}\n"));
    }
    out.push_str(&format!("Seekable:  {}\n", info.is_seekable()));
    out.push_str(&format!("Live:      {}\n", info.is_live()));
    out.push_str("Streams:\n");
    for stream in info.stream_list() {
        let codec = stream.codec().unwrap_or("unknown");
        let detail = match stream {
            StreamInfo::Audio(a) => format!(
                "{} Hz, {} ch, max {} bps{}",
                a.sample_rate,
                a.channels,
                a.max_bitrate,
                a.language.as_deref().map(|l| format!(", {l}")).unwrap_or_default()
            ),
            StreamInfo::Video(v) => format!(
                "{}x{} @ {} fps, par {}",
                v.width, v.height, v.framerate, v.pixel_aspect_ratio
            ),
            StreamInfo::Subtitle(s) => s.language.clone().unwrap_or_default(),
            StreamInfo::Unknown(_) => String::new(),
        };
        out.push_str(&format!(
            "  {}#{} {}: {}\n",
            stream.stream_type(),
            stream.index(),
            codec,
            detail
        ));
    }
    out
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => {
            // Text falls back to compact JSON for structured values
            serde_json::to_string(data).unwrap_or_default()
        }
    }
}
