//! Core types for Marquee

use crate::error::PlaybackError;
use crate::media_info::{MediaInfo, StreamType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a player instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No pipeline, snapshot in its canonical reset form
    Stopped,
    /// Pipeline prerolling or refilling
    Buffering,
    /// Playback paused
    Paused,
    /// Content is playing
    Playing,
}

impl PlaybackState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, target),
            // From Stopped
            (Stopped, Buffering) |
            // From Buffering
            (Buffering, Playing) | (Buffering, Paused) | (Buffering, Stopped) |
            // From Playing
            (Playing, Buffering) | (Playing, Paused) | (Playing, Stopped) |
            // From Paused
            (Paused, Playing) | (Paused, Buffering) | (Paused, Stopped)
        )
    }

    /// Stable lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Paused => "paused",
            PlaybackState::Playing => "playing",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands accepted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Seek(Duration),
    SetUri(String),
    SelectStream { stream_type: StreamType, index: u32 },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Play => CommandKind::Play,
            Command::Pause => CommandKind::Pause,
            Command::Stop => CommandKind::Stop,
            Command::Seek(_) => CommandKind::Seek,
            Command::SetUri(_) => CommandKind::SetUri,
            Command::SelectStream { .. } => CommandKind::SelectStream,
        }
    }
}

/// Payload-free command discriminant, used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Play,
    Pause,
    Stop,
    Seek,
    SetUri,
    SelectStream,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Play => write!(f, "play"),
            CommandKind::Pause => write!(f, "pause"),
            CommandKind::Stop => write!(f, "stop"),
            CommandKind::Seek => write!(f, "seek"),
            CommandKind::SetUri => write!(f, "set uri"),
            CommandKind::SelectStream => write!(f, "select stream"),
        }
    }
}

/// Externally observable playback state at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    /// Time since media start, unknown until the engine reports it
    pub position: Option<Duration>,
    /// Media duration, unknown until discovered
    pub duration: Option<Duration>,
    /// 0-100, always 100 outside of `Buffering`
    pub buffering_percent: u8,
    pub end_of_stream: bool,
    pub error: Option<PlaybackError>,
    pub video_width: u32,
    pub video_height: u32,
    pub media_info: Option<Arc<MediaInfo>>,
}

impl PlayerSnapshot {
    /// Restore the canonical stopped form
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Check for the canonical stopped form
    pub fn is_reset(&self) -> bool {
        *self == Self::default()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: None,
            duration: None,
            buffering_percent: 100,
            end_of_stream: false,
            error: None,
            video_width: 0,
            video_height: 0,
            media_info: None,
        }
    }
}

/// Conditions for leaving `Buffering` once the engine reports playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartGate {
    /// Hold `Buffering` until stream topology has been published
    pub require_media_info: bool,
    /// Hold `Buffering` until the reported fill level reaches this percentage
    pub min_buffering_percent: u8,
}

impl Default for StartGate {
    fn default() -> Self {
        Self {
            require_media_info: true,
            min_buffering_percent: 100,
        }
    }
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Deliver signals through a `MainContext` instead of the producing thread
    pub dispatch_to_main_context: bool,
    /// Minimum spacing of position signals while playing (0 = every tick)
    pub position_update_interval_ms: u64,
    /// Buffering to playing precedence
    pub start_gate: StartGate,
    /// Drive to `Stopped` automatically after end of stream
    pub stop_on_eos: bool,
}

impl PlayerConfig {
    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.start_gate.min_buffering_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "start_gate.min_buffering_percent must be 0-100, got {}",
                self.start_gate.min_buffering_percent
            )));
        }
        Ok(())
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            dispatch_to_main_context: false,
            position_update_interval_ms: 100,
            start_gate: StartGate::default(),
            stop_on_eos: true,
        }
    }
}
