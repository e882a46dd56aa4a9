//! External pipeline engine interface
//!
//! The engine owns demuxing, decoding, rendering and clocks. The core only
//! needs to create a pipeline per playback cycle, drive its state, seek, and
//! receive notifications. Notifications are loosely typed (`kind` plus a JSON
//! payload) and normalized by the [`PipelineAdapter`](crate::adapter::PipelineAdapter).
//!
//! Implementations must post notifications asynchronously, from their own
//! threads, never from inside one of the command methods below.

pub mod manual;
#[cfg(feature = "simulator")]
pub mod simulated;

pub use manual::{EngineCall, ManualEngine};
#[cfg(feature = "simulator")]
pub use simulated::SimulatedEngine;

use crate::error::EngineError;
use crate::media_info::StreamType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Notification kinds understood by the adapter
pub mod kinds {
    pub const BUFFERING: &str = "buffering";
    pub const DURATION: &str = "duration";
    pub const POSITION: &str = "position";
    pub const END_OF_STREAM: &str = "eos";
    pub const ERROR: &str = "error";
    pub const WARNING: &str = "warning";
    pub const STREAM_TOPOLOGY: &str = "stream-topology";
    pub const VIDEO_DIMENSIONS: &str = "video-dimensions";
    pub const STATE: &str = "state";
}

/// Opaque per-cycle pipeline identifier issued by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineHandle(pub u64);

impl std::fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

/// Pipeline states, as commanded and as reported by the `state` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Buffering,
    Paused,
    Playing,
}

type PostFn = dyn Fn(u64, &str, Value) + Send + Sync;

/// Channel the engine posts notifications through.
///
/// Each sink is bound to the playback cycle (generation) its pipeline was
/// created for; the player drops notifications from superseded cycles.
#[derive(Clone)]
pub struct NotificationSink {
    generation: u64,
    post: Arc<PostFn>,
}

impl NotificationSink {
    pub fn new<F>(generation: u64, post: F) -> Self
    where
        F: Fn(u64, &str, Value) + Send + Sync + 'static,
    {
        Self {
            generation,
            post: Arc::new(post),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post one notification
    pub fn post(&self, kind: &str, payload: Value) {
        (self.post)(self.generation, kind, payload);
    }
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Capability surface the core requires from a media engine
pub trait Engine: Send + Sync {
    /// Create a pipeline for `uri`. Notifications for it go to `sink`.
    fn create_pipeline(
        &self,
        uri: &str,
        sink: NotificationSink,
    ) -> Result<PipelineHandle, EngineError>;

    /// Request a state change; completion is reported by a `state` notification
    fn set_state(&self, handle: PipelineHandle, state: EngineState) -> Result<(), EngineError>;

    /// Request a seek; the new position is reported by a `position` notification
    fn seek(&self, handle: PipelineHandle, position: Duration) -> Result<(), EngineError>;

    /// Switch the active stream of one type
    fn select_stream(
        &self,
        _handle: PipelineHandle,
        _stream_type: StreamType,
        _index: u32,
    ) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("stream selection"))
    }

    /// Free a pipeline after it has been stopped
    fn release(&self, _handle: PipelineHandle) {}
}
