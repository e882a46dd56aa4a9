//! Marquee Core - Playback controller for pipeline-driven media players
//!
//! This crate sits between an application and an external media pipeline
//! ("engine") and provides:
//! - A four-state playback state machine with a canonical stopped reset
//! - Normalization of the engine's loosely typed notifications
//! - An immutable stream info model (audio, video, subtitle streams)
//! - Ordered signal delivery on the producing thread or an app-owned loop
//! - Error classification with a deterministic landing in `Stopped`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Marquee Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   application ──command──> ┌─────────────┐                      │
//! │                            │   Player    │                      │
//! │                            └──────┬──────┘                      │
//! │                                   │ state lock                  │
//! │  ┌──────────────┐  ┌──────────────┴───┐  ┌──────────────┐       │
//! │  │   Recovery   │<─┤  State Machine   ├─>│  Dispatcher  ├─> observers
//! │  │    Policy    │  └──────┬───────────┘  └──────────────┘       │
//! │  └──────────────┘         │      ▲                              │
//! │                    ┌──────┴──────┴─┐     ┌──────────────┐       │
//! │                    │   Pipeline    ├────>│  Media Info  │       │
//! │                    │   Adapter     │     └──────────────┘       │
//! │                    └──────┬──────▲─┘                            │
//! └───────────────────────────┼──────┼──────────────────────────────┘
//!                             ▼      │ notifications (generation-tagged)
//!                          ┌────────────┐
//!                          │   Engine   │
//!                          └────────────┘
//! ```

pub mod adapter;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod media_info;
pub mod player;
pub mod recovery;
pub mod state_machine;
pub mod types;

pub use adapter::{InternalEvent, PipelineAdapter};
pub use dispatcher::{Delivery, MainContext, ObserverId, Signal, SignalKind};
pub use engine::{Engine, EngineState, ManualEngine, NotificationSink, PipelineHandle};
#[cfg(feature = "simulator")]
pub use engine::SimulatedEngine;
pub use error::{Error, ErrorClass, PlaybackError, PreconditionError, ProtocolError, Result};
pub use media_info::{
    AudioStreamInfo, Fraction, MediaInfo, StreamCounts, StreamInfo, StreamType,
    SubtitleStreamInfo, VideoStreamInfo,
};
pub use player::Player;
pub use recovery::{RecoveryAction, RecoveryPolicy};
pub use state_machine::TrackSelection;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library initialization. Installing a subscriber is up to the application.
pub fn init() {
    tracing::info!(version = VERSION, "Marquee Core initialized");
}
