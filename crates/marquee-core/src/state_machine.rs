//! Playback state machine
//!
//! Owns the snapshot, validates commands against the current state and folds
//! normalized engine events into it. Every change is queued as a [`Delivery`]
//! in an outbox the player drains under the same lock, so snapshot mutation
//! and signal ordering stay a single critical section.

use crate::adapter::{InternalEvent, PipelineAdapter};
use crate::dispatcher::{Delivery, Signal};
use crate::engine::EngineState;
use crate::error::{EngineError, PlaybackError, PreconditionError};
use crate::media_info::{MediaInfo, StreamType};
use crate::recovery::{RecoveryAction, RecoveryPolicy};
use crate::types::{Command, CommandKind, PlaybackState, PlayerConfig, PlayerSnapshot};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A position this close to a requested seek target completes the seek
const SEEK_SETTLE_TOLERANCE: Duration = Duration::from_millis(100);

/// Currently selected stream index per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackSelection {
    pub audio: Option<u32>,
    pub video: Option<u32>,
    pub subtitle: Option<u32>,
}

impl TrackSelection {
    /// First stream of each type
    pub fn defaults_for(info: &MediaInfo) -> Self {
        Self {
            audio: info.first_of(StreamType::Audio).map(|s| s.index()),
            video: info.first_of(StreamType::Video).map(|s| s.index()),
            subtitle: info.first_of(StreamType::Subtitle).map(|s| s.index()),
        }
    }

    pub fn get(&self, stream_type: StreamType) -> Option<u32> {
        match stream_type {
            StreamType::Audio => self.audio,
            StreamType::Video => self.video,
            StreamType::Subtitle => self.subtitle,
            StreamType::Unknown => None,
        }
    }

    fn set(&mut self, stream_type: StreamType, index: u32) {
        match stream_type {
            StreamType::Audio => self.audio = Some(index),
            StreamType::Video => self.video = Some(index),
            StreamType::Subtitle => self.subtitle = Some(index),
            StreamType::Unknown => {}
        }
    }
}

pub struct StateMachine {
    config: PlayerConfig,
    adapter: PipelineAdapter,
    policy: RecoveryPolicy,
    snapshot: PlayerSnapshot,
    generation: u64,
    sequence: u64,
    /// Last state the engine reported for the current cycle
    engine_state: EngineState,
    /// Seek requested while stopped, issued once the pipeline exists
    pending_seek: Option<Duration>,
    /// Target of a seek the engine has not reported back yet
    seek_target: Option<Duration>,
    /// Whether the start gate opened in this cycle
    started: bool,
    /// Last buffering level the engine reported, kept across pauses
    buffer_level: u8,
    selection: TrackSelection,
    last_error: Option<PlaybackError>,
    last_position_signal: Option<Instant>,
    /// Last position observers were told about
    delivered_position: Option<Duration>,
    outbox: Vec<Delivery>,
}

impl StateMachine {
    pub fn new(config: PlayerConfig, adapter: PipelineAdapter) -> Self {
        Self {
            config,
            adapter,
            policy: RecoveryPolicy::new(),
            snapshot: PlayerSnapshot::default(),
            generation: 0,
            sequence: 0,
            engine_state: EngineState::Stopped,
            pending_seek: None,
            seek_target: None,
            started: false,
            buffer_level: 100,
            selection: TrackSelection::default(),
            last_error: None,
            last_position_signal: None,
            delivered_position: None,
            outbox: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &PlayerSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> PlaybackState {
        self.snapshot.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn uri(&self) -> Option<&str> {
        self.adapter.uri()
    }

    pub fn selection(&self) -> TrackSelection {
        self.selection
    }

    pub fn last_error(&self) -> Option<&PlaybackError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Signals produced since the last call
    pub fn take_outbox(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.outbox)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn submit(&mut self, cmd: Command) -> Result<(), PreconditionError> {
        debug!(command = %cmd.kind(), state = %self.snapshot.state, "Command");
        match cmd {
            Command::SetUri(uri) => self.set_uri(&uri),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Seek(position) => self.seek(position),
            Command::SelectStream { stream_type, index } => self.select_stream(stream_type, index),
        }
    }

    fn set_uri(&mut self, uri: &str) -> Result<(), PreconditionError> {
        self.adapter.set_uri(uri)?;
        self.pending_seek = None;
        if self.snapshot.state != PlaybackState::Stopped {
            self.stop();
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), PreconditionError> {
        match self.snapshot.state {
            PlaybackState::Stopped => {
                if self.adapter.uri().is_none() {
                    return Err(PreconditionError::NoUri);
                }
                self.generation += 1;
                self.engine_state = EngineState::Stopped;
                self.transition(PlaybackState::Buffering);

                let generation = self.generation;
                let started = self
                    .adapter
                    .open(generation)
                    .and_then(|_| self.adapter.play());
                if let Err(e) = started {
                    self.fail_engine(&e);
                    return Ok(());
                }
                if let Some(position) = self.pending_seek.take() {
                    self.issue_seek(position);
                }
            }
            PlaybackState::Paused => {
                if let Err(e) = self.adapter.play() {
                    self.fail_engine(&e);
                }
            }
            PlaybackState::Playing if self.snapshot.end_of_stream => {
                // Still playing after end of stream: start over
                self.snapshot.end_of_stream = false;
                self.issue_seek(Duration::ZERO);
            }
            PlaybackState::Buffering | PlaybackState::Playing => {
                trace!(state = %self.snapshot.state, "Play ignored, already started");
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PreconditionError> {
        match self.snapshot.state {
            PlaybackState::Stopped => Err(PreconditionError::InvalidCommand {
                command: CommandKind::Pause,
                state: PlaybackState::Stopped,
            }),
            PlaybackState::Paused => Ok(()),
            PlaybackState::Buffering | PlaybackState::Playing => {
                if let Err(e) = self.adapter.pause() {
                    self.fail_engine(&e);
                }
                Ok(())
            }
        }
    }

    /// Tear down the cycle. Safe from any state.
    pub fn stop(&mut self) {
        self.pending_seek = None;
        self.end_cycle();
    }

    fn seek(&mut self, position: Duration) -> Result<(), PreconditionError> {
        if self.snapshot.state == PlaybackState::Stopped {
            if self.adapter.uri().is_none() {
                return Err(PreconditionError::NoUri);
            }
            self.pending_seek = Some(position);
            return Ok(());
        }
        if let Some(info) = &self.snapshot.media_info {
            if !info.is_seekable() {
                warn!(uri = info.uri(), "Seeking in a non-seekable resource");
            }
        }
        self.snapshot.end_of_stream = false;
        self.issue_seek(position);
        Ok(())
    }

    fn issue_seek(&mut self, position: Duration) {
        let position = self.clamp(position);
        match self.adapter.seek(position) {
            Ok(()) => self.seek_target = Some(position),
            Err(e) => self.fail_engine(&e),
        }
    }

    fn select_stream(&mut self, stream_type: StreamType, index: u32) -> Result<(), PreconditionError> {
        let info = self
            .snapshot
            .media_info
            .as_ref()
            .ok_or(PreconditionError::NoMediaInfo)?;
        if info.stream(stream_type, index).is_none() {
            return Err(PreconditionError::NoSuchStream { stream_type, index });
        }
        match self.adapter.select_stream(stream_type, index) {
            Ok(()) => {
                self.selection.set(stream_type, index);
                info!(%stream_type, index, "Stream selected");
            }
            Err(EngineError::Unsupported(what)) => {
                warn!(%stream_type, index, unsupported = what, "Engine cannot switch streams");
            }
            Err(e) => self.fail_engine(&e),
        }
        Ok(())
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    /// Raw notification from the sink of `generation`
    pub fn on_notification(&mut self, generation: u64, kind: &str, payload: &Value) {
        if generation != self.generation || self.snapshot.state == PlaybackState::Stopped {
            trace!(generation, current = self.generation, kind, "Dropping stale notification");
            return;
        }
        match self.adapter.on_notify(kind, payload) {
            Ok(event) => self.on_pipeline_event(event),
            Err(e) => warn!(error = %e, code = e.error_code(), "Ignoring engine notification"),
        }
    }

    pub fn on_pipeline_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Buffering(percent) => self.on_buffering(percent),
            InternalEvent::DurationChanged(duration) => self.on_duration(duration),
            InternalEvent::PositionTick(position) => self.on_position(position),
            InternalEvent::EndOfStream => self.on_end_of_stream(),
            InternalEvent::Error(err) => self.fail(err),
            InternalEvent::Warning(message) => warn!(message = %message, "Engine warning"),
            InternalEvent::TopologyDiscovered(info) => self.on_topology(info),
            InternalEvent::VideoDimensions { width, height } => {
                self.snapshot.video_width = width;
                self.snapshot.video_height = height;
                self.emit(Signal::VideoDimensionsChanged { width, height });
            }
            InternalEvent::EngineState(state) => self.on_engine_state(state),
        }
    }

    fn on_buffering(&mut self, percent: u8) {
        self.buffer_level = percent;
        match self.snapshot.state {
            PlaybackState::Buffering => {
                self.snapshot.buffering_percent = percent;
                self.emit(Signal::Buffering { percent });
                self.try_open_gate();
            }
            PlaybackState::Playing if percent < 100 => {
                info!(from = %PlaybackState::Playing, to = %PlaybackState::Buffering, percent, "State transition");
                self.snapshot.state = PlaybackState::Buffering;
                self.snapshot.buffering_percent = percent;
                self.emit(Signal::Buffering { percent });
                self.emit(Signal::StateChanged {
                    state: PlaybackState::Buffering,
                });
            }
            state => trace!(%state, percent, "Buffering level ignored"),
        }
    }

    fn on_duration(&mut self, duration: Option<Duration>) {
        if self.snapshot.duration == duration {
            return;
        }
        self.snapshot.duration = duration;
        self.snapshot.position = self.snapshot.position.map(|p| self.clamp(p));
        self.emit(Signal::DurationChanged { duration });
    }

    fn on_position(&mut self, position: Duration) {
        let position = self.clamp(position);
        let playing = self.snapshot.state == PlaybackState::Playing;
        let last = self.snapshot.position;
        let backward = last.is_some_and(|last| position < last);

        // Ticks posted before the engine handled the seek may still arrive
        let settles_seek = self.seek_target.is_some_and(|target| {
            distance(position, target) <= SEEK_SETTLE_TOLERANCE
                || (backward && last.is_some_and(|last| target < last))
        });
        if settles_seek {
            debug!(?position, target = ?self.seek_target, "Seek settled");
            self.seek_target = None;
        } else if playing && backward {
            trace!(?position, "Dropping backward position tick");
            return;
        }
        self.snapshot.position = Some(position);

        let interval = self.config.position_update_interval();
        let now = Instant::now();
        if playing && !settles_seek && !interval.is_zero() {
            if let Some(last) = self.last_position_signal {
                if now.duration_since(last) < interval {
                    trace!(?position, "Position tick absorbed");
                    return;
                }
            }
        }
        self.last_position_signal = Some(now);
        self.delivered_position = Some(position);
        self.emit(Signal::PositionUpdated { position });
    }

    fn on_end_of_stream(&mut self) {
        // Observers see the final position before end of stream, even if
        // the last tick was absorbed by the throttle
        if let Some(duration) = self.snapshot.duration {
            if self.delivered_position != Some(duration) {
                self.snapshot.position = Some(duration);
                self.delivered_position = Some(duration);
                self.emit(Signal::PositionUpdated { position: duration });
            }
        }
        self.snapshot.end_of_stream = true;
        info!(position = ?self.snapshot.position, "End of stream");
        self.emit(Signal::EndOfStream);

        if self.config.stop_on_eos {
            self.end_cycle();
        }
    }

    fn on_topology(&mut self, info: MediaInfo) {
        let info = Arc::new(info);
        let counts = info.stream_counts();
        debug!(
            uri = info.uri(),
            audio = counts.audio,
            video = counts.video,
            subtitle = counts.subtitle,
            "Media info updated"
        );
        self.selection = TrackSelection::defaults_for(&info);
        self.snapshot.media_info = Some(info.clone());
        self.emit(Signal::MediaInfoUpdated { media_info: info });
        self.try_open_gate();
    }

    fn on_engine_state(&mut self, reported: EngineState) {
        self.engine_state = reported;
        match (reported, self.snapshot.state) {
            (EngineState::Playing, PlaybackState::Buffering) => self.try_open_gate(),
            (EngineState::Playing, PlaybackState::Paused) if self.started => {
                self.transition(PlaybackState::Playing)
            }
            (EngineState::Playing, PlaybackState::Paused) => {
                // Paused before the gate ever opened: resume into Buffering
                self.snapshot.buffering_percent = self.buffer_level;
                self.transition(PlaybackState::Buffering);
                self.try_open_gate();
            }
            (EngineState::Paused, PlaybackState::Buffering | PlaybackState::Playing) => {
                self.transition(PlaybackState::Paused)
            }
            (EngineState::Buffering, PlaybackState::Playing) => {
                self.transition(PlaybackState::Buffering)
            }
            (reported, state) => trace!(?reported, %state, "Engine state needs no transition"),
        }
    }

    /// Enter `Playing` once the engine plays and the start gate holds
    fn try_open_gate(&mut self) {
        if self.snapshot.state != PlaybackState::Buffering || self.engine_state != EngineState::Playing {
            return;
        }
        let gate = self.config.start_gate;
        if gate.require_media_info && self.snapshot.media_info.is_none() {
            trace!("Start gate waiting for media info");
            return;
        }
        if self.buffer_level < gate.min_buffering_percent {
            trace!(percent = self.buffer_level, "Start gate waiting for buffering");
            return;
        }
        self.last_error = None;
        self.started = true;
        self.transition(PlaybackState::Playing);
    }

    // ========================================================================
    // Failure and teardown
    // ========================================================================

    fn fail_engine(&mut self, err: &EngineError) {
        let err = self.policy.from_engine(err);
        self.fail(err);
    }

    fn fail(&mut self, err: PlaybackError) {
        self.snapshot.error = Some(err.clone());
        self.last_error = Some(err.clone());
        let action = self.policy.decide(&err);
        self.emit(Signal::Error { error: err });
        match action {
            RecoveryAction::Stop => {
                self.pending_seek = None;
                self.end_cycle();
            }
        }
    }

    /// Release the pipeline, invalidate its sink and apply the stopped reset
    fn end_cycle(&mut self) {
        self.generation += 1;
        self.adapter.stop();

        let from = self.snapshot.state;
        self.snapshot.reset();
        self.selection = TrackSelection::default();
        self.engine_state = EngineState::Stopped;
        self.seek_target = None;
        self.started = false;
        self.buffer_level = 100;
        self.last_position_signal = None;
        self.delivered_position = None;

        if from != PlaybackState::Stopped {
            info!(from = %from, to = %PlaybackState::Stopped, "State transition");
            self.emit(Signal::StateChanged {
                state: PlaybackState::Stopped,
            });
        }
    }

    fn transition(&mut self, to: PlaybackState) {
        let from = self.snapshot.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(from = %from, to = %to, "Rejected state transition");
            return;
        }
        info!(from = %from, to = %to, "State transition");
        self.snapshot.state = to;
        if to != PlaybackState::Buffering {
            self.snapshot.buffering_percent = 100;
        }
        self.emit(Signal::StateChanged { state: to });
    }

    fn clamp(&self, position: Duration) -> Duration {
        match self.snapshot.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn emit(&mut self, signal: Signal) {
        self.sequence += 1;
        self.outbox.push(Delivery {
            sequence: self.sequence,
            generation: self.generation,
            signal,
            snapshot: Arc::new(self.snapshot.clone()),
        });
    }
}

fn distance(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::SignalKind;
    use crate::engine::{EngineCall, ManualEngine, NotificationSink};
    use crate::error::ErrorClass;
    use crate::types::StartGate;
    use serde_json::json;

    const DURATION_NS: u64 = 464_399_092;

    fn machine_with(config: PlayerConfig) -> (Arc<ManualEngine>, StateMachine) {
        let engine = Arc::new(ManualEngine::new());
        let adapter = PipelineAdapter::new(
            engine.clone(),
            Box::new(|generation| NotificationSink::new(generation, |_, _, _| {})),
        );
        (engine, StateMachine::new(config, adapter))
    }

    fn machine() -> (Arc<ManualEngine>, StateMachine) {
        machine_with(PlayerConfig {
            position_update_interval_ms: 0,
            ..Default::default()
        })
    }

    fn kinds(outbox: &[Delivery]) -> Vec<SignalKind> {
        outbox.iter().map(|d| d.signal.kind()).collect()
    }

    fn audio_topology() -> Value {
        json!({
            "seekable": true,
            "streams": [{"type": "audio", "codec": "Vorbis", "sample_rate": 44100, "channels": 1}]
        })
    }

    fn notify(m: &mut StateMachine, kind: &str, payload: Value) {
        let generation = m.generation();
        m.on_notification(generation, kind, &payload);
    }

    fn start_playing(m: &mut StateMachine) {
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(m, "stream-topology", audio_topology());
        notify(m, "duration", json!({"duration_ns": DURATION_NS}));
        notify(m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Playing);
        m.take_outbox();
    }

    #[test]
    fn test_play_without_uri() {
        let (engine, mut m) = machine();
        assert_eq!(m.submit(Command::Play), Err(PreconditionError::NoUri));
        assert_eq!(m.state(), PlaybackState::Stopped);
        assert!(engine.calls().is_empty());
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn test_pause_while_stopped() {
        let (engine, mut m) = machine();
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        let err = m.submit(Command::Pause).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_COMMAND");
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_play_enters_buffering_before_engine() {
        let (engine, mut m) = machine();
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Play).unwrap();

        let outbox = m.take_outbox();
        assert_eq!(kinds(&outbox), vec![SignalKind::StateChanged]);
        assert_eq!(outbox[0].snapshot.state, PlaybackState::Buffering);
        assert_eq!(m.generation(), 1);

        let handle = engine.current_pipeline().unwrap();
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Create { handle, uri: "file:///tmp/a.ogg".into() },
                EngineCall::SetState { handle, state: EngineState::Playing },
            ]
        );
    }

    #[test]
    fn test_successful_start_sequence() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "stream-topology", audio_topology());
        notify(&mut m, "video-dimensions", json!({"width": 0, "height": 0}));
        notify(&mut m, "duration", json!({"duration_ns": DURATION_NS}));
        notify(&mut m, "position", json!({"position_ns": 0}));
        notify(&mut m, "state", json!({"state": "playing"}));

        let outbox = m.take_outbox();
        assert_eq!(
            kinds(&outbox),
            vec![
                SignalKind::StateChanged,
                SignalKind::MediaInfoUpdated,
                SignalKind::VideoDimensionsChanged,
                SignalKind::DurationChanged,
                SignalKind::PositionUpdated,
                SignalKind::StateChanged,
            ]
        );
        let sequences: Vec<u64> = outbox.iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(m.state(), PlaybackState::Playing);
        assert_eq!(m.selection().audio, Some(0));
        assert_eq!(m.selection().video, None);
    }

    #[test]
    fn test_gate_waits_for_media_info() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Buffering);

        notify(&mut m, "stream-topology", audio_topology());
        assert_eq!(m.state(), PlaybackState::Playing);
        let last = m.take_outbox().pop().unwrap();
        assert_eq!(last.signal, Signal::StateChanged { state: PlaybackState::Playing });
    }

    #[test]
    fn test_gate_can_ignore_media_info() {
        let (_, mut m) = machine_with(PlayerConfig {
            start_gate: StartGate {
                require_media_info: false,
                min_buffering_percent: 100,
            },
            ..Default::default()
        });
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_buffering_ramp_opens_gate() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("http://example.com/live".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "stream-topology", audio_topology());
        notify(&mut m, "buffering", json!({"percent": 0}));
        notify(&mut m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Buffering);
        assert_eq!(m.snapshot().buffering_percent, 0);

        notify(&mut m, "buffering", json!({"percent": 60}));
        assert_eq!(m.state(), PlaybackState::Buffering);
        notify(&mut m, "buffering", json!({"percent": 100}));
        assert_eq!(m.state(), PlaybackState::Playing);
        assert_eq!(m.snapshot().buffering_percent, 100);
    }

    #[test]
    fn test_rebuffering_while_playing() {
        let (_, mut m) = machine();
        start_playing(&mut m);

        notify(&mut m, "buffering", json!({"percent": 40}));
        let outbox = m.take_outbox();
        assert_eq!(kinds(&outbox), vec![SignalKind::Buffering, SignalKind::StateChanged]);
        assert_eq!(m.state(), PlaybackState::Buffering);
        assert_eq!(outbox[0].snapshot.buffering_percent, 40);

        notify(&mut m, "buffering", json!({"percent": 100}));
        assert_eq!(m.state(), PlaybackState::Playing);
        assert_eq!(m.snapshot().buffering_percent, 100);
    }

    #[test]
    fn test_pause_and_resume_are_engine_acknowledged() {
        let (engine, mut m) = machine();
        start_playing(&mut m);
        let handle = engine.current_pipeline().unwrap();
        engine.take_calls();

        m.submit(Command::Pause).unwrap();
        assert_eq!(m.state(), PlaybackState::Playing);
        notify(&mut m, "state", json!({"state": "paused"}));
        assert_eq!(m.state(), PlaybackState::Paused);

        m.submit(Command::Pause).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Playing);
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::SetState { handle, state: EngineState::Paused },
                EngineCall::SetState { handle, state: EngineState::Playing },
            ]
        );
    }

    #[test]
    fn test_resume_after_pause_during_buffering_keeps_gate() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("http://example.com/live".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "buffering", json!({"percent": 40}));
        m.submit(Command::Pause).unwrap();
        notify(&mut m, "state", json!({"state": "paused"}));
        assert_eq!(m.state(), PlaybackState::Paused);
        assert_eq!(m.snapshot().buffering_percent, 100);
        m.take_outbox();

        m.submit(Command::Play).unwrap();
        notify(&mut m, "state", json!({"state": "playing"}));
        assert_eq!(m.state(), PlaybackState::Buffering);
        assert!(m.snapshot().media_info.is_none());
        let outbox = m.take_outbox();
        assert_eq!(kinds(&outbox), vec![SignalKind::StateChanged]);
        assert_eq!(outbox[0].snapshot.buffering_percent, 40);

        notify(&mut m, "stream-topology", audio_topology());
        assert_eq!(m.state(), PlaybackState::Buffering);
        notify(&mut m, "buffering", json!({"percent": 100}));
        assert_eq!(m.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_positions_clamped_and_monotonic() {
        let (_, mut m) = machine();
        start_playing(&mut m);

        notify(&mut m, "position", json!({"position_ns": 200_000_000u64}));
        notify(&mut m, "position", json!({"position_ns": 100_000_000u64}));
        assert_eq!(m.snapshot().position, Some(Duration::from_millis(200)));

        notify(&mut m, "position", json!({"position_ns": 900_000_000u64}));
        assert_eq!(m.snapshot().position, Some(Duration::from_nanos(DURATION_NS)));
        assert_eq!(m.take_outbox().len(), 2);
    }

    #[test]
    fn test_seek_allows_backward_position() {
        let (engine, mut m) = machine();
        start_playing(&mut m);
        notify(&mut m, "position", json!({"position_ns": 300_000_000u64}));
        m.submit(Command::Seek(Duration::from_millis(50))).unwrap();
        notify(&mut m, "position", json!({"position_ns": 50_000_000u64}));
        assert_eq!(m.snapshot().position, Some(Duration::from_millis(50)));
        assert!(engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Seek { position, .. } if *position == Duration::from_millis(50))));
    }

    fn positions(outbox: &[Delivery]) -> Vec<Duration> {
        outbox
            .iter()
            .filter_map(|d| match d.signal {
                Signal::PositionUpdated { position } => Some(position),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_backward_seek_with_racing_tick() {
        let (_, mut m) = machine();
        start_playing(&mut m);
        notify(&mut m, "position", json!({"position_ns": 300_000_000u64}));
        m.submit(Command::Seek(Duration::from_millis(50))).unwrap();

        // Tick posted before the engine handled the seek
        notify(&mut m, "position", json!({"position_ns": 320_000_000u64}));
        notify(&mut m, "position", json!({"position_ns": 50_000_000u64}));
        notify(&mut m, "position", json!({"position_ns": 70_000_000u64}));

        assert_eq!(m.snapshot().position, Some(Duration::from_millis(70)));
        assert_eq!(
            positions(&m.take_outbox()),
            vec![
                Duration::from_millis(300),
                Duration::from_millis(320),
                Duration::from_millis(50),
                Duration::from_millis(70),
            ]
        );

        // Seek settled, backward glitches are dropped again
        notify(&mut m, "position", json!({"position_ns": 60_000_000u64}));
        assert_eq!(m.snapshot().position, Some(Duration::from_millis(70)));
    }

    #[test]
    fn test_seek_result_bypasses_throttle() {
        let (_, mut m) = machine_with(PlayerConfig {
            position_update_interval_ms: 60_000,
            ..Default::default()
        });
        start_playing(&mut m);
        notify(&mut m, "position", json!({"position_ns": 1_000_000u64}));
        m.submit(Command::Seek(Duration::from_millis(200))).unwrap();
        notify(&mut m, "position", json!({"position_ns": 200_000_000u64}));
        notify(&mut m, "position", json!({"position_ns": 210_000_000u64}));

        assert_eq!(
            positions(&m.take_outbox()),
            vec![Duration::from_millis(1), Duration::from_millis(200)]
        );
        assert_eq!(m.snapshot().position, Some(Duration::from_millis(210)));
    }

    #[test]
    fn test_position_throttle() {
        let (_, mut m) = machine_with(PlayerConfig {
            position_update_interval_ms: 60_000,
            ..Default::default()
        });
        start_playing(&mut m);
        for ms in 1..=5u64 {
            notify(&mut m, "position", json!({"position_ns": ms * 1_000_000}));
        }
        let outbox = m.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(m.snapshot().position, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_end_of_stream_then_stop() {
        let (engine, mut m) = machine();
        start_playing(&mut m);
        notify(&mut m, "position", json!({"position_ns": 400_000_000u64}));
        m.take_outbox();
        let generation = m.generation();

        notify(&mut m, "eos", Value::Null);
        let outbox = m.take_outbox();
        assert_eq!(
            kinds(&outbox),
            vec![SignalKind::PositionUpdated, SignalKind::EndOfStream, SignalKind::StateChanged]
        );
        assert_eq!(
            outbox[1].snapshot.position,
            Some(Duration::from_nanos(DURATION_NS))
        );
        assert!(outbox[1].snapshot.end_of_stream);
        assert!(m.snapshot().is_reset());
        assert!(m.generation() > generation);
        assert!(matches!(engine.calls().last(), Some(EngineCall::Release { .. })));
    }

    #[test]
    fn test_end_of_stream_without_auto_stop() {
        let (engine, mut m) = machine_with(PlayerConfig {
            stop_on_eos: false,
            position_update_interval_ms: 0,
            ..Default::default()
        });
        start_playing(&mut m);
        notify(&mut m, "eos", Value::Null);
        assert_eq!(m.state(), PlaybackState::Playing);
        assert!(m.snapshot().end_of_stream);

        m.submit(Command::Play).unwrap();
        assert!(!m.snapshot().end_of_stream);
        assert!(matches!(
            engine.calls().last(),
            Some(EngineCall::Seek { position, .. }) if *position == Duration::ZERO
        ));
    }

    #[test]
    fn test_error_lands_in_stopped() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("foo://bar".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(
            &mut m,
            "error",
            json!({"code": "resource-not-found", "message": "No URI handler"}),
        );

        let outbox = m.take_outbox();
        assert_eq!(
            kinds(&outbox),
            vec![SignalKind::StateChanged, SignalKind::Error, SignalKind::StateChanged]
        );
        assert!(outbox[1].snapshot.has_error());
        assert!(outbox[2].snapshot.is_reset());
        assert_eq!(m.last_error().map(|e| e.class), Some(ErrorClass::ResourceNotFound));
    }

    #[test]
    fn test_synchronous_engine_failure() {
        let (engine, mut m) = machine();
        engine.fail_next_create(EngineError::UnsupportedUri("foo://bar".into()));
        m.submit(Command::SetUri("foo://bar".into())).unwrap();
        assert!(m.submit(Command::Play).is_ok());
        assert_eq!(
            kinds(&m.take_outbox()),
            vec![SignalKind::StateChanged, SignalKind::Error, SignalKind::StateChanged]
        );
        assert_eq!(m.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_last_error_cleared_on_successful_start() {
        let (_, mut m) = machine();
        m.submit(Command::SetUri("foo://bar".into())).unwrap();
        m.submit(Command::Play).unwrap();
        notify(&mut m, "error", json!({"code": "format", "message": "bad"}));
        assert!(m.last_error().is_some());
        start_playing(&mut m);
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_stale_generation_dropped() {
        let (_, mut m) = machine();
        start_playing(&mut m);
        let old = m.generation();
        m.stop();
        m.submit(Command::Play).unwrap();
        m.take_outbox();

        m.on_notification(old, "eos", &Value::Null);
        m.on_notification(old, "position", &json!({"position_ns": 5}));
        assert!(m.take_outbox().is_empty());
        assert_eq!(m.state(), PlaybackState::Buffering);
    }

    #[test]
    fn test_protocol_errors_ignored() {
        let (_, mut m) = machine();
        start_playing(&mut m);
        notify(&mut m, "volume", json!({"level": 3}));
        notify(&mut m, "buffering", json!({"percent": 250}));
        notify(
            &mut m,
            "stream-topology",
            json!({"streams": [{"type": "audio", "index": u32::MAX}]}),
        );
        assert!(m.take_outbox().is_empty());
        assert_eq!(m.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_, mut m) = machine();
        start_playing(&mut m);
        m.stop();
        assert_eq!(kinds(&m.take_outbox()), vec![SignalKind::StateChanged]);
        m.stop();
        m.stop();
        assert!(m.take_outbox().is_empty());
        assert!(m.snapshot().is_reset());
        assert_eq!(m.selection(), TrackSelection::default());
    }

    #[test]
    fn test_seek_while_stopped_is_deferred() {
        let (engine, mut m) = machine();
        assert_eq!(
            m.submit(Command::Seek(Duration::from_secs(1))),
            Err(PreconditionError::NoUri)
        );
        m.submit(Command::SetUri("file:///tmp/a.ogg".into())).unwrap();
        m.submit(Command::Seek(Duration::from_millis(100))).unwrap();
        assert!(engine.calls().is_empty());

        m.submit(Command::Play).unwrap();
        assert!(matches!(
            engine.calls().last(),
            Some(EngineCall::Seek { position, .. }) if *position == Duration::from_millis(100)
        ));
    }

    #[test]
    fn test_set_uri_while_playing_stops() {
        let (_, mut m) = machine();
        start_playing(&mut m);
        m.submit(Command::SetUri("file:///tmp/b.ogg".into())).unwrap();
        assert_eq!(m.state(), PlaybackState::Stopped);
        assert_eq!(m.uri(), Some("file:///tmp/b.ogg"));
        assert_eq!(kinds(&m.take_outbox()), vec![SignalKind::StateChanged]);
    }

    #[test]
    fn test_select_stream() {
        let (engine, mut m) = machine();
        assert_eq!(
            m.submit(Command::SelectStream { stream_type: StreamType::Audio, index: 0 }),
            Err(PreconditionError::NoMediaInfo)
        );
        start_playing(&mut m);
        assert!(matches!(
            m.submit(Command::SelectStream { stream_type: StreamType::Audio, index: 3 }),
            Err(PreconditionError::NoSuchStream { index: 3, .. })
        ));
        m.submit(Command::SelectStream { stream_type: StreamType::Audio, index: 0 })
            .unwrap();
        assert!(matches!(
            engine.calls().last(),
            Some(EngineCall::SelectStream { stream_type: StreamType::Audio, index: 0, .. })
        ));
    }
}
