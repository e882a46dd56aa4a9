//! Player - public facade over the playback core
//!
//! Ties the state machine, pipeline adapter and dispatcher together behind a
//! single lock. Commands and engine notifications both go through
//! [`Player::with_machine`]: mutate, queue the resulting signals, release the
//! lock, then deliver.

use crate::adapter::{PipelineAdapter, SinkFactory};
use crate::dispatcher::{Delivery, Dispatcher, MainContext, ObserverId, Signal, SignalKind};
use crate::engine::{Engine, NotificationSink};
use crate::error::PlaybackError;
use crate::media_info::{
    AudioStreamInfo, MediaInfo, StreamType, SubtitleStreamInfo, VideoStreamInfo,
};
use crate::state_machine::{StateMachine, TrackSelection};
use crate::types::{Command, PlaybackState, PlayerConfig, PlayerId, PlayerSnapshot};
use crate::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument};

pub(crate) struct PlayerInner {
    id: PlayerId,
    machine: Mutex<StateMachine>,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<PlaybackState>,
    main_context: Option<Arc<MainContext>>,
}

/// Playback controller for one media resource at a time.
///
/// Cheap to clone; clones share the same player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    /// Create a stopped player driving `engine`
    pub fn new(engine: Arc<dyn Engine>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        let id = PlayerId::new();
        let main_context_mode = config.dispatch_to_main_context;
        let (state_tx, _) = watch::channel(PlaybackState::Stopped);

        let inner = Arc::new_cyclic(|weak: &Weak<PlayerInner>| {
            let owner = weak.clone();
            let sinks: SinkFactory = Box::new(move |generation| {
                let owner = owner.clone();
                NotificationSink::new(generation, move |generation, kind, payload| {
                    if let Some(inner) = owner.upgrade() {
                        Player::from_inner(inner).handle_notification(generation, kind, payload);
                    }
                })
            });

            let (dispatcher, main_context) = if main_context_mode {
                let (dispatcher, rx) = Dispatcher::main_context();
                let context = Arc::new(MainContext::new(weak.clone(), rx));
                (dispatcher, Some(context))
            } else {
                (Dispatcher::caller_thread(), None)
            };

            PlayerInner {
                id,
                machine: Mutex::new(StateMachine::new(config, PipelineAdapter::new(engine, sinks))),
                dispatcher,
                state_tx,
                main_context,
            }
        });

        info!(player_id = %id, main_context = main_context_mode, "Player created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<PlayerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Get player ID
    pub fn id(&self) -> PlayerId {
        self.inner.id
    }

    pub fn config(&self) -> PlayerConfig {
        self.read(|m| m.config().clone())
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        self.inner.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<R>(&self, f: impl FnOnce(&StateMachine) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` under the state lock, queue its signals, then deliver them
    fn with_machine<R>(&self, f: impl FnOnce(&mut StateMachine) -> R) -> R {
        let result = {
            let mut machine = self.lock();
            let result = f(&mut machine);
            for delivery in machine.take_outbox() {
                self.inner.dispatcher.enqueue(delivery);
            }
            let state = machine.state();
            self.inner.state_tx.send_if_modified(|current| {
                let changed = *current != state;
                *current = state;
                changed
            });
            result
        };
        self.inner.dispatcher.flush(self);
        result
    }

    fn handle_notification(&self, generation: u64, kind: &str, payload: Value) {
        self.with_machine(|m| m.on_notification(generation, kind, &payload));
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[instrument(skip(self), fields(player_id = %self.inner.id))]
    pub fn submit_command(&self, command: Command) -> Result<()> {
        self.with_machine(|m| m.submit(command))?;
        Ok(())
    }

    /// Set the resource for the next cycle; stops a running one
    pub fn set_uri(&self, uri: &str) -> Result<()> {
        self.submit_command(Command::SetUri(uri.to_string()))
    }

    pub fn uri(&self) -> Option<String> {
        self.read(|m| m.uri().map(str::to_string))
    }

    pub fn play(&self) -> Result<()> {
        self.submit_command(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.submit_command(Command::Pause)
    }

    /// Stop playback and reset the snapshot. Safe from any state.
    #[instrument(skip(self), fields(player_id = %self.inner.id))]
    pub fn stop(&self) {
        self.with_machine(|m| m.stop());
    }

    pub fn seek(&self, position: Duration) -> Result<()> {
        self.submit_command(Command::Seek(position))
    }

    pub fn set_audio_track(&self, index: u32) -> Result<()> {
        self.submit_command(Command::SelectStream {
            stream_type: StreamType::Audio,
            index,
        })
    }

    pub fn set_video_track(&self, index: u32) -> Result<()> {
        self.submit_command(Command::SelectStream {
            stream_type: StreamType::Video,
            index,
        })
    }

    pub fn set_subtitle_track(&self, index: u32) -> Result<()> {
        self.submit_command(Command::SelectStream {
            stream_type: StreamType::Subtitle,
            index,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn snapshot(&self) -> Arc<PlayerSnapshot> {
        self.read(|m| Arc::new(m.snapshot().clone()))
    }

    pub fn state(&self) -> PlaybackState {
        self.read(|m| m.state())
    }

    pub fn position(&self) -> Option<Duration> {
        self.read(|m| m.snapshot().position)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.read(|m| m.snapshot().duration)
    }

    /// Width and height of the video, 0x0 without video
    pub fn video_dimensions(&self) -> (u32, u32) {
        self.read(|m| (m.snapshot().video_width, m.snapshot().video_height))
    }

    pub fn media_info(&self) -> Option<Arc<MediaInfo>> {
        self.read(|m| m.snapshot().media_info.clone())
    }

    /// Most recent playback error; kept until the next successful start
    pub fn last_error(&self) -> Option<PlaybackError> {
        self.read(|m| m.last_error().cloned())
    }

    pub fn track_selection(&self) -> TrackSelection {
        self.read(|m| m.selection())
    }

    pub fn current_audio_track(&self) -> Option<AudioStreamInfo> {
        self.read(|m| {
            let index = m.selection().audio?;
            let info = m.snapshot().media_info.as_ref()?;
            info.stream(StreamType::Audio, index)?.as_audio().cloned()
        })
    }

    pub fn current_video_track(&self) -> Option<VideoStreamInfo> {
        self.read(|m| {
            let index = m.selection().video?;
            let info = m.snapshot().media_info.as_ref()?;
            info.stream(StreamType::Video, index)?.as_video().cloned()
        })
    }

    pub fn current_subtitle_track(&self) -> Option<SubtitleStreamInfo> {
        self.read(|m| {
            let index = m.selection().subtitle?;
            let info = m.snapshot().media_info.as_ref()?;
            info.stream(StreamType::Subtitle, index)?.as_subtitle().cloned()
        })
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state_tx.subscribe()
    }

    /// Delivery loop, present when `dispatch_to_main_context` is set
    pub fn main_context(&self) -> Option<Arc<MainContext>> {
        self.inner.main_context.clone()
    }

    // ========================================================================
    // Observers
    // ========================================================================

    fn connect<F>(&self, kind: SignalKind, f: F) -> ObserverId
    where
        F: Fn(&Player, &Delivery) + Send + Sync + 'static,
    {
        self.inner.dispatcher.connect(Some(kind), Box::new(f))
    }

    /// Observe every signal, with sequence number and snapshot
    pub fn connect_all<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, &Delivery) + Send + Sync + 'static,
    {
        self.inner.dispatcher.connect(None, Box::new(f))
    }

    pub fn connect_state_changed<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, PlaybackState) + Send + Sync + 'static,
    {
        self.connect(SignalKind::StateChanged, move |player, delivery| {
            if let Signal::StateChanged { state } = &delivery.signal {
                f(player, *state);
            }
        })
    }

    pub fn connect_buffering<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, u8) + Send + Sync + 'static,
    {
        self.connect(SignalKind::Buffering, move |player, delivery| {
            if let Signal::Buffering { percent } = &delivery.signal {
                f(player, *percent);
            }
        })
    }

    pub fn connect_duration_changed<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, Option<Duration>) + Send + Sync + 'static,
    {
        self.connect(SignalKind::DurationChanged, move |player, delivery| {
            if let Signal::DurationChanged { duration } = &delivery.signal {
                f(player, *duration);
            }
        })
    }

    pub fn connect_position_updated<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, Duration) + Send + Sync + 'static,
    {
        self.connect(SignalKind::PositionUpdated, move |player, delivery| {
            if let Signal::PositionUpdated { position } = &delivery.signal {
                f(player, *position);
            }
        })
    }

    pub fn connect_end_of_stream<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player) + Send + Sync + 'static,
    {
        self.connect(SignalKind::EndOfStream, move |player, _| f(player))
    }

    pub fn connect_error<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, &PlaybackError) + Send + Sync + 'static,
    {
        self.connect(SignalKind::Error, move |player, delivery| {
            if let Signal::Error { error } = &delivery.signal {
                f(player, error);
            }
        })
    }

    pub fn connect_video_dimensions_changed<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, u32, u32) + Send + Sync + 'static,
    {
        self.connect(SignalKind::VideoDimensionsChanged, move |player, delivery| {
            if let Signal::VideoDimensionsChanged { width, height } = &delivery.signal {
                f(player, *width, *height);
            }
        })
    }

    pub fn connect_media_info_updated<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Player, &Arc<MediaInfo>) + Send + Sync + 'static,
    {
        self.connect(SignalKind::MediaInfoUpdated, move |player, delivery| {
            if let Signal::MediaInfoUpdated { media_info } = &delivery.signal {
                f(player, media_info);
            }
        })
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.inner.dispatcher.disconnect(id)
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineCall, ManualEngine};
    use crate::types::StartGate;
    use crate::Error;
    use serde_json::json;

    fn player_with(config: PlayerConfig) -> (Arc<ManualEngine>, Player) {
        let engine = Arc::new(ManualEngine::new());
        let player = Player::new(engine.clone(), config).unwrap();
        (engine, player)
    }

    fn record(player: &Player) -> Arc<Mutex<Vec<String>>> {
        let names = Arc::new(Mutex::new(Vec::new()));
        let names_clone = names.clone();
        player.connect_all(move |_, delivery| {
            names_clone.lock().unwrap().push(delivery.signal.name().to_string());
        });
        names
    }

    fn topology() -> Value {
        json!({"seekable": true, "streams": [{"type": "audio", "codec": "Vorbis"}]})
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PlayerConfig {
            start_gate: StartGate {
                require_media_info: true,
                min_buffering_percent: 101,
            },
            ..Default::default()
        };
        let err = Player::new(Arc::new(ManualEngine::new()), config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_initial_state() {
        let (_, player) = player_with(PlayerConfig::default());
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(player.snapshot().is_reset());
        assert!(player.uri().is_none());
        assert!(player.main_context().is_none());
        assert_eq!(player.video_dimensions(), (0, 0));
    }

    #[test]
    fn test_precondition_surfaces_as_error() {
        let (_, player) = player_with(PlayerConfig::default());
        let err = player.play().unwrap_err();
        assert_eq!(err.error_code(), "NO_URI");
        assert!(err.is_recoverable());
        assert!(player.set_uri("").is_err());
    }

    #[test]
    fn test_caller_thread_delivery() {
        let (engine, player) = player_with(PlayerConfig::default());
        let names = record(&player);

        player.set_uri("file:///tmp/a.ogg").unwrap();
        player.play().unwrap();
        engine.notify("stream-topology", topology());
        engine.notify("state", json!({"state": "playing"}));

        assert_eq!(
            *names.lock().unwrap(),
            vec!["state-changed", "media-info-updated", "state-changed"]
        );
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.current_audio_track().and_then(|a| a.common.codec), Some("Vorbis".into()));
        assert!(player.current_video_track().is_none());
    }

    #[test]
    fn test_typed_observers_and_disconnect() {
        let (engine, player) = player_with(PlayerConfig::default());
        let states = Arc::new(Mutex::new(Vec::new()));
        let states_clone = states.clone();
        let id = player.connect_state_changed(move |_, state| {
            states_clone.lock().unwrap().push(state);
        });

        player.set_uri("file:///tmp/a.ogg").unwrap();
        player.play().unwrap();
        assert!(player.disconnect(id));
        engine.notify("stream-topology", topology());
        engine.notify("state", json!({"state": "playing"}));

        assert_eq!(*states.lock().unwrap(), vec![PlaybackState::Buffering]);
    }

    #[test]
    fn test_command_from_callback() {
        let (engine, player) = player_with(PlayerConfig::default());
        let names = record(&player);
        player.connect_error(|player, _| {
            player.set_uri("file:///tmp/good.ogg").unwrap();
            player.play().unwrap();
        });

        player.set_uri("foo://bar").unwrap();
        player.play().unwrap();
        engine.notify("error", json!({"code": "resource-not-found", "message": "No handler"}));

        assert_eq!(
            *names.lock().unwrap(),
            vec!["state-changed", "error", "state-changed", "state-changed"]
        );
        assert_eq!(player.state(), PlaybackState::Buffering);
        assert_eq!(player.uri().as_deref(), Some("file:///tmp/good.ogg"));
        assert_eq!(engine.pipeline_count(), 2);
    }

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stop_runs_in_player_span() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || Capture(writer.clone()))
            .finish();

        let (_, player) = player_with(PlayerConfig::default());
        tracing::subscriber::with_default(subscriber, || {
            player.set_uri("file:///tmp/a.ogg").unwrap();
            player.play().unwrap();
            player.stop();
        });

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains(&format!("stop{{player_id={}}}", player.id())));
    }

    #[test]
    fn test_subscribe_state() {
        let (engine, player) = player_with(PlayerConfig::default());
        let rx = player.subscribe_state();
        player.set_uri("file:///tmp/a.ogg").unwrap();
        player.play().unwrap();
        assert_eq!(*rx.borrow(), PlaybackState::Buffering);
        engine.notify("stream-topology", topology());
        engine.notify("state", json!({"state": "playing"}));
        assert_eq!(*rx.borrow(), PlaybackState::Playing);
        player.stop();
        assert_eq!(*rx.borrow(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_main_context_delivery() {
        let (engine, player) = player_with(PlayerConfig {
            dispatch_to_main_context: true,
            ..Default::default()
        });
        let names = record(&player);
        let context = player.main_context().unwrap();

        player.set_uri("file:///tmp/a.ogg").unwrap();
        player.play().unwrap();
        engine.notify("stream-topology", topology());
        assert!(names.lock().unwrap().is_empty());

        assert_eq!(context.dispatch_pending(), 2);
        assert_eq!(*names.lock().unwrap(), vec!["state-changed", "media-info-updated"]);

        engine.notify("state", json!({"state": "playing"}));
        assert!(context.dispatch_next().await);
        assert_eq!(names.lock().unwrap().len(), 3);
        assert_eq!(context.dispatch_pending(), 0);
    }

    #[test]
    fn test_main_context_drained_after_player_drop() {
        let (engine, player) = player_with(PlayerConfig {
            dispatch_to_main_context: true,
            ..Default::default()
        });
        let context = player.main_context().unwrap();
        player.set_uri("file:///tmp/a.ogg").unwrap();
        player.play().unwrap();
        drop(player);

        // Queued signal is discarded, then the closed channel ends the loop
        assert!(tokio_test::block_on(context.dispatch_next()));
        assert!(!tokio_test::block_on(context.dispatch_next()));
        assert!(matches!(engine.calls().last(), Some(EngineCall::Release { .. })));
    }
}
