//! Scripted engine driven by `sim://<profile>` URIs
//!
//! Each pipeline runs on its own thread and replays a fixed script: stream
//! topology, video dimensions, duration, position ticks and end of stream.
//! Profiles:
//!
//! - `audio`: one mono Vorbis stream, no video
//! - `audio-video`: a 320x240 Theora stream plus the Vorbis stream
//! - `stream`: like `audio`, with a buffering ramp before playback
//! - `broken`: fails with a format error during preroll
//!
//! Query parameters `duration_ns`, `tick_ms` and `step_ms` override the
//! timing. Any other URI scheme fails asynchronously with
//! `resource-not-found`, like a missing source element would.

use super::{kinds, Engine, EngineState, NotificationSink, PipelineHandle};
use crate::error::EngineError;
use crate::media_info::StreamType;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Duration of the reference audio clip
pub const DEFAULT_DURATION: Duration = Duration::from_nanos(464_399_092);
const DEFAULT_TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Audio,
    AudioVideo,
    Stream,
    Broken,
    Unreachable,
}

impl Profile {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "audio" => Some(Profile::Audio),
            "audio-video" => Some(Profile::AudioVideo),
            "stream" => Some(Profile::Stream),
            "broken" => Some(Profile::Broken),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Script {
    uri: String,
    profile: Profile,
    duration: Duration,
    tick: Duration,
    step: Duration,
}

impl Script {
    fn parse(uri: &str) -> Result<Self, EngineError> {
        let url = Url::parse(uri).map_err(|_| EngineError::UnsupportedUri(uri.to_string()))?;
        let mut script = Script {
            uri: uri.to_string(),
            profile: Profile::Unreachable,
            duration: DEFAULT_DURATION,
            tick: DEFAULT_TICK,
            step: DEFAULT_TICK,
        };
        if url.scheme() != "sim" {
            return Ok(script);
        }

        script.profile = url
            .host_str()
            .and_then(Profile::from_name)
            .ok_or_else(|| EngineError::UnsupportedUri(uri.to_string()))?;

        let mut step = None;
        for (key, value) in url.query_pairs() {
            let value: u64 = value
                .parse()
                .map_err(|_| EngineError::UnsupportedUri(uri.to_string()))?;
            match key.as_ref() {
                "duration_ns" => script.duration = Duration::from_nanos(value),
                "tick_ms" => script.tick = Duration::from_millis(value.max(1)),
                "step_ms" => step = Some(Duration::from_millis(value)),
                _ => {}
            }
        }
        script.step = step.unwrap_or(script.tick);
        Ok(script)
    }

    fn topology(&self) -> Value {
        let audio = json!({
            "type": "audio",
            "index": 0,
            "codec": "Vorbis",
            "caps": "audio/x-vorbis, rate=(int)44100, channels=(int)1",
            "tags": {"audio-codec": "Vorbis", "language-code": "en"},
            "sample_rate": 44100,
            "channels": 1,
            "bitrate": 80000,
            "max_bitrate": 80000
        });
        let streams = match self.profile {
            Profile::AudioVideo => vec![
                json!({
                    "type": "video",
                    "index": 0,
                    "codec": "Theora",
                    "caps": "video/x-theora, width=(int)320, height=(int)240",
                    "tags": {"video-codec": "Theora"},
                    "width": 320,
                    "height": 240,
                    "framerate": [30, 1],
                    "pixel_aspect_ratio": [1, 1]
                }),
                audio,
            ],
            _ => vec![audio],
        };
        json!({
            "uri": self.uri,
            "seekable": self.profile != Profile::Stream,
            "is_live": false,
            "container_format": "Ogg",
            "streams": streams
        })
    }

    fn dimensions(&self) -> (u32, u32) {
        match self.profile {
            Profile::AudioVideo => (320, 240),
            _ => (0, 0),
        }
    }
}

enum SimCommand {
    SetState(EngineState),
    Seek(Duration),
    SelectStream(StreamType, u32),
    Release,
}

/// Thread-per-pipeline engine replaying canned media
#[derive(Default)]
pub struct SimulatedEngine {
    next_handle: AtomicU64,
    pipelines: Mutex<HashMap<PipelineHandle, Sender<SimCommand>>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PipelineHandle, Sender<SimCommand>>> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, handle: PipelineHandle, cmd: SimCommand) -> Result<(), EngineError> {
        let pipelines = self.lock();
        let tx = pipelines.get(&handle).ok_or(EngineError::UnknownPipeline)?;
        tx.send(cmd).map_err(|_| EngineError::UnknownPipeline)
    }

    /// Number of live pipeline threads
    pub fn pipeline_count(&self) -> usize {
        self.lock().len()
    }
}

impl Engine for SimulatedEngine {
    fn create_pipeline(
        &self,
        uri: &str,
        sink: NotificationSink,
    ) -> Result<PipelineHandle, EngineError> {
        let script = Script::parse(uri)?;
        let handle = PipelineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = unbounded();

        thread::Builder::new()
            .name(format!("sim-{handle}"))
            .spawn(move || run_pipeline(handle, script, sink, rx))
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        self.lock().insert(handle, tx);
        Ok(handle)
    }

    fn set_state(&self, handle: PipelineHandle, state: EngineState) -> Result<(), EngineError> {
        self.send(handle, SimCommand::SetState(state))
    }

    fn seek(&self, handle: PipelineHandle, position: Duration) -> Result<(), EngineError> {
        self.send(handle, SimCommand::Seek(position))
    }

    fn select_stream(
        &self,
        handle: PipelineHandle,
        stream_type: StreamType,
        index: u32,
    ) -> Result<(), EngineError> {
        self.send(handle, SimCommand::SelectStream(stream_type, index))
    }

    fn release(&self, handle: PipelineHandle) {
        if let Some(tx) = self.lock().remove(&handle) {
            let _ = tx.send(SimCommand::Release);
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Post the discovery script. Returns false if the pipeline failed.
fn preroll(script: &Script, sink: &NotificationSink) -> bool {
    match script.profile {
        Profile::Unreachable => {
            sink.post(
                kinds::ERROR,
                json!({
                    "code": "resource-not-found",
                    "message": format!("No URI handler implemented for \"{}\"", script.uri),
                }),
            );
            return false;
        }
        Profile::Broken => {
            sink.post(
                kinds::ERROR,
                json!({
                    "code": "format",
                    "message": "Could not demultiplex stream",
                    "detail": "simulated demuxer rejected the container",
                }),
            );
            return false;
        }
        _ => {}
    }

    sink.post(kinds::STREAM_TOPOLOGY, script.topology());
    let (width, height) = script.dimensions();
    sink.post(kinds::VIDEO_DIMENSIONS, json!({"width": width, "height": height}));
    sink.post(kinds::DURATION, json!({"duration_ns": nanos(script.duration)}));
    sink.post(kinds::POSITION, json!({"position_ns": 0}));

    if script.profile == Profile::Stream {
        for percent in [0, 25, 50, 75, 100] {
            sink.post(kinds::BUFFERING, json!({"percent": percent}));
            thread::sleep(script.tick);
        }
    }
    true
}

fn run_pipeline(
    handle: PipelineHandle,
    script: Script,
    sink: NotificationSink,
    rx: Receiver<SimCommand>,
) {
    debug!(%handle, uri = %script.uri, "Simulated pipeline started");
    let mut state = EngineState::Stopped;
    let mut prerolled = false;
    let mut failed = false;
    let mut finished = false;
    let mut position = Duration::ZERO;

    loop {
        let ticking = state == EngineState::Playing && !finished && !failed;
        let received = if ticking {
            rx.recv_timeout(script.tick)
        } else {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match received {
            Ok(SimCommand::SetState(target)) => {
                if failed {
                    continue;
                }
                match target {
                    EngineState::Playing | EngineState::Paused => {
                        if !prerolled {
                            prerolled = true;
                            if !preroll(&script, &sink) {
                                failed = true;
                                continue;
                            }
                        }
                        state = target;
                        sink.post(kinds::STATE, json!({"state": target}));
                    }
                    EngineState::Stopped => state = EngineState::Stopped,
                    EngineState::Buffering => {}
                }
            }
            Ok(SimCommand::Seek(target)) => {
                position = target.min(script.duration);
                finished = false;
                sink.post(kinds::POSITION, json!({"position_ns": nanos(position)}));
            }
            Ok(SimCommand::SelectStream(stream_type, index)) => {
                debug!(%handle, %stream_type, index, "Simulated stream switch");
            }
            Ok(SimCommand::Release) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                position = (position + script.step).min(script.duration);
                sink.post(kinds::POSITION, json!({"position_ns": nanos(position)}));
                if position >= script.duration {
                    finished = true;
                    sink.post(kinds::END_OF_STREAM, Value::Null);
                }
            }
        }
    }
    trace!(%handle, "Simulated pipeline finished");
}
