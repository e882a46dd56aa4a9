//! # Signal dispatch
//!
//! Delivers state machine output to registered observers with a total order
//! per player. Two modes, fixed at construction:
//!
//! ```text
//!                     enqueue (under state lock)
//!   StateMachine ──────────────────────────────┐
//!                                              ▼
//!   caller-thread:  FIFO + delivery token ──> observers   (producing thread)
//!   main-context:   mpsc channel ──> MainContext::run ──> observers   (app task)
//! ```
//!
//! In caller-thread mode a thread that finds delivery already in progress
//! leaves its signals in the FIFO for the active deliverer, so no two
//! deliveries ever overlap and observers may issue commands re-entrantly.

use crate::error::PlaybackError;
use crate::media_info::MediaInfo;
use crate::player::{Player, PlayerInner};
use crate::types::{PlaybackState, PlayerSnapshot};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

/// Observable change produced by the state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum Signal {
    Buffering { percent: u8 },
    DurationChanged { duration: Option<Duration> },
    EndOfStream,
    Error { error: PlaybackError },
    PositionUpdated { position: Duration },
    StateChanged { state: PlaybackState },
    VideoDimensionsChanged { width: u32, height: u32 },
    MediaInfoUpdated { media_info: Arc<MediaInfo> },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Buffering { .. } => SignalKind::Buffering,
            Signal::DurationChanged { .. } => SignalKind::DurationChanged,
            Signal::EndOfStream => SignalKind::EndOfStream,
            Signal::Error { .. } => SignalKind::Error,
            Signal::PositionUpdated { .. } => SignalKind::PositionUpdated,
            Signal::StateChanged { .. } => SignalKind::StateChanged,
            Signal::VideoDimensionsChanged { .. } => SignalKind::VideoDimensionsChanged,
            Signal::MediaInfoUpdated { .. } => SignalKind::MediaInfoUpdated,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Payload-free signal discriminant used for observer filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Buffering,
    DurationChanged,
    EndOfStream,
    Error,
    PositionUpdated,
    StateChanged,
    VideoDimensionsChanged,
    MediaInfoUpdated,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Buffering => "buffering",
            SignalKind::DurationChanged => "duration-changed",
            SignalKind::EndOfStream => "end-of-stream",
            SignalKind::Error => "error",
            SignalKind::PositionUpdated => "position-updated",
            SignalKind::StateChanged => "state-changed",
            SignalKind::VideoDimensionsChanged => "video-dimensions-changed",
            SignalKind::MediaInfoUpdated => "media-info-updated",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One signal as handed to observers
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    /// Per-player sequence number, strictly increasing
    pub sequence: u64,
    /// Playback cycle that produced the signal
    pub generation: u64,
    #[serde(flatten)]
    pub signal: Signal,
    /// Player state right after the change
    pub snapshot: Arc<PlayerSnapshot>,
}

/// Handle returned by `connect_*`, used to disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

pub(crate) type Callback = dyn Fn(&Player, &Delivery) + Send + Sync;

struct Observer {
    id: ObserverId,
    kind: Option<SignalKind>,
    callback: Box<Callback>,
}

impl Observer {
    fn accepts(&self, kind: SignalKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

#[derive(Default)]
struct Pending {
    queue: VecDeque<Delivery>,
    draining: bool,
}

enum Mode {
    CallerThread(Mutex<Pending>),
    MainContext(mpsc::UnboundedSender<Delivery>),
}

/// Resets the delivery token if an observer panics mid-drain
struct DrainGuard<'a> {
    pending: &'a Mutex<Pending>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.pending).draining = false;
        }
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer registry plus the per-player delivery queue
pub(crate) struct Dispatcher {
    observers: RwLock<Vec<Arc<Observer>>>,
    next_id: AtomicU64,
    mode: Mode,
}

impl Dispatcher {
    pub(crate) fn caller_thread() -> Self {
        Self::with_mode(Mode::CallerThread(Mutex::new(Pending::default())))
    }

    pub(crate) fn main_context() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_mode(Mode::MainContext(tx)), rx)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            mode,
        }
    }

    pub(crate) fn connect(&self, kind: Option<SignalKind>, callback: Box<Callback>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Observer { id, kind, callback }));
        id
    }

    pub(crate) fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queue one delivery. Called with the state lock held.
    pub(crate) fn enqueue(&self, delivery: Delivery) {
        match &self.mode {
            Mode::CallerThread(pending) => lock(pending).queue.push_back(delivery),
            Mode::MainContext(tx) => {
                if tx.send(delivery).is_err() {
                    trace!("Main context gone, dropping signal");
                }
            }
        }
    }

    /// Deliver queued signals on this thread unless another thread already is.
    /// Called after the state lock has been released.
    pub(crate) fn flush(&self, player: &Player) {
        let Mode::CallerThread(pending) = &self.mode else {
            return;
        };
        {
            let mut p = lock(pending);
            if p.draining || p.queue.is_empty() {
                return;
            }
            p.draining = true;
        }

        let mut guard = DrainGuard {
            pending,
            armed: true,
        };
        loop {
            let next = {
                let mut p = lock(pending);
                match p.queue.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        p.draining = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            self.deliver(player, &next);
        }
    }

    /// Run every matching observer for one delivery
    pub(crate) fn deliver(&self, player: &Player, delivery: &Delivery) {
        let kind = delivery.signal.kind();
        let observers: Vec<Arc<Observer>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.accepts(kind))
            .cloned()
            .collect();
        trace!(
            sequence = delivery.sequence,
            signal = kind.name(),
            observers = observers.len(),
            "Delivering signal"
        );
        for observer in observers {
            (observer.callback)(player, delivery);
        }
    }
}

/// Application-owned loop that delivers signals in main-context mode.
///
/// Deliveries are serialized: only one of `dispatch_pending`,
/// `dispatch_next` and `run` delivers at a time.
pub struct MainContext {
    player: Weak<PlayerInner>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    quit: AtomicBool,
    wake: Notify,
}

impl MainContext {
    pub(crate) fn new(player: Weak<PlayerInner>, rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            player,
            rx: tokio::sync::Mutex::new(rx),
            quit: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn deliver(&self, delivery: &Delivery) {
        match self.player.upgrade() {
            Some(inner) => {
                let player = Player::from_inner(inner);
                player.dispatcher().deliver(&player, delivery);
            }
            None => trace!(sequence = delivery.sequence, "Player dropped, discarding signal"),
        }
    }

    /// Deliver everything queued right now without waiting.
    /// Returns the number of signals delivered; 0 if another delivery is running.
    pub fn dispatch_pending(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            return 0;
        };
        let mut delivered = 0;
        while let Ok(delivery) = rx.try_recv() {
            self.deliver(&delivery);
            delivered += 1;
        }
        delivered
    }

    /// Wait for and deliver one signal. Returns false once the player is gone.
    pub async fn dispatch_next(&self) -> bool {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(delivery) => {
                self.deliver(&delivery);
                true
            }
            None => false,
        }
    }

    /// Deliver signals until [`quit`](Self::quit) is called or the player is dropped
    pub async fn run(&self) {
        loop {
            if self.quit.swap(false, Ordering::SeqCst) {
                break;
            }
            let mut rx = self.rx.lock().await;
            tokio::select! {
                received = rx.recv() => match received {
                    Some(delivery) => self.deliver(&delivery),
                    None => break,
                },
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Make a running (or the next) [`run`](Self::run) return
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

impl std::fmt::Debug for MainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainContext")
            .field("quit", &self.quit.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::EndOfStream.name(), "end-of-stream");
        assert_eq!(
            Signal::VideoDimensionsChanged { width: 0, height: 0 }.name(),
            "video-dimensions-changed"
        );
        assert_eq!(SignalKind::MediaInfoUpdated.to_string(), "media-info-updated");
    }

    #[test]
    fn test_signal_json_shape() {
        let delivery = Delivery {
            sequence: 3,
            generation: 1,
            signal: Signal::StateChanged {
                state: PlaybackState::Buffering,
            },
            snapshot: Arc::new(PlayerSnapshot::default()),
        };
        let json = serde_json::to_value(&delivery).unwrap();
        assert_eq!(json["signal"], "state-changed");
        assert_eq!(json["state"], "buffering");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["snapshot"]["buffering_percent"], 100);
    }

    #[test]
    fn test_connect_and_disconnect() {
        let dispatcher = Dispatcher::caller_thread();
        let a = dispatcher.connect(None, Box::new(|_, _| {}));
        let b = dispatcher.connect(Some(SignalKind::Error), Box::new(|_, _| {}));
        assert_ne!(a, b);
        assert_eq!(dispatcher.observer_count(), 2);
        assert!(dispatcher.disconnect(a));
        assert!(!dispatcher.disconnect(a));
        assert_eq!(dispatcher.observer_count(), 1);
    }

    #[test]
    fn test_observer_filter() {
        let observer = Observer {
            id: ObserverId(1),
            kind: Some(SignalKind::Error),
            callback: Box::new(|_, _| {}),
        };
        assert!(observer.accepts(SignalKind::Error));
        assert!(!observer.accepts(SignalKind::StateChanged));
    }
}
