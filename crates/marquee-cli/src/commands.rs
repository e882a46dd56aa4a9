//! CLI command implementations

use anyhow::{anyhow, Context};
use marquee_core::{
    MainContext, MediaInfo, PlaybackError, PlaybackState, Player, PlayerConfig, Signal,
    SimulatedEngine,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::output::{render_media_info, OutputFormat, SignalRecord};

/// Load a player configuration, falling back to defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PlayerConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<PlayerConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PlayerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Accept either a URI or a local path
fn resolve_uri(input: &str) -> anyhow::Result<String> {
    if input.contains("://") {
        return Ok(input.to_string());
    }
    let path = Path::new(input);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| anyhow!("cannot express {} as a file URI", absolute.display()))
}

fn create_player(config: PlayerConfig) -> anyhow::Result<Player> {
    let engine = Arc::new(SimulatedEngine::new());
    Ok(Player::new(engine, config)?)
}

/// Drive the main context on a background task when the player uses one
fn spawn_context(player: &Player) -> Option<(Arc<MainContext>, JoinHandle<()>)> {
    player.main_context().map(|context| {
        let runner = context.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        (context, handle)
    })
}

async fn shutdown_context(context: Option<(Arc<MainContext>, JoinHandle<()>)>) {
    if let Some((context, handle)) = context {
        context.quit();
        if let Err(e) = handle.await {
            warn!(error = %e, "Main context task failed");
        }
    }
}

/// Play a URI until the player returns to `Stopped`
pub async fn play(
    uri: &str,
    config: PlayerConfig,
    seek_ms: Option<u64>,
    timeout_secs: u64,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let uri = resolve_uri(uri)?;
    let player = create_player(config)?;
    let player_id = player.id();

    let (tx, mut rx) = mpsc::unbounded_channel();
    player.connect_all(move |_, delivery| {
        let _ = tx.send(SignalRecord::new(player_id, delivery));
    });
    let context = spawn_context(&player);

    info!(%uri, "Starting playback");
    player.set_uri(&uri)?;
    if let Some(ms) = seek_ms {
        player.seek(Duration::from_millis(ms))?;
    }
    player.play()?;

    let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut failure: Option<PlaybackError> = None;
    let mut timed_out = false;
    let mut interrupted = false;

    loop {
        tokio::select! {
            record = rx.recv() => {
                let Some(record) = record else { break };
                println!("{}", record.render(format));
                match &record.signal {
                    Signal::Error { error } => failure = Some(error.clone()),
                    Signal::StateChanged { state: PlaybackState::Stopped } => break,
                    _ => {}
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                debug!("Interrupted, stopping");
                interrupted = true;
                player.stop();
            }
            _ = &mut deadline, if !timed_out => {
                warn!(timeout_secs, "Playback timed out, stopping");
                timed_out = true;
                player.stop();
            }
        }
    }

    shutdown_context(context).await;

    if let Some(error) = failure {
        return Err(anyhow!("playback failed: {error}"));
    }
    if timed_out {
        return Err(anyhow!("playback did not finish within {timeout_secs}s"));
    }
    Ok(())
}

enum ProbeOutcome {
    Resolved(Arc<MediaInfo>),
    Failed(PlaybackError),
}

/// Resolve a URI and print its stream topology
pub async fn probe(
    uri: &str,
    config: PlayerConfig,
    timeout_secs: u64,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let uri = resolve_uri(uri)?;
    let player = create_player(config)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let info_tx = tx.clone();
    player.connect_media_info_updated(move |_, info| {
        let _ = info_tx.send(ProbeOutcome::Resolved(info.clone()));
    });
    player.connect_error(move |_, error| {
        let _ = tx.send(ProbeOutcome::Failed(error.clone()));
    });
    let context = spawn_context(&player);

    player.set_uri(&uri)?;
    player.play()?;

    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), rx.recv()).await;
    player.stop();
    shutdown_context(context).await;

    match outcome {
        Ok(Some(ProbeOutcome::Resolved(info))) => {
            print!("{}", render_media_info(&info, format));
            if format == OutputFormat::Json {
                println!();
            }
            Ok(())
        }
        Ok(Some(ProbeOutcome::Failed(error))) => Err(anyhow!("probe failed: {error}")),
        Ok(None) => Err(anyhow!("player went away before resolving {uri}")),
        Err(_) => Err(anyhow!("no media info within {timeout_secs}s")),
    }
}
