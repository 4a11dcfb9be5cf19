use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use trackdeck::audio::SimulatedBackend;
use trackdeck::media::Item;
use trackdeck::player::{MediaPlayer, PlaybackState, PlayerEvent, RepeatMode, Step, SwapOutcome};
use trackdeck::utils::{format_duration, load_config, Config};

/// trackdeck - plays a queue on two renderers, crossfading between items
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Items to queue: URLs or local paths
    #[arg(value_name = "LOCATOR", required = true)]
    locators: Vec<String>,

    /// Configuration file to load instead of the system and user files
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Crossfade duration in milliseconds
    #[arg(long, value_name = "MS")]
    crossfade_ms: Option<u64>,

    /// Repeat mode
    #[arg(short, long, value_enum, default_value_t = RepeatArg::Off)]
    repeat: RepeatArg,

    /// Set initial volume (0-100)
    #[arg(short, long, value_name = "VOLUME")]
    volume: Option<u8>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RepeatArg {
    Off,
    Track,
    Queue,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::Off => RepeatMode::Off,
            RepeatArg::Track => RepeatMode::Track,
            RepeatArg::Queue => RepeatMode::Queue,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => load_config()?,
    };
    if let Some(ms) = args.crossfade_ms {
        config.player.crossfade_duration_ms = ms;
    }
    if let Some(volume) = args.volume {
        config.player.default_volume = f32::from(volume.min(100)) / 100.0;
    }
    config.validate()?;

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting trackdeck v{}", env!("CARGO_PKG_VERSION"));

    let items = args
        .locators
        .iter()
        .map(|locator| item_for(locator))
        .collect::<Result<Vec<_>>>()?;

    let backend = SimulatedBackend::new();
    let player = MediaPlayer::builder()
        .with_config(&config)
        .with_renderer_factory(Arc::new(backend.clone()))
        .build()?;
    let clocks: Vec<_> = backend
        .controls()
        .iter()
        .map(|control| control.spawn_clock(Duration::from_millis(100)))
        .collect();

    let events = player.subscribe_fn(log_event);

    player.add(items, None).await?;
    player.set_repeat_mode(args.repeat.into());
    if config.general.auto_play {
        player.play();
    }

    let crossfade = Duration::from_millis(config.player.crossfade_duration_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        let snapshot = player.snapshot();
        match snapshot.state {
            PlaybackState::Ended => {
                info!("Queue finished");
                break;
            }
            PlaybackState::Error => {
                error!("Playback failed, giving up");
                break;
            }
            PlaybackState::Playing => {}
            _ => continue,
        }

        let Some(duration) = snapshot.duration else { continue };
        if snapshot.position + crossfade < duration || player.queue().peek_next() == Step::QueueEnded {
            continue;
        }

        match player.crossfade_next().await {
            Ok(SwapOutcome::Swapped { index, .. }) => debug!("Crossfaded into item {}", index),
            Ok(SwapOutcome::Aborted(e)) => {
                warn!("Crossfade aborted: {}", e);
                player.next(None).await?;
            }
            Ok(outcome) => debug!("Crossfade ended early: {:?}", outcome),
            Err(e) => warn!("Crossfade rejected: {}", e),
        }
    }

    player.destroy().await;
    for clock in clocks {
        clock.abort();
    }
    events.close();

    Ok(())
}

/// Build a queue item from a URL or a local path
fn item_for(locator: &str) -> Result<Item> {
    let path = Path::new(locator);
    let (uri, title) = if path.exists() {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("Cannot resolve {}", locator))?;
        let title = absolute
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| locator.to_string());
        (format!("file://{}", absolute.display()), title)
    } else if locator.contains("://") {
        (locator.to_string(), locator.rsplit('/').next().unwrap_or(locator).to_string())
    } else {
        bail!("File not found: {}", locator);
    };

    Ok(Item::builder(uri).title(title).build()?)
}

fn log_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::StateChanged { state, previous } => info!("State: {} -> {}", previous, state),
        PlayerEvent::ItemTransitioned {
            new_index,
            reason,
            old_position,
            ..
        } => info!(
            "Now playing item {:?} ({:?}, left previous at {})",
            new_index,
            reason,
            format_duration(*old_position)
        ),
        PlayerEvent::CommonMetadata { metadata } => {
            if let Some(title) = &metadata.title {
                info!("Title: {}", title);
            }
        }
        PlayerEvent::EngineSwapped { active } => debug!("Active renderer: {}", active),
        PlayerEvent::Progress { position, duration, .. } => debug!(
            "Position: {} / {}",
            format_duration(*position),
            duration.map(format_duration).unwrap_or_else(|| "--:--".to_string())
        ),
        PlayerEvent::QueueEnded { .. } => info!("End of queue reached"),
        PlayerEvent::PlaybackError { code, message } => error!("Player error [{}]: {}", code, message),
        PlayerEvent::FocusChanged { lost_permanently, paused } => {
            info!("Audio focus changed (lost permanently: {}, paused: {})", lost_permanently, paused)
        }
        PlayerEvent::InvariantViolation { message } => error!("Invariant violated: {}", message),
        other => debug!("Event: {:?}", other),
    }
}
