//! Serialized command surface for bridge layers
//!
//! Bridges send one JSON object per command, tagged by `command`. Indices
//! follow the bridge convention: `-1` appends where an insertion point is
//! expected, any other negative index is out of range. Positions and
//! durations are fractional seconds.

use crate::audio::FadeOutcome;
use crate::media::{Item, ItemSpec, MediaMetadata};
use crate::player::{CrossfadeTarget, MediaPlayer, PlayerSnapshot, RepeatMode, SwapOutcome};
use crate::utils::duration_from_secs_f64;
use crate::utils::error::{PlayerError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn append() -> i64 {
    -1
}

/// Commands accepted from a bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Insert items before `insert_before`, or append with `-1`
    Add {
        items: Vec<ItemSpec>,
        #[serde(default = "append")]
        insert_before: i64,
    },
    Remove {
        indices: Vec<i64>,
    },
    Move {
        from: i64,
        to: i64,
    },
    Replace {
        index: i64,
        item: ItemSpec,
    },
    Load {
        item: ItemSpec,
    },
    Clear,
    RemoveUpcoming,
    RemovePrevious,
    Play,
    Pause,
    Stop,
    TogglePlay,
    SetPlayWhenReady {
        play_when_ready: bool,
    },
    SeekTo {
        position: f64,
    },
    SeekBy {
        offset: f64,
    },
    JumpForward,
    JumpBackward,
    SetVolume {
        volume: f32,
    },
    SetRate {
        rate: f32,
    },
    SetRepeatMode {
        mode: RepeatMode,
    },
    Skip {
        index: i64,
        initial_position: Option<f64>,
    },
    Next {
        initial_position: Option<f64>,
    },
    Previous {
        initial_position: Option<f64>,
    },
    CrossfadeNext,
    CrossfadePrevious,
    CrossfadeTo {
        index: i64,
    },
    CrossfadePrepare {
        #[serde(default)]
        previous: bool,
    },
    SetAnimatedVolume {
        volume: f32,
        duration: f64,
        interval: Option<f64>,
        tag: String,
    },
    FadeOutPause {
        duration: Option<f64>,
    },
    FadeOutNext {
        duration: Option<f64>,
    },
    FadeOutPrevious {
        duration: Option<f64>,
    },
    FadeOutJump {
        index: i64,
        duration: Option<f64>,
    },
    UpdateNowPlaying {
        metadata: MediaMetadata,
    },
    Retry,
    Reset,
    GetSnapshot,
    GetQueue,
    Destroy,
}

/// Successful command results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Done,
    Index { index: usize },
    Count { count: usize },
    Crossfade {
        outcome: &'static str,
        index: Option<usize>,
        error: Option<String>,
    },
    Fade { completed: bool },
    Snapshot { snapshot: PlayerSnapshot },
    Queue { items: Vec<Item> },
}

impl From<SwapOutcome> for Reply {
    fn from(outcome: SwapOutcome) -> Self {
        let (outcome, index, error) = match outcome {
            SwapOutcome::Swapped { index, .. } => ("swapped", Some(index), None),
            SwapOutcome::QueueEnded => ("queue-ended", None, None),
            SwapOutcome::Aborted(e) => ("aborted", None, Some(e.code().to_string())),
            SwapOutcome::Interrupted => ("interrupted", None, None),
        };
        Reply::Crossfade { outcome, index, error }
    }
}

impl From<FadeOutcome> for Reply {
    fn from(outcome: FadeOutcome) -> Self {
        Reply::Fade {
            completed: outcome == FadeOutcome::Completed,
        }
    }
}

/// Queue index from the bridge; negatives are rejected
fn index(raw: i64, len: usize) -> Result<usize> {
    usize::try_from(raw).map_err(|_| PlayerError::out_of_range(raw, len))
}

/// Insertion point from the bridge; `-1` appends
fn insertion_point(raw: i64, len: usize) -> Result<Option<usize>> {
    if raw == -1 {
        Ok(None)
    } else {
        index(raw, len).map(Some)
    }
}

fn seconds(value: f64) -> Result<Duration> {
    if value.is_nan() {
        return Err(PlayerError::InvalidInput("position must be a number".to_string()));
    }
    Ok(duration_from_secs_f64(value))
}

fn optional_seconds(value: Option<f64>) -> Result<Option<Duration>> {
    value.map(seconds).transpose()
}

fn items(specs: Vec<ItemSpec>) -> Result<Vec<Item>> {
    specs.into_iter().map(Item::try_from).collect()
}

/// Run one bridge command against `player`
pub async fn execute(player: &MediaPlayer, command: Command) -> Result<Reply> {
    debug!("Executing {:?}", command);
    let len = player.queue().len();

    let reply = match command {
        Command::Add { items: specs, insert_before } => {
            let at = insertion_point(insert_before, len)?;
            let index = player.add(items(specs)?, at).await?;
            Reply::Index { index }
        }
        Command::Remove { indices } => {
            let indices = indices
                .into_iter()
                .map(|raw| index(raw, len))
                .collect::<Result<Vec<_>>>()?;
            let removed = player.remove(&indices).await?;
            Reply::Count { count: removed.len() }
        }
        Command::Move { from, to } => {
            player.move_item(index(from, len)?, index(to, len)?).await?;
            Reply::Done
        }
        Command::Replace { index: raw, item } => {
            player.replace(index(raw, len)?, Item::try_from(item)?).await?;
            Reply::Done
        }
        Command::Load { item } => {
            player.load(Item::try_from(item)?).await?;
            Reply::Done
        }
        Command::Clear => {
            player.clear().await?;
            Reply::Done
        }
        Command::RemoveUpcoming => Reply::Count {
            count: player.remove_upcoming().await,
        },
        Command::RemovePrevious => Reply::Count {
            count: player.remove_previous().await,
        },
        Command::Play => {
            player.play();
            Reply::Done
        }
        Command::Pause => {
            player.pause();
            Reply::Done
        }
        Command::Stop => {
            player.stop();
            Reply::Done
        }
        Command::TogglePlay => {
            player.toggle_play();
            Reply::Done
        }
        Command::SetPlayWhenReady { play_when_ready } => {
            player.set_play_when_ready(play_when_ready);
            Reply::Done
        }
        Command::SeekTo { position } => {
            player.seek_to(seconds(position)?)?;
            Reply::Done
        }
        Command::SeekBy { offset } => {
            if !offset.is_finite() {
                return Err(PlayerError::InvalidInput("offset must be finite".to_string()));
            }
            player.seek_by((offset * 1000.0).round() as i64)?;
            Reply::Done
        }
        Command::JumpForward => {
            player.jump_forward()?;
            Reply::Done
        }
        Command::JumpBackward => {
            player.jump_backward()?;
            Reply::Done
        }
        Command::SetVolume { volume } => {
            player.set_volume(volume)?;
            Reply::Done
        }
        Command::SetRate { rate } => {
            player.set_rate(rate)?;
            Reply::Done
        }
        Command::SetRepeatMode { mode } => {
            player.set_repeat_mode(mode);
            Reply::Done
        }
        Command::Skip { index: raw, initial_position } => {
            player.skip(index(raw, len)?, optional_seconds(initial_position)?).await?;
            Reply::Done
        }
        Command::Next { initial_position } => {
            player.next(optional_seconds(initial_position)?).await?;
            Reply::Done
        }
        Command::Previous { initial_position } => {
            player.previous(optional_seconds(initial_position)?).await?;
            Reply::Done
        }
        Command::CrossfadeNext => player.crossfade_next().await?.into(),
        Command::CrossfadePrevious => player.crossfade_previous().await?.into(),
        Command::CrossfadeTo { index: raw } => player.crossfade_to(index(raw, len)?).await?.into(),
        Command::CrossfadePrepare { previous } => {
            let target = if previous { CrossfadeTarget::Previous } else { CrossfadeTarget::Next };
            match player.crossfade_prepare(target).await? {
                Some(index) => Reply::Index { index },
                None => Reply::Done,
            }
        }
        Command::SetAnimatedVolume { volume, duration, interval, tag } => {
            let interval = match interval {
                Some(interval) => seconds(interval)?,
                None => Duration::from_millis(player.options().crossfade_interval_ms),
            };
            player.set_animated_volume(volume, seconds(duration)?, interval, tag)?;
            Reply::Done
        }
        Command::FadeOutPause { duration } => player.fade_out_pause(optional_seconds(duration)?).await?.into(),
        Command::FadeOutNext { duration } => player.fade_out_next(optional_seconds(duration)?).await?.into(),
        Command::FadeOutPrevious { duration } => {
            player.fade_out_previous(optional_seconds(duration)?).await?.into()
        }
        Command::FadeOutJump { index: raw, duration } => player
            .fade_out_jump(index(raw, len)?, optional_seconds(duration)?)
            .await?
            .into(),
        Command::UpdateNowPlaying { metadata } => {
            player.update_now_playing(metadata)?;
            Reply::Done
        }
        Command::Retry => {
            player.retry().await?;
            Reply::Done
        }
        Command::Reset => {
            player.reset().await?;
            Reply::Done
        }
        Command::GetSnapshot => Reply::Snapshot {
            snapshot: player.snapshot(),
        },
        Command::GetQueue => Reply::Queue { items: player.items() },
        Command::Destroy => {
            player.destroy().await;
            Reply::Done
        }
    };
    Ok(reply)
}
