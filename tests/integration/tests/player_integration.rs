//! Integration tests for the trackdeck media player
//!
//! These tests drive the complete player through the simulated renderer:
//! - Queue navigation and validation
//! - Auto-advance and error recovery
//! - Crossfades between the two engines
//! - Host capabilities (focus, session) and configuration loading

use anyhow::Result;
use mockall::Sequence;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use trackdeck::audio::{FocusChange, FocusGrant};
use trackdeck::player::command::{execute, Command, Reply};
use trackdeck::player::{
    CrossfadeTarget, EngineId, EventKind, PlaybackState, PlayerEvent, RepeatMode, SwapOutcome, TransitionReason,
};
use trackdeck::utils::{Config, PlayerError};
use trackdeck::MediaPlayer;
use trackdeck_integration_tests::mocks::{MockFocus, MockSession};
use trackdeck_integration_tests::{fast_options, states, PlayerRig, TestFixture};

#[tokio::test]
async fn test_player_initialization() -> Result<()> {
    let rig = PlayerRig::new(fast_options())?;

    let snapshot = rig.player.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Idle);
    assert_eq!(snapshot.position, Duration::ZERO);
    assert_eq!(snapshot.current_index, None);
    assert_eq!(snapshot.current_index_raw(), -1);
    assert_eq!(snapshot.volume, 1.0);
    assert_eq!(rig.player.active().id(), EngineId(0));

    Ok(())
}

#[tokio::test]
async fn test_fixture_items_carry_wav_length() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;

    rig.player.add(fixture.items(), None).await?;
    assert_eq!(rig.player.state(), PlaybackState::Ready);
    assert_eq!(rig.player.snapshot().duration, Some(fixture.tracks[0].duration));
    assert_eq!(fixture.tracks[1].duration, Duration::from_secs(3));

    Ok(())
}

#[tokio::test]
async fn test_repeat_queue_wraps_to_start() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.set_repeat_mode(RepeatMode::Queue);

    rig.player.skip(2, None).await?;
    rig.player.next(None).await?;
    assert_eq!(rig.player.current_index(), Some(0));
    assert_eq!(rig.player.active().current_index(), Some(0));

    Ok(())
}

#[tokio::test]
async fn test_single_item_next_signals_queue_end() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(vec![fixture.tracks[0].item()], None).await?;
    rig.events.drain();

    rig.player.next(None).await?;
    assert_eq!(rig.player.current_index(), Some(0));
    let events = rig.events.drain();
    assert!(events.iter().any(|event| event.kind() == EventKind::QueueEnded));
    assert!(!events.iter().any(|event| event.kind() == EventKind::ItemTransitioned));

    Ok(())
}

#[tokio::test]
async fn test_remove_out_of_range_leaves_queue_unchanged() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    let before = rig.player.items();

    let err = rig.player.remove(&[5]).await.unwrap_err();
    assert!(matches!(err, PlayerError::IndexOutOfRange { index: 5, len: 3 }));
    assert_eq!(rig.player.items(), before);

    Ok(())
}

#[tokio::test]
async fn test_add_then_remove_restores_queue() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    let before = rig.player.items();

    for i in 0..=before.len() {
        rig.player.add(vec![fixture.tracks[2].item()], Some(i)).await?;
        rig.player.remove(&[i]).await?;
        assert_eq!(rig.player.items(), before);
        assert_eq!(rig.player.current_index(), Some(0));
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auto_advance_through_queue() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    let clocks = rig.start_clocks(Duration::from_millis(50));

    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(rig.player.current_index(), Some(1));
    assert_eq!(rig.player.state(), PlaybackState::Playing);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.player.state(), PlaybackState::Ended);

    let events = rig.events.drain();
    let auto_transitions = events
        .iter()
        .filter(|event| matches!(event, PlayerEvent::ItemTransitioned { reason, .. } if *reason == TransitionReason::Auto))
        .count();
    assert_eq!(auto_transitions, 2);
    assert!(events.iter().any(|event| matches!(event, PlayerEvent::QueueEnded { index: Some(2), .. })));

    for clock in clocks {
        clock.abort();
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_absorbed_into_error_state() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;

    let mut items = fixture.items();
    items.insert(0, fixture.missing_item());
    rig.player.add(items, None).await?;

    assert_eq!(rig.player.state(), PlaybackState::Error);
    let events = rig.events.drain();
    assert!(events.iter().any(|event| event.kind() == EventKind::PlaybackError));

    rig.player.skip(1, None).await?;
    assert_eq!(rig.player.state(), PlaybackState::Ready);

    Ok(())
}

#[tokio::test]
async fn test_renderer_error_then_retry() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();
    rig.events.drain();

    rig.active_control().fail("ERROR_CODE_IO_NETWORK_CONNECTION_FAILED", "connection reset");
    assert_eq!(rig.player.state(), PlaybackState::Error);
    assert!(rig.events.drain().contains(&PlayerEvent::PlaybackError {
        code: "io-network-connection-failed".to_string(),
        message: "connection reset".to_string(),
    }));

    rig.player.retry().await?;
    assert_eq!(rig.player.state(), PlaybackState::Playing);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_swaps_engines() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    let outcome = rig.player.crossfade_next().await?;
    assert!(matches!(
        outcome,
        SwapOutcome::Swapped {
            from: EngineId(0),
            to: EngineId(1),
            index: 1
        }
    ));

    let controller = rig.player.crossfade_controller();
    assert!(!controller.is_swapping());

    let old = controller.engine(EngineId(0)).expect("engine 0 exists");
    assert!(old.current_item().is_none());
    assert!(!rig.control(EngineId(0)).is_playing());

    let active = rig.player.active();
    assert_eq!(active.id(), EngineId(1));
    assert_eq!(active.state(), PlaybackState::Playing);
    assert!((active.effective_volume() - 1.0).abs() < 1e-6);
    assert!((rig.control(EngineId(1)).volume() - 1.0).abs() < 1e-6);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_crossfade_is_rejected() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    let (first, second) = tokio::join!(rig.player.crossfade_next(), async {
        tokio::task::yield_now().await;
        rig.player.crossfade_next().await
    });

    assert!(first?.is_swapped());
    assert!(matches!(second, Err(PlayerError::SwapInProgress)));
    assert_eq!(rig.player.current_index(), Some(1));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_state_events_never_repeat() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();
    rig.player.pause();
    rig.player.play();
    rig.player.crossfade_next().await?;
    rig.player.crossfade_previous().await?;
    rig.player.stop();
    rig.player.play();
    rig.player.reset().await?;

    let seen = states(&rig.events.drain());
    assert!(seen.len() > 4);
    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1], "state {} announced twice in {:?}", pair[0], seen);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_prepared_crossfade_skips_second_open() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    let prepared = rig
        .player
        .crossfade_prepare(CrossfadeTarget::Next)
        .await?;
    assert_eq!(prepared, Some(1));
    assert_eq!(rig.control(EngineId(1)).opened().len(), 1);

    assert!(rig.player.crossfade_next().await?.is_swapped());
    assert_eq!(rig.control(EngineId(1)).opened().len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_queue_insert_during_crossfade_keeps_current_in_step() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    let (swap, added) = tokio::join!(rig.player.crossfade_next(), async {
        sleep(Duration::from_millis(100)).await;
        assert!(rig.player.crossfade_controller().is_swapping());
        rig.player.add(vec![fixture.tracks[2].item()], Some(0)).await
    });
    assert!(swap?.is_swapped());
    assert_eq!(added?, 0);

    let queued = rig.player.current_item().expect("queue has a current item");
    let playing = rig.player.active().current_item().expect("engine has an item");
    assert_eq!(queued.media_id(), playing.media_id());
    assert_eq!(rig.player.current_index(), Some(2));
    assert_eq!(rig.player.active().current_index(), Some(2));
    assert_eq!(playing.title(), Some("tone_b"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_volume_and_duck_during_crossfade_follow_playback() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    let (swap, set) = tokio::join!(rig.player.crossfade_next(), async {
        sleep(Duration::from_millis(100)).await;
        rig.player.on_audio_focus_change(FocusChange::LossTransientCanDuck);
        rig.player.set_volume(0.5)
    });
    assert!(swap?.is_swapped());
    set?;

    let active = rig.player.active();
    assert_eq!(active.id(), EngineId(1));
    assert_eq!(active.volume(), 0.5);
    assert!(active.is_ducked());
    assert!((rig.active_control().volume() - 0.1).abs() < 1e-6);

    rig.player.on_audio_focus_change(FocusChange::Gain);
    assert!((rig.active_control().volume() - 0.5).abs() < 1e-6);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_pause_after_queue_finished() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;
    let clocks = rig.start_clocks(Duration::from_millis(50));

    rig.player.add(vec![fixture.tracks[2].item()], None).await?;
    rig.player.play();
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(rig.player.state(), PlaybackState::Ended);
    rig.events.drain();

    rig.player.pause();
    assert_eq!(rig.player.state(), PlaybackState::Paused);
    assert!(!rig.player.snapshot().play_when_ready);
    assert_eq!(states(&rig.events.drain()), vec![PlaybackState::Paused]);

    for clock in clocks {
        clock.abort();
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_session_follows_active_engine() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut session = MockSession::new();
    let mut sequence = Sequence::new();
    session
        .expect_attach()
        .withf(|controls| controls.engine_id() == EngineId(0))
        .times(1)
        .in_sequence(&mut sequence)
        .return_const(());
    session
        .expect_attach()
        .withf(|controls| controls.engine_id() == EngineId(1))
        .times(1)
        .in_sequence(&mut sequence)
        .return_const(());

    let rig = PlayerRig::with_builder(
        MediaPlayer::builder()
            .with_options(fast_options())
            .with_session(Arc::new(session)),
    )?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    assert!(rig.player.crossfade_next().await?.is_swapped());

    Ok(())
}

#[tokio::test]
async fn test_focus_denied_ducks_instead_of_failing() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut focus = MockFocus::new();
    focus.expect_request_focus().returning(|| FocusGrant::Denied);
    focus.expect_abandon_focus().never();

    let rig = PlayerRig::with_builder(
        MediaPlayer::builder()
            .with_options(fast_options())
            .with_focus_platform(Arc::new(focus)),
    )?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    assert_eq!(rig.player.state(), PlaybackState::Playing);
    assert!(rig.player.active().is_ducked());
    assert!((rig.active_control().volume() - 0.2).abs() < 1e-6);
    assert!(rig.events.drain().iter().any(|event| event.kind() == EventKind::FocusChanged));

    rig.player.destroy().await;
    Ok(())
}

#[tokio::test]
async fn test_focus_loss_pauses_and_releases() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut focus = MockFocus::new();
    focus.expect_request_focus().times(1).returning(|| FocusGrant::Granted);
    focus.expect_abandon_focus().times(1).return_const(());

    let rig = PlayerRig::with_builder(
        MediaPlayer::builder()
            .with_options(fast_options())
            .with_focus_platform(Arc::new(focus)),
    )?;
    rig.player.add(fixture.items(), None).await?;
    rig.player.play();

    rig.player.on_audio_focus_change(FocusChange::Loss);
    assert_eq!(rig.player.state(), PlaybackState::Paused);

    rig.player.destroy().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_commands_over_json() -> Result<()> {
    let fixture = TestFixture::new()?;
    let rig = PlayerRig::new(fast_options())?;

    let specs: Vec<_> = fixture
        .tracks
        .iter()
        .map(|track| serde_json::json!({"url": format!("file://{}", track.path.display())}))
        .collect();
    let add: Command = serde_json::from_value(serde_json::json!({"command": "add", "items": specs}))?;
    assert_eq!(execute(&rig.player, add).await?, Reply::Index { index: 0 });

    let play: Command = serde_json::from_value(serde_json::json!({"command": "play"}))?;
    execute(&rig.player, play).await?;

    let jump: Command = serde_json::from_value(serde_json::json!({"command": "skip", "index": 2}))?;
    execute(&rig.player, jump).await?;
    assert_eq!(rig.player.current_index(), Some(2));

    let bad: Command = serde_json::from_value(serde_json::json!({"command": "move", "from": -3, "to": 0}))?;
    assert!(matches!(
        execute(&rig.player, bad).await,
        Err(PlayerError::IndexOutOfRange { index: -3, .. })
    ));

    Ok(())
}

#[test]
#[serial]
fn test_config_file_and_environment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[player]\ncrossfade_duration_ms = 4000\ndefault_volume = 0.5\n\n[player.buffer]\nmin_ms = 20000\n",
    )?;

    std::env::set_var("TRACKDECK_CROSSFADE_MS", "1200");
    let loaded = Config::load_from(&path);
    std::env::remove_var("TRACKDECK_CROSSFADE_MS");

    let config = loaded?;
    assert_eq!(config.player.crossfade_duration_ms, 1200);
    assert_eq!(config.player.default_volume, 0.5);
    assert_eq!(config.player.buffer.min_ms, 20_000);
    assert_eq!(config.player.buffer.max_ms, 50_000);

    Ok(())
}

#[test]
#[serial]
fn test_invalid_environment_override_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "")?;

    std::env::set_var("TRACKDECK_VOLUME", "loud");
    let loaded = Config::load_from(&path);
    std::env::remove_var("TRACKDECK_VOLUME");

    assert!(matches!(loaded, Err(PlayerError::Config(_))));
    Ok(())
}
