mod common;

use common::{Harness, MIC, OUTPUT};
use patchbay_audio::{NativeCall, NativeEngine, NativeOp};
use patchbay_core::EngineError;
use patchbay_types::{AudioInputConfig, ChannelId, EngineState, PlaybackConfig, TransportState};

#[test]
fn input_channel_mute_across_start_and_stop() {
    let h = Harness::new();
    assert_eq!(h.engine.output_device(), OUTPUT);
    assert_eq!(h.native.output_device().as_deref(), Some(OUTPUT));
    assert_eq!(h.engine.state(), EngineState::MasterReady);

    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.set_volume(ch, 0.8).unwrap();
    assert_eq!(h.engine.volume(ch).unwrap(), 0.8);
    assert_eq!(h.engine.state(), EngineState::AudioGraphReady);

    h.engine.start().unwrap();
    assert!(h.engine.is_running());
    assert!(h.native.is_running());
    assert!(h.engine.channel(ch).unwrap().running);

    h.engine.set_mute(ch, true).unwrap();
    assert!(h.engine.is_muted(ch).unwrap());

    h.engine.stop().unwrap();
    assert!(!h.native.is_running());
    assert!(!h.engine.is_running());
    assert_eq!(h.engine.state(), EngineState::AudioGraphReady);
    assert!(!h.engine.channel(ch).unwrap().running);
    assert!(h.engine.is_muted(ch).unwrap());
}

#[test]
fn start_twice_is_rejected() {
    let h = Harness::new();
    h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.start().unwrap();

    let err = h.engine.start().unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { operation: "start", .. }));
    assert!(h.engine.is_running());
}

#[test]
fn master_only_engine_cannot_start() {
    let h = Harness::new();
    let err = h.engine.start().unwrap_err();
    assert!(matches!(err, EngineError::EngineStartFailed { .. }));
    assert!(!h.native.is_running());
}

#[test]
fn native_start_failure_rolls_back() {
    let h = Harness::new();
    h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.native.fail_next(patchbay_audio::NativeCall::Start, 1);

    let err = h.engine.start().unwrap_err();
    assert!(matches!(err, EngineError::EngineStartFailed { .. }));
    assert_eq!(h.engine.state(), EngineState::AudioGraphReady);
    assert!(!h.engine.monitor_stats().running);

    h.engine.start().unwrap();
    assert!(h.engine.is_running());
}

#[test]
fn buffer_size_only_changes_while_stopped() {
    use patchbay_types::BufferSize;

    let h = Harness::new();
    h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.set_buffer_size(BufferSize::B256).unwrap();
    assert_eq!(h.engine.buffer_size(), BufferSize::B256);
    assert!(h
        .native
        .find(|op| *op == NativeOp::SetBufferSize(256))
        .is_some());

    h.engine.start().unwrap();
    let err = h.engine.set_buffer_size(BufferSize::B512).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    assert_eq!(h.engine.buffer_size(), BufferSize::B256);
}

#[test]
fn playback_transport_follows_engine_state() {
    let dir = tempfile::tempdir().unwrap();
    let take = dir.path().join("take.wav");
    std::fs::write(&take, b"RIFF").unwrap();

    let h = Harness::new();
    let mut config = PlaybackConfig::new(&take);
    config.auto_start = true;
    let ch = h.engine.create_playback(config).unwrap();
    assert_eq!(h.engine.transport(ch).unwrap().state, TransportState::Stopped);
    let player = h.native.players()[0];
    assert!(h.native.links().iter().any(|l| l.source == player));
    assert!(!h.native.is_playing(player));

    h.engine.start().unwrap();
    assert_eq!(h.engine.transport(ch).unwrap().state, TransportState::Playing);
    assert!(h.native.is_playing(player));
    h.engine.seek(ch, 12.5).unwrap();
    assert_eq!(h.engine.transport(ch).unwrap().position, 12.5);
    assert!(h
        .native
        .find(|op| matches!(op, NativeOp::PlayPlayer { position, .. } if *position == 12.5))
        .is_some());
    assert!(h.engine.seek(ch, -1.0).is_err());

    h.engine.stop().unwrap();
    let transport = h.engine.transport(ch).unwrap();
    assert_eq!(transport.state, TransportState::Paused);
    assert_eq!(transport.position, 12.5);
    assert!(!h.native.is_playing(player));

    h.engine.stop_playback(ch).unwrap();
    assert_eq!(h.engine.transport(ch).unwrap().position, 0.0);

    h.engine.remove_channel(ch).unwrap();
    assert!(h.native.players().is_empty());
}

#[test]
fn play_on_a_stopped_engine_waits_for_start() {
    let dir = tempfile::tempdir().unwrap();
    let take = dir.path().join("take.wav");
    std::fs::write(&take, b"RIFF").unwrap();

    let h = Harness::new();
    let ch = h.engine.create_playback(PlaybackConfig::new(&take)).unwrap();
    let player = h.native.players()[0];

    h.engine.seek(ch, 3.0).unwrap();
    h.engine.play(ch).unwrap();
    assert_eq!(h.engine.transport(ch).unwrap().state, TransportState::Playing);
    assert!(!h.native.is_playing(player));

    h.engine.start().unwrap();
    assert!(h.native.is_playing(player));
    assert_eq!(
        h.native.find(|op| matches!(op, NativeOp::PlayPlayer { .. })),
        Some(NativeOp::PlayPlayer {
            node: player,
            position: 3.0
        })
    );

    h.engine.pause(ch).unwrap();
    assert!(!h.native.is_playing(player));
    assert_eq!(h.engine.transport(ch).unwrap().state, TransportState::Paused);
}

#[test]
fn destroy_releases_native_once() {
    let h = Harness::new();
    h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.start().unwrap();

    h.engine.destroy();
    h.engine.destroy();
    assert_eq!(h.native.destroy_count(), 1);
    assert!(!h.native.is_running());
    assert!(matches!(
        h.engine.set_mute(ChannelId::MASTER, true),
        Err(EngineError::DispatcherStopped)
    ));
}

#[test]
fn failed_stop_keeps_the_engine_and_monitor_running() {
    let h = Harness::new();
    h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.start().unwrap();
    assert!(h.engine.monitor_stats().running);

    h.native.fail_next(NativeCall::Stop, 1);
    assert!(matches!(
        h.engine.stop(),
        Err(EngineError::StructuralOperationFailed { .. })
    ));
    assert_eq!(h.engine.state(), EngineState::Running);
    assert!(h.engine.monitor_stats().running);

    h.engine.stop().unwrap();
    assert!(!h.engine.monitor_stats().running);
    assert_ne!(h.engine.state(), EngineState::Running);
}
