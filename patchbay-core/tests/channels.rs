mod common;

use common::{same_links, Harness, KEYS, MIC};
use patchbay_audio::{NativeCall, NativeOp, TestEngine};
use patchbay_core::EngineError;
use patchbay_types::{
    AudioInputConfig, AuxConfig, ChannelId, ChannelKind, ChannelVariant, MasterConfig,
    MidiInputConfig, PlaybackConfig,
};

#[test]
fn inputs_on_one_device_bus_share_a_node() {
    let h = Harness::new();
    let a = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let b = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let c = h.engine.create_audio_input(AudioInputConfig::new(MIC, 1)).unwrap();

    assert_eq!(h.engine.input_node_count(), 2);
    assert_eq!(h.engine.input_node_users("mic:0"), vec![a, b]);
    assert_eq!(h.engine.input_node_users("mic:1"), vec![c]);
    assert_ne!(h.engine.input_node("mic:0"), h.engine.input_node("mic:1"));

    let shared = h.engine.input_node("mic:0").unwrap();
    h.engine.remove_channel(a).unwrap();
    assert_eq!(h.engine.input_node("mic:0"), Some(shared));
    assert_eq!(h.engine.input_node_users("mic:0"), vec![b]);

    h.engine.remove_channel(b).unwrap();
    assert_eq!(h.engine.input_node("mic:0"), None);
    assert_eq!(h.engine.input_node_count(), 1);
}

#[test]
fn master_cannot_be_removed() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let before = h.engine.channel_ids();

    let err = h.engine.remove_channel(ChannelId::MASTER).unwrap_err();
    assert!(matches!(err, EngineError::MasterChannelImmutable { .. }));
    assert!(err.to_string().contains("master"));
    assert_eq!(h.engine.channel_ids(), before);
    assert_eq!(h.engine.channel(input).unwrap().connections.len(), 1);
}

#[test]
fn master_cannot_be_created() {
    let h = Harness::new();
    let variant = ChannelVariant::Master(MasterConfig {
        output_device_uid: common::OUTPUT.into(),
        limiter: false,
        metering: false,
    });
    assert!(matches!(
        h.engine.create_channel(None, variant),
        Err(EngineError::MasterChannelImmutable { .. })
    ));
}

#[test]
fn channels_get_default_names_and_can_be_renamed() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let aux = h
        .engine
        .create_channel(Some("Reverb bus"), ChannelVariant::Aux(AuxConfig::default()))
        .unwrap();

    assert_eq!(h.engine.channel(input).unwrap().name, format!("Input {input}"));
    assert_eq!(h.engine.channel(aux).unwrap().name, "Reverb bus");
    assert_eq!(h.engine.master().unwrap().name, "Master");

    h.engine.rename_channel(input, "  Vocals ").unwrap();
    assert_eq!(h.engine.channel(input).unwrap().name, "Vocals");
    assert!(h.engine.rename_channel(input, "   ").is_err());
}

#[test]
fn invalid_configurations_are_rejected_before_creation() {
    let h = Harness::new();

    assert!(matches!(
        h.engine.create_audio_input(AudioInputConfig::new("nowhere", 0)),
        Err(EngineError::DeviceNotFound { .. })
    ));
    assert!(matches!(
        h.engine.create_audio_input(AudioInputConfig::new(MIC, 2)),
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        h.engine.create_midi_input(MidiInputConfig::new(KEYS).on_channel(16)),
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        h.engine.create_playback(PlaybackConfig::new("/no/such/take.wav")),
        Err(EngineError::InvalidFilePath { .. })
    ));

    h.devices.set_online(MIC, false);
    assert!(matches!(
        h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)),
        Err(EngineError::DeviceOffline { .. })
    ));

    assert_eq!(h.engine.channels().len(), 1);
    assert_eq!(h.engine.input_node_count(), 0);
}

#[test]
fn new_channels_feed_the_master() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let midi = h.engine.create_midi_input(MidiInputConfig::new(KEYS)).unwrap();

    for id in [input, midi] {
        let connections = h.engine.channel(id).unwrap().connections;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].target, ChannelId::MASTER);
    }
    let buses: Vec<u32> = [input, midi]
        .iter()
        .map(|id| h.engine.channel(*id).unwrap().connections[0].target_bus)
        .collect();
    assert_eq!(buses, vec![0, 1]);
    assert!(h.native.links().iter().any(|l| l.target == TestEngine::OUTPUT_NODE));
}

#[test]
fn volume_and_pan_are_range_checked() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let aux = h.engine.create_aux(AuxConfig::default()).unwrap();

    h.engine.set_pan(input, -0.5).unwrap();
    assert_eq!(h.engine.pan(input).unwrap(), -0.5);
    assert!(h.engine.set_pan(input, 1.5).is_err());
    assert!(h.engine.set_volume(input, 1.2).is_err());
    assert!(h.engine.set_volume(input, f32::NAN).is_err());
    assert_eq!(h.engine.volume(input).unwrap(), 1.0);

    assert!(matches!(
        h.engine.set_pan(aux, 0.2),
        Err(EngineError::UnsupportedCapability {
            kind: ChannelKind::Aux,
            ..
        })
    ));
}

#[test]
fn routing_rejects_duplicates_and_loops() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let bus_a = h.engine.create_aux(AuxConfig::default()).unwrap();
    let bus_b = h.engine.create_aux(AuxConfig::default()).unwrap();

    assert!(matches!(
        h.engine.connect(input, ChannelId::MASTER),
        Err(EngineError::DuplicateConnection { .. })
    ));
    assert!(matches!(
        h.engine.connect(bus_a, input),
        Err(EngineError::UnsupportedCapability { .. })
    ));
    assert!(matches!(
        h.engine.connect(ChannelId::MASTER, bus_a),
        Err(EngineError::InvalidConnection { .. })
    ));

    h.engine.connect(input, bus_a).unwrap();
    h.engine.connect(bus_a, bus_b).unwrap();
    assert!(matches!(
        h.engine.connect(bus_b, bus_a),
        Err(EngineError::InvalidConnection { .. })
    ));

    h.engine.disconnect(bus_a, bus_b).unwrap();
    assert!(matches!(
        h.engine.disconnect(bus_a, bus_b),
        Err(EngineError::ConnectionNotFound { .. })
    ));
    h.engine.connect(bus_b, bus_a).unwrap();
}

#[test]
fn sends_only_target_aux_channels() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let other = h.engine.create_audio_input(AudioInputConfig::new(MIC, 1)).unwrap();
    let aux = h.engine.create_aux(AuxConfig::default()).unwrap();

    h.engine.add_send(input, aux, 0.4, true).unwrap();
    assert_eq!(h.engine.send_level(input, aux).unwrap(), 0.4);
    h.engine.set_send_level(input, aux, 0.7).unwrap();
    assert_eq!(h.engine.sends(input).unwrap()[0].level, 0.7);

    assert!(matches!(
        h.engine.add_send(input, aux, 0.5, false),
        Err(EngineError::DuplicateSend { .. })
    ));
    assert!(matches!(
        h.engine.add_send(input, other, 0.5, false),
        Err(EngineError::InvalidConnection { .. })
    ));
    assert!(h.engine.add_send(other, aux, 1.5, false).is_err());
    assert!(matches!(
        h.engine.add_send(aux, aux, 0.5, false),
        Err(EngineError::UnsupportedCapability { .. })
    ));

    h.engine.remove_send(input, aux).unwrap();
    assert!(matches!(
        h.engine.remove_send(input, aux),
        Err(EngineError::SendNotFound { .. })
    ));
}

#[test]
fn removing_an_aux_drops_every_send_to_it() {
    let h = Harness::new();
    let a = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let b = h.engine.create_audio_input(AudioInputConfig::new(MIC, 1)).unwrap();
    let reverb = h.engine.create_aux(AuxConfig::default()).unwrap();
    let delay = h.engine.create_aux(AuxConfig::default()).unwrap();

    h.engine.add_send(a, reverb, 0.3, false).unwrap();
    h.engine.add_send(b, reverb, 0.6, true).unwrap();
    h.engine.add_send(b, delay, 0.2, false).unwrap();
    h.engine.connect(a, reverb).unwrap();

    h.engine.remove_channel(reverb).unwrap();

    assert!(h.engine.channel(reverb).is_err());
    assert!(h.engine.sends(a).unwrap().is_empty());
    let remaining: Vec<ChannelId> = h.engine.sends(b).unwrap().iter().map(|s| s.target).collect();
    assert_eq!(remaining, vec![delay]);
    assert!(h
        .engine
        .channel(a)
        .unwrap()
        .connections
        .iter()
        .all(|c| c.target != reverb));
}

#[test]
fn mute_keeps_pre_fader_sends_flowing() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let aux = h.engine.create_aux(AuxConfig::default()).unwrap();
    h.engine.add_send(input, aux, 0.5, true).unwrap();
    let links = h.native.links().len();

    h.engine.set_mute(input, true).unwrap();
    assert_eq!(h.native.links().len(), links - 1);
    h.engine.set_mute(input, true).unwrap();
    assert_eq!(h.native.links().len(), links - 1);

    h.engine.set_mute(input, false).unwrap();
    assert_eq!(h.native.links().len(), links);
}

#[test]
fn master_options_are_kept_on_the_master() {
    let h = Harness::new();
    h.engine.set_master_options(true, false).unwrap();

    match h.engine.master().unwrap().variant {
        ChannelVariant::Master(config) => {
            assert!(config.limiter);
            assert!(!config.metering);
            assert_eq!(config.output_device_uid, common::OUTPUT);
        }
        other => panic!("master has variant {other:?}"),
    }
}

#[test]
fn failed_send_wiring_releases_the_send_mixer() {
    let h = Harness::new();
    let input = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let aux = h.engine.create_aux(AuxConfig::default()).unwrap();
    let links = h.native.links();
    h.native.clear();

    // The tap connects, the link into the aux does not.
    h.native.fail_after(NativeCall::Connect, 1, 1);
    assert!(matches!(
        h.engine.add_send(input, aux, 0.5, true),
        Err(EngineError::Native(_))
    ));

    assert!(h.engine.sends(input).unwrap().is_empty());
    assert!(same_links(&links, &h.native.links()));
    let created = match h.native.find(|op| matches!(op, NativeOp::CreateMixer(_))) {
        Some(NativeOp::CreateMixer(node)) => node,
        other => panic!("expected a send mixer, got {other:?}"),
    };
    assert!(h.native.find(|op| *op == NativeOp::ReleaseNode(created)).is_some());

    h.engine.add_send(input, aux, 0.5, true).unwrap();
    assert_eq!(h.engine.send_level(input, aux).unwrap(), 0.5);
}
