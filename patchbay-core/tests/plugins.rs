mod common;

use common::{delay, same_links, synth, Harness, KEYS, MIC};
use patchbay_audio::{NativeCall, NativeOp};
use patchbay_core::EngineError;
use patchbay_types::{AudioInputConfig, AuxConfig, MidiInputConfig, PluginBlueprint};

#[test]
fn chain_edits_keep_ids_and_order() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();

    let first = h.engine.add_plugin(ch, delay()).unwrap();
    let second = h.engine.add_plugin(ch, delay()).unwrap();
    let front = h.engine.insert_plugin(ch, delay(), Some(0)).unwrap();
    let order: Vec<_> = h.engine.plugins(ch).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(order, vec![front, first, second]);

    h.engine.move_plugin(ch, front, 2).unwrap();
    let order: Vec<_> = h.engine.plugins(ch).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(order, vec![first, second, front]);

    h.engine.remove_plugin(ch, second).unwrap();
    assert_eq!(h.engine.plugins(ch).unwrap().len(), 2);
    assert!(matches!(
        h.engine.remove_plugin(ch, second),
        Err(EngineError::PluginNotFound { .. })
    ));
    assert!(h.engine.move_plugin(ch, first, 5).is_err());
    assert!(h.engine.insert_plugin(ch, delay(), Some(9)).is_err());
}

#[test]
fn instruments_only_at_the_head_of_midi_channels() {
    let h = Harness::new();
    let midi = h.engine.create_midi_input(MidiInputConfig::new(KEYS)).unwrap();
    let aux = h.engine.create_aux(AuxConfig::default()).unwrap();

    assert!(h.engine.add_plugin(aux, synth()).is_err());

    let fx = h.engine.add_plugin(midi, delay()).unwrap();
    assert!(matches!(
        h.engine.add_plugin(midi, synth()),
        Err(EngineError::InvalidValue { field: "plugin slot", .. })
    ));
    let inst = h.engine.insert_plugin(midi, synth(), Some(0)).unwrap();
    assert!(h.engine.move_plugin(midi, inst, 1).is_err());
    assert!(h.engine.move_plugin(midi, fx, 0).is_err());
    assert_eq!(h.engine.plugins(midi).unwrap()[0].id, inst);
}

#[test]
fn playback_channels_have_no_chain() {
    let dir = tempfile::tempdir().unwrap();
    let take = dir.path().join("loop.wav");
    std::fs::write(&take, b"RIFF").unwrap();

    let h = Harness::new();
    let ch = h
        .engine
        .create_playback(patchbay_types::PlaybackConfig::new(&take))
        .unwrap();
    assert_eq!(h.engine.channel(ch).unwrap().name, "loop");
    assert!(matches!(
        h.engine.add_plugin(ch, delay()),
        Err(EngineError::UnsupportedCapability { .. })
    ));
}

#[test]
fn parameters_are_validated_against_introspection() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let fx = h.engine.add_plugin(ch, delay()).unwrap();

    assert_eq!(h.engine.parameter(ch, fx, 7).unwrap(), 50.0);
    h.engine.set_parameter(ch, fx, 7, 42.0).unwrap();
    assert_eq!(h.engine.parameter(ch, fx, 7).unwrap(), 42.0);
    assert!(h
        .native
        .find(|op| matches!(op, NativeOp::SetParameter { address: 7, value, .. } if *value == 42.0))
        .is_some());

    assert!(matches!(
        h.engine.set_parameter(ch, fx, 12, 3.0),
        Err(EngineError::InvalidValue { .. })
    ));
    assert!(matches!(
        h.engine.set_parameter(ch, fx, 99, 0.0),
        Err(EngineError::ParameterNotFound { address: 99, .. })
    ));
    assert_eq!(h.engine.parameter(ch, fx, 12).unwrap(), 0.5);
}

#[test]
fn bypass_takes_the_unit_out_of_the_signal_path() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let fx = h.engine.add_plugin(ch, delay()).unwrap();
    let unit = match h.native.find(|op| matches!(op, NativeOp::InstantiateUnit { .. })) {
        Some(NativeOp::InstantiateUnit { node, .. }) => node,
        other => panic!("expected a unit, got {other:?}"),
    };
    assert!(h.native.links().iter().any(|l| l.source == unit));

    h.engine.set_plugin_bypass(ch, fx, true).unwrap();
    assert!(h.engine.plugin_bypass(ch, fx).unwrap());
    assert!(!h.native.links().iter().any(|l| l.source == unit || l.target == unit));

    h.engine.set_plugin_bypass(ch, fx, false).unwrap();
    assert!(h.native.links().iter().any(|l| l.source == unit));
}

#[test]
fn missing_plugin_stays_in_the_chain_uninstalled() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let ghost = PluginBlueprint::new("aufx", "gost", "acme", "Ghost");

    let id = h.engine.add_plugin(ch, ghost).unwrap();
    let instance = h.engine.plugin(ch, id).unwrap();
    assert!(!instance.installed);
    assert!(instance.parameters.is_empty());
    assert_eq!(h.reported("PluginLoadFailed").len(), 1);

    assert!(matches!(
        h.engine.set_parameter(ch, id, 0, 0.1),
        Err(EngineError::PluginNotInstalled { .. })
    ));

    let fx = h.engine.add_plugin(ch, delay()).unwrap();
    assert!(h.engine.plugin(ch, fx).unwrap().installed);
}

#[test]
fn unresponsive_plugin_is_reported() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.plugins.set_unresponsive("Delay");

    let id = h.engine.add_plugin(ch, delay()).unwrap();
    assert!(!h.engine.plugin(ch, id).unwrap().installed);
    assert_eq!(h.reported("PluginUnresponsive").len(), 1);
    assert_eq!(
        h.native.count(|op| matches!(op, NativeOp::ReleaseNode(_))),
        1
    );
}

#[test]
fn failed_chain_edits_keep_the_old_wiring() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    let first = h.engine.add_plugin(ch, delay()).unwrap();
    let links = h.native.links();

    h.native.fail_next(NativeCall::Connect, 1);
    assert!(matches!(
        h.engine.add_plugin(ch, delay()),
        Err(EngineError::Native(_))
    ));
    assert_eq!(h.engine.plugins(ch).unwrap().len(), 1);
    assert!(same_links(&links, &h.native.links()));

    let second = h.engine.add_plugin(ch, delay()).unwrap();
    let links = h.native.links();
    let order = |h: &Harness| -> Vec<_> {
        h.engine.plugins(ch).unwrap().iter().map(|p| p.id).collect()
    };

    h.native.fail_after(NativeCall::Connect, 1, 1);
    assert!(h.engine.move_plugin(ch, second, 0).is_err());
    assert_eq!(order(&h), vec![first, second]);
    assert!(same_links(&links, &h.native.links()));

    h.native.fail_after(NativeCall::Connect, 1, 1);
    assert!(h.engine.set_plugin_bypass(ch, first, true).is_err());
    assert!(!h.engine.plugin_bypass(ch, first).unwrap());
    assert!(same_links(&links, &h.native.links()));

    h.native.fail_next(NativeCall::Disconnect, 1);
    assert!(h.engine.remove_plugin(ch, first).is_err());
    assert_eq!(order(&h), vec![first, second]);
    assert!(same_links(&links, &h.native.links()));
}

#[test]
fn failed_chain_edit_on_a_muted_channel_stays_muted() {
    let h = Harness::new();
    let ch = h.engine.create_audio_input(AudioInputConfig::new(MIC, 0)).unwrap();
    h.engine.add_plugin(ch, delay()).unwrap();
    h.engine.set_mute(ch, true).unwrap();
    let links = h.native.links();

    h.native.fail_next(NativeCall::Connect, 1);
    assert!(h.engine.add_plugin(ch, delay()).is_err());
    assert!(h.engine.is_muted(ch).unwrap());
    assert!(same_links(&links, &h.native.links()));
}
