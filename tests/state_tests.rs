//! State save and restore across instances, chunks and on-disk encodings.

mod helpers;

use approx::assert_relative_eq;
use consort::plugin::{ParameterState, PluginError};
use consort::prelude::*;
use helpers::*;

fn with_programs() -> MockSpec {
    MockSpec {
        programs: vec!["Dry".to_string(), "Warm".to_string()],
        ..MockSpec::effect()
    }
}

fn chunked() -> (MockSpec, PluginInit) {
    let spec = MockSpec::effect().hints(PluginHints::USES_CHUNKS);
    let options = EngineOptions::default().default_options | PluginOptions::USE_CHUNKS;
    (spec, PluginInit::new(1).options(options))
}

/// A plugin with every kind of state moved off its defaults.
fn configured() -> (Arc<PluginInstance>, SharedLog) {
    let (plugin, _engine, log) = load(with_programs());
    plugin.set_program(Some(1), false).unwrap();
    plugin.set_parameter_value(MODE, 3.0, false, false);
    plugin.set_parameter_value(CUTOFF, 6000.0, false, false);
    plugin.set_parameter_midi_cc(MODE, Some(20)).unwrap();
    plugin.set_parameter_midi_channel(MODE, 2).unwrap();
    plugin.set_custom_data(CustomDataType::String, "preset", "warm", false);
    plugin.set_dry_wet(0.4);
    plugin.set_volume(0.8);
    plugin.set_balance_left(-0.5);
    plugin.set_balance_right(0.5);
    plugin.set_panning(0.25);
    plugin.set_ctrl_channel(3);
    (plugin, log)
}

#[test]
fn test_save_captures_inputs_only() {
    let (plugin, _log) = configured();
    let state = plugin.save_state().unwrap();

    assert_eq!(state.name, "Mock mock");
    assert!(state.active);
    assert_eq!(state.current_program, Some(1));
    assert_eq!(state.current_midi_program, None);
    assert!(state.chunk.is_none());

    let names: Vec<&str> = state.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Gain", "Mode", "Cutoff"]);
    assert_eq!(state.parameters[GAIN].value, program_gain(1));
    assert_eq!(state.parameters[MODE].midi_cc, Some(20));
    assert_eq!(state.parameters[MODE].midi_channel, 2);
}

#[test]
fn test_restore_into_fresh_instance() {
    let (source, _log) = configured();
    let state = source.save_state().unwrap();

    let (plugin, engine, log) = load(with_programs());
    engine.take_notifications();
    plugin.restore_state(&state).unwrap();

    assert_eq!(plugin.current_program(), Some(1));
    assert_eq!(plugin.parameter_value(GAIN), program_gain(1));
    assert_eq!(plugin.parameter_value(MODE), 3.0);
    assert_relative_eq!(plugin.parameter_value(CUTOFF), 6000.0);

    let mode = plugin.parameter(MODE).unwrap();
    assert_eq!(mode.data.midi_cc, Some(20));
    assert_eq!(mode.data.midi_channel, 2);

    assert_eq!(plugin.dry_wet(), 0.4);
    assert_eq!(plugin.volume(), 0.8);
    assert_eq!(plugin.balance_left(), -0.5);
    assert_eq!(plugin.balance_right(), 0.5);
    assert_eq!(plugin.panning(), 0.25);
    assert_eq!(plugin.ctrl_channel(), 3);

    assert_eq!(plugin.custom_data(CustomDataType::String, "preset").as_deref(), Some("warm"));
    assert!(log
        .lock()
        .custom_data
        .contains(&(CustomDataType::String, "preset".to_string(), "warm".to_string())));
    assert_eq!(log.lock().programs, vec![1]);

    assert!(engine.notifications().contains(&HostNotification::ProgramChanged {
        plugin_id: 1,
        index: Some(1),
    }));

    // Restored values reach the plugin before the next frame
    let out = run(&plugin, &[generate_dc(1.0, 8), generate_dc(1.0, 8)], &[], 8);
    assert!(out.iter().all(|c| c.iter().all(|s| s.is_finite())));
    let call = MockLog::take_calls(&log).pop().unwrap();
    assert_eq!(call.gain, program_gain(1));
    assert_eq!(call.mode, 3.0);
}

#[test]
fn test_restore_honors_saved_activity() {
    let (source, _engine, _log) = load(MockSpec::effect());
    source.set_active(false);
    let state = source.save_state().unwrap();

    let (plugin, _engine, _log) = load(MockSpec::effect());
    assert!(plugin.is_active());
    plugin.restore_state(&state).unwrap();
    assert!(!plugin.is_active());
}

#[test]
fn test_midi_program_round_trip() {
    let (source, _engine, _log) = load(MockSpec::synth());
    source.set_midi_program_by_id(1, 0, false).unwrap();
    let state = source.save_state().unwrap();
    assert_eq!(state.current_midi_program, Some((1, 0)));

    let (plugin, _engine, log) = load(MockSpec::synth());
    plugin.restore_state(&state).unwrap();
    assert_eq!(plugin.current_midi_program(), Some(2));
    assert_eq!(log.lock().midi_programs, vec![(0, 1, 0)]);
}

#[test]
fn test_parameters_match_by_name_when_indices_move() {
    let (source, _engine, _log) = load(MockSpec::effect());
    source.set_parameter_value(MODE, 2.0, false, false);
    let mut state = source.save_state().unwrap();

    state.parameters[MODE].rindex = 42;
    state.parameters.push(ParameterState {
        index: 9,
        rindex: 99,
        name: "Gone".to_string(),
        value: 1.0,
        midi_channel: 0,
        midi_cc: None,
    });

    let (plugin, _engine, _log) = load(MockSpec::effect());
    plugin.restore_state(&state).unwrap();
    assert_eq!(plugin.parameter_value(MODE), 2.0);
    assert_eq!(plugin.parameter_count(), 4);
}

#[test]
fn test_chunk_round_trip() {
    let (spec, init) = chunked();
    let (source, _engine, _log) = load_with(spec.clone(), EngineOptions::default(), init.clone());
    assert!(source.uses_chunks());

    source.set_parameter_value(GAIN, 1.5, false, false);
    let chunk = source.chunk_data().unwrap().unwrap();
    assert_eq!(chunk, b"gain=1.5;mode=0".to_vec());

    let state = source.save_state().unwrap();
    assert_eq!(state.chunk.as_deref(), Some(&chunk[..]));

    let (plugin, _engine, _log) = load_with(spec, EngineOptions::default(), init);
    plugin.restore_state(&state).unwrap();
    assert_eq!(plugin.parameter_value(GAIN), 1.5);
    assert_eq!(plugin.chunk_data().unwrap(), Some(chunk));
}

#[test]
fn test_chunks_need_hint_and_option() {
    let (plugin, _engine, _log) = load(MockSpec::effect().hints(PluginHints::USES_CHUNKS));
    assert!(plugin.available_options().contains(PluginOptions::USE_CHUNKS));
    assert!(!plugin.uses_chunks());
    assert_eq!(plugin.chunk_data().unwrap(), None);

    let (plugin, _engine, _log) = load(MockSpec::effect());
    assert!(!plugin.available_options().contains(PluginOptions::USE_CHUNKS));
    assert!(matches!(
        plugin.set_chunk_data(b"gain=1;mode=0"),
        Err(PluginError::StateRestoreError(_))
    ));
}

#[test]
fn test_rejected_chunk_fails_restore() {
    let (spec, init) = chunked();
    let (plugin, _engine, _log) = load_with(spec, EngineOptions::default(), init);

    let err = plugin.set_chunk_data(b"not a chunk").unwrap_err();
    assert!(matches!(err, PluginError::StateRestoreError(_)));

    let mut state = plugin.save_state().unwrap();
    state.chunk = Some(b"\xff\xfe".to_vec());
    assert!(plugin.restore_state(&state).is_err());
}

#[test]
fn test_state_survives_disk_round_trip() {
    let (plugin, _log) = configured();
    let state = plugin.save_state().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let binary = dir.path().join("plugin.state");
    std::fs::write(&binary, state.to_bytes().unwrap()).unwrap();
    let decoded = PluginState::from_bytes(&std::fs::read(&binary).unwrap()).unwrap();
    assert_eq!(decoded, state);

    let text = dir.path().join("plugin.json");
    std::fs::write(&text, serde_json::to_string_pretty(&state).unwrap()).unwrap();
    let decoded: PluginState = serde_json::from_str(&std::fs::read_to_string(&text).unwrap()).unwrap();
    assert_eq!(decoded, state);
}

#[test]
fn test_truncated_state_is_an_error() {
    let (plugin, _log) = configured();
    let bytes = plugin.save_state().unwrap().to_bytes().unwrap();
    let err = PluginState::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, PluginError::Serialization(_)));
}
