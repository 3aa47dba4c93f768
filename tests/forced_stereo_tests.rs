//! Forced stereo: two mono handles presented as one stereo plugin.

mod helpers;

use approx::assert_relative_eq;
use consort::prelude::*;
use helpers::*;

fn forced(spec: MockSpec) -> (Arc<PluginInstance>, Arc<RecordingEngine>, SharedLog) {
    let options = PluginOptions::FORCE_STEREO | PluginOptions::SEND_ALL_SOUND_OFF;
    load_with(spec, EngineOptions::default(), PluginInit::new(1).options(options))
}

#[test]
fn test_mono_plugin_is_doubled() {
    let (plugin, _engine, log) = forced(MockSpec::mono());

    assert!(plugin.hints().contains(PluginHints::CAN_FORCE_STEREO));
    assert!(plugin.options().contains(PluginOptions::FORCE_STEREO));
    assert_eq!(log.lock().handles, 2);
    assert_eq!(plugin.audio_in_count(), 2);
    assert_eq!(plugin.audio_out_count(), 2);

    let layout = plugin.layout();
    assert_eq!(layout.audio_in[0].name, "In 1");
    assert_eq!(layout.audio_in[1].name, "In 1_2");
    assert_eq!(layout.audio_in[0].rindex, layout.audio_in[1].rindex);
    assert_eq!(layout.audio_out[1].name, "Out 1_2");
    assert!(layout.forced_stereo_in && layout.forced_stereo_out);

    // Stereo host ports bring balance with them
    assert!(plugin.hints().contains(PluginHints::CAN_BALANCE));
}

#[test]
fn test_each_handle_renders_its_own_channel() {
    let (plugin, _engine, log) = forced(MockSpec::mono());
    run(&plugin, &[generate_dc(0.3, 64), generate_dc(0.6, 64)], &[], 64);
    MockLog::take_calls(&log);

    let out = run(&plugin, &[generate_dc(0.3, 64), generate_dc(0.6, 64)], &[], 64);
    assert!(out[0].iter().all(|&s| s == 0.3));
    assert!(out[1].iter().all(|&s| s == 0.6));

    let handles: Vec<usize> = MockLog::take_calls(&log).iter().map(|c| c.handle).collect();
    assert_eq!(handles, vec![0, 1]);
}

#[test]
fn test_parameters_reach_both_handles() {
    let (plugin, _engine, log) = forced(MockSpec::mono());
    plugin.set_parameter_value(GAIN, 0.5, false, false);

    let events = [EngineEvent::parameter(32, GAIN as u16, 1.0)];
    let out = run(&plugin, &[generate_dc(1.0, 64), generate_dc(1.0, 64)], &events, 64);

    let calls = MockLog::take_calls(&log);
    let seen: Vec<(usize, usize, f32)> = calls.iter().map(|c| (c.handle, c.frames, c.gain)).collect();
    assert_eq!(seen, vec![(0, 32, 0.5), (1, 32, 0.5), (0, 32, 2.0), (1, 32, 2.0)]);

    for channel in &out {
        assert_eq!(channel[0], 0.5);
        assert_eq!(channel[63], 2.0);
    }
}

#[test]
fn test_toggling_the_option_reloads() {
    let (plugin, _engine, log) = forced(MockSpec::mono());

    plugin.set_option(PluginOptions::FORCE_STEREO, false).unwrap();
    assert_eq!(plugin.audio_in_count(), 1);
    assert_eq!(plugin.audio_out_count(), 1);
    assert!(!plugin.layout().forced_stereo_in);
    // Still forceable, just not forced
    assert!(plugin.hints().contains(PluginHints::CAN_FORCE_STEREO));
    assert!(!plugin.hints().contains(PluginHints::CAN_BALANCE));
    assert!(plugin.is_active());

    plugin.set_option(PluginOptions::FORCE_STEREO, true).unwrap();
    assert_eq!(plugin.audio_in_count(), 2);
    assert_eq!(log.lock().handles, 3);
}

#[test]
fn test_forced_generator_is_mixed_down() {
    let spec = MockSpec {
        audio_ins: 0,
        audio_outs: 1,
        ..MockSpec::default()
    };
    let (plugin, _engine, _log) = forced(spec);

    let layout = plugin.layout();
    assert!(layout.forced_stereo_out);
    assert!(!layout.forced_stereo_in);
    assert_eq!(plugin.audio_out_count(), 2);

    let out = run(&plugin, &[], &[], 32);
    for channel in &out {
        assert_relative_eq!(channel[0], 0.5);
        assert_relative_eq!(channel[31], 0.5);
    }
}

#[test]
fn test_stereo_plugin_cannot_be_forced() {
    let (plugin, _engine, log) = forced(MockSpec::effect());
    assert!(!plugin.hints().contains(PluginHints::CAN_FORCE_STEREO));
    assert!(!plugin.available_options().contains(PluginOptions::FORCE_STEREO));
    assert!(!plugin.options().contains(PluginOptions::FORCE_STEREO));
    assert_eq!(log.lock().handles, 1);
}
