//! Port layout: native ports normalized into host ports and parameters.
//!
//! A [`PluginLayout`] is built once per reload and then only read. The instance
//! swaps it in wholesale, so the audio thread never observes a half-built one.

use crate::adapter::{PortDirection, PortInfo, PortKind};
use crate::midi::MidiProgram;
use crate::parameter::{
    is_latency_port_name, split_name_and_unit, Parameter, ParameterData, ParameterHints,
    ParameterRanges, ParameterSpecial, ParameterType, SAMPLE_RATE_PORT_NAME,
};
use crate::PluginHints;

/// Most native audio ports a handle may have per direction. The dispatcher
/// builds its per-call channel lists inline up to this size.
pub const MAX_AUDIO_PORTS: usize = 64;

/// A host-visible port and the native port it is wired to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub name: String,
    pub rindex: u32,
}

/// Native port counts of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortCounts {
    pub audio_ins: usize,
    pub audio_outs: usize,
    pub midi_ins: usize,
    pub midi_outs: usize,
}

impl PortCounts {
    pub fn from_ports(ports: &[PortInfo]) -> Self {
        let mut counts = Self::default();
        for port in ports {
            match (port.kind, port.direction) {
                (PortKind::Audio, PortDirection::Input) => counts.audio_ins += 1,
                (PortKind::Audio, PortDirection::Output) => counts.audio_outs += 1,
                (PortKind::Midi, PortDirection::Input) => counts.midi_ins += 1,
                (PortKind::Midi, PortDirection::Output) => counts.midi_outs += 1,
                _ => {}
            }
        }
        counts
    }

    /// Whether the dispatcher can wire every native audio port without allocating.
    pub fn fits_audio_limit(&self) -> bool {
        self.audio_ins <= MAX_AUDIO_PORTS && self.audio_outs <= MAX_AUDIO_PORTS
    }
}

/// Whether running two mono handles side by side can present a stereo plugin.
pub fn can_force_stereo(audio_ins: usize, audio_outs: usize) -> bool {
    audio_ins <= 2 && audio_outs <= 2 && (audio_ins == audio_outs || audio_ins == 0 || audio_outs == 0)
}

/// Generic post-processing capabilities implied by the host audio port counts.
pub fn derive_hints(audio_ins: usize, audio_outs: usize) -> PluginHints {
    let mut hints = PluginHints::empty();

    if audio_outs > 0 {
        hints.insert(PluginHints::CAN_VOLUME);
        if audio_ins == audio_outs || audio_ins == 1 {
            hints.insert(PluginHints::CAN_DRYWET);
        }
    }
    if audio_outs >= 2 && audio_outs % 2 == 0 {
        hints.insert(PluginHints::CAN_BALANCE);
    }
    hints
}

#[derive(Debug, Clone, Copy)]
pub struct LayoutParams {
    pub sample_rate: f32,
    pub max_parameters: usize,
    pub forced_stereo_in: bool,
    pub forced_stereo_out: bool,
}

/// Immutable per-reload view of a plugin's ports, parameters and programs.
#[derive(Debug, Clone, Default)]
pub struct PluginLayout {
    pub audio_in: Vec<HostPort>,
    pub audio_out: Vec<HostPort>,
    pub midi_in: Vec<HostPort>,
    pub midi_out: Vec<HostPort>,
    pub parameters: Vec<Parameter>,
    pub latency_index: Option<usize>,
    pub programs: Vec<String>,
    pub midi_programs: Vec<MidiProgram>,
    /// Native counts of each handle.
    pub native: PortCounts,
    pub forced_stereo_in: bool,
    pub forced_stereo_out: bool,
    pub broken_ports: usize,
}

impl PluginLayout {
    pub fn build(ports: &[PortInfo], params: LayoutParams) -> Self {
        let mut layout = Self {
            native: PortCounts::from_ports(ports),
            forced_stereo_in: params.forced_stereo_in,
            forced_stereo_out: params.forced_stereo_out,
            ..Self::default()
        };

        for port in ports {
            match port.kind {
                PortKind::Audio => layout.add_audio_port(port),
                PortKind::Midi => layout.add_midi_port(port),
                PortKind::Control => layout.add_parameter(port, &params),
                PortKind::Cv => {
                    tracing::warn!("CV port '{}' is not supported, leaving it unconnected", port.name);
                }
                PortKind::Unknown => {
                    tracing::warn!("Port '{}' has an unknown type, ignoring it", port.name);
                    layout.broken_ports += 1;
                }
            }
        }

        layout
    }

    fn add_audio_port(&mut self, port: &PortInfo) {
        let (list, forced) = match port.direction {
            PortDirection::Input => (&mut self.audio_in, self.forced_stereo_in),
            PortDirection::Output => (&mut self.audio_out, self.forced_stereo_out),
            PortDirection::Unknown => {
                tracing::warn!("Audio port '{}' is neither input nor output, ignoring it", port.name);
                self.broken_ports += 1;
                return;
            }
        };

        list.push(HostPort {
            name: port.name.clone(),
            rindex: port.index,
        });
        if forced {
            list.push(HostPort {
                name: format!("{}_2", port.name),
                rindex: port.index,
            });
        }
    }

    fn add_midi_port(&mut self, port: &PortInfo) {
        let host_port = HostPort {
            name: port.name.clone(),
            rindex: port.index,
        };
        match port.direction {
            PortDirection::Input => self.midi_in.push(host_port),
            PortDirection::Output => self.midi_out.push(host_port),
            PortDirection::Unknown => {
                tracing::warn!("MIDI port '{}' is neither input nor output, ignoring it", port.name);
                self.broken_ports += 1;
            }
        }
    }

    fn add_parameter(&mut self, port: &PortInfo, params: &LayoutParams) {
        if self.parameters.len() >= params.max_parameters {
            tracing::warn!(
                "Parameter limit of {} reached, skipping '{}'",
                params.max_parameters,
                port.name
            );
            return;
        }

        let control = port.control.clone().unwrap_or_else(|| {
            tracing::warn!("Control port '{}' has no range info, using 0..1", port.name);
            crate::adapter::ControlPortInfo::new(0.0, 1.0, 0.0)
        });

        let (name, unit) = match &control.unit {
            Some(unit) => (port.name.clone(), unit.clone()),
            None => split_name_and_unit(&port.name),
        };

        let mut ranges = control.ranges;
        ranges.repair(&port.name);

        let quantize = ParameterHints::BOOLEAN
            | ParameterHints::INTEGER
            | ParameterHints::LOGARITHMIC
            | ParameterHints::USES_SAMPLERATE
            | ParameterHints::USES_SCALEPOINTS;
        let mut hints = control.hints & quantize;
        let mut special = ParameterSpecial::None;

        let kind = match port.direction {
            PortDirection::Input => {
                hints.insert(ParameterHints::ENABLED);
                hints.set(
                    ParameterHints::AUTOMABLE,
                    control.hints.contains(ParameterHints::AUTOMABLE),
                );
                ParameterType::Input
            }
            PortDirection::Output => {
                hints.insert(ParameterHints::OUTPUT);
                if is_latency_port_name(&port.name) && self.latency_index.is_none() {
                    special = ParameterSpecial::Latency;
                    self.latency_index = Some(self.parameters.len());
                } else if port.name == SAMPLE_RATE_PORT_NAME {
                    special = ParameterSpecial::SampleRate;
                } else {
                    if is_latency_port_name(&port.name) {
                        tracing::warn!("Plugin has more than one latency port, treating '{}' as a plain output", port.name);
                    }
                    hints.insert(ParameterHints::ENABLED | ParameterHints::AUTOMABLE);
                }
                ParameterType::Output
            }
            PortDirection::Unknown => {
                tracing::warn!(
                    "Control port '{}' is neither input nor output, keeping it disabled",
                    port.name
                );
                self.broken_ports += 1;
                hints = ParameterHints::empty();
                ParameterType::Unknown
            }
        };

        let base_ranges = ranges;
        match special {
            ParameterSpecial::Latency | ParameterSpecial::SampleRate => {
                hints = ParameterHints::OUTPUT;
                ranges = ParameterRanges {
                    def: 0.0,
                    min: 0.0,
                    max: params.sample_rate,
                    step: 1.0,
                    step_small: 1.0,
                    step_large: 1.0,
                };
            }
            ParameterSpecial::None => {
                if hints.contains(ParameterHints::USES_SAMPLERATE) {
                    ranges = ranges.scaled(params.sample_rate);
                }
                ranges.derive_steps(hints);
            }
        }

        let index = self.parameters.len() as u32;
        self.parameters.push(Parameter {
            data: ParameterData {
                kind,
                special,
                hints,
                index,
                rindex: port.index,
                midi_channel: 0,
                midi_cc: None,
            },
            name,
            unit,
            ranges,
            base_ranges,
            scale_points: control.scale_points,
        });
    }

    pub fn audio_in_count(&self) -> usize {
        self.audio_in.len()
    }

    pub fn audio_out_count(&self) -> usize {
        self.audio_out.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Host index of the parameter wired to native port `rindex`.
    pub fn parameter_by_rindex(&self, rindex: u32) -> Option<usize> {
        self.parameters.iter().position(|p| p.data.rindex == rindex)
    }

    pub fn parameter_by_name(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    pub fn midi_program_index(&self, bank: u32, program: u32) -> Option<usize> {
        self.midi_programs
            .iter()
            .position(|p| p.bank == bank && p.program == program)
    }

    pub fn derived_hints(&self) -> PluginHints {
        derive_hints(self.audio_in.len(), self.audio_out.len())
    }

    pub fn default_values(&self) -> Vec<f32> {
        self.parameters.iter().map(|p| p.ranges.def).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ControlPortInfo;

    fn params(sample_rate: f32) -> LayoutParams {
        LayoutParams {
            sample_rate,
            max_parameters: 64,
            forced_stereo_in: false,
            forced_stereo_out: false,
        }
    }

    #[test]
    fn test_derive_hints() {
        let mono = derive_hints(1, 1);
        assert!(mono.contains(PluginHints::CAN_DRYWET | PluginHints::CAN_VOLUME));
        assert!(!mono.contains(PluginHints::CAN_BALANCE));

        let stereo = derive_hints(2, 2);
        assert!(stereo.contains(PluginHints::CAN_BALANCE));

        let mono_to_stereo = derive_hints(1, 2);
        assert!(mono_to_stereo.contains(PluginHints::CAN_DRYWET));

        let generator = derive_hints(0, 2);
        assert!(!generator.contains(PluginHints::CAN_DRYWET));
        assert!(generator.contains(PluginHints::CAN_VOLUME));

        assert!(derive_hints(2, 0).is_empty());
    }

    #[test]
    fn test_can_force_stereo() {
        assert!(can_force_stereo(1, 1));
        assert!(can_force_stereo(0, 1));
        assert!(can_force_stereo(1, 0));
        assert!(!can_force_stereo(1, 2));
        assert!(!can_force_stereo(3, 3));
    }

    #[test]
    fn test_forced_stereo_ports_share_rindex() {
        let ports = [PortInfo::audio_in(0, "In"), PortInfo::audio_out(1, "Out")];
        let layout = PluginLayout::build(
            &ports,
            LayoutParams {
                forced_stereo_in: true,
                forced_stereo_out: true,
                ..params(48000.0)
            },
        );
        assert_eq!(layout.audio_in_count(), 2);
        assert_eq!(layout.audio_in[0].rindex, layout.audio_in[1].rindex);
        assert_eq!(layout.audio_in[1].name, "In_2");
        assert_eq!(layout.audio_out_count(), 2);
        assert_eq!(layout.native.audio_ins, 1);
    }

    #[test]
    fn test_latency_port_is_special() {
        let ports = [
            PortInfo::control_in(0, "Gain [dB]", ControlPortInfo::new(-60.0, 12.0, 0.0)),
            PortInfo::control_out(1, "latency", ControlPortInfo::new(0.0, 0.0, 0.0)),
            PortInfo::control_out(2, "_latency", ControlPortInfo::new(0.0, 1.0, 0.0)),
            PortInfo::control_out(3, "Meter", ControlPortInfo::new(0.0, 1.0, 0.0)),
        ];
        let layout = PluginLayout::build(&ports, params(44100.0));

        assert_eq!(layout.latency_index, Some(1));
        let latency = &layout.parameters[1];
        assert_eq!(latency.data.special, ParameterSpecial::Latency);
        assert!(latency.is_output());
        assert!(!latency.data.hints.contains(ParameterHints::AUTOMABLE));
        assert_eq!(latency.ranges.max, 44100.0);

        let second = &layout.parameters[2];
        assert_eq!(second.data.special, ParameterSpecial::None);

        let gain = &layout.parameters[0];
        assert_eq!(gain.name, "Gain");
        assert_eq!(gain.unit, "dB");
        assert!(gain.is_automable_input());

        let meter = &layout.parameters[3];
        assert!(meter.data.hints.contains(
            ParameterHints::OUTPUT | ParameterHints::ENABLED | ParameterHints::AUTOMABLE
        ));
    }

    #[test]
    fn test_sample_rate_scaled_port() {
        let control = ControlPortInfo::new(0.0, 0.5, 0.1).hints(
            ParameterHints::ENABLED | ParameterHints::AUTOMABLE | ParameterHints::USES_SAMPLERATE,
        );
        let ports = [PortInfo::control_in(4, "Cutoff", control)];
        let layout = PluginLayout::build(&ports, params(48000.0));

        let cutoff = &layout.parameters[0];
        assert_eq!(cutoff.data.rindex, 4);
        assert_eq!(cutoff.ranges.max, 24000.0);
        assert!((cutoff.ranges.def - 4800.0).abs() < 0.01);
        assert_eq!(cutoff.base_ranges.max, 0.5);
    }

    #[test]
    fn test_broken_port_is_tolerated() {
        let mut odd = PortInfo::control_in(0, "Odd", ControlPortInfo::new(0.0, 1.0, 0.5));
        odd.direction = PortDirection::Unknown;
        let ports = [
            odd,
            PortInfo::new(1, "Mystery", PortKind::Unknown, PortDirection::Input),
            PortInfo::audio_out(2, "Out"),
        ];
        let layout = PluginLayout::build(&ports, params(48000.0));

        assert_eq!(layout.broken_ports, 2);
        assert_eq!(layout.parameters.len(), 1);
        assert_eq!(layout.parameters[0].data.kind, ParameterType::Unknown);
        assert!(!layout.parameters[0].data.hints.contains(ParameterHints::ENABLED));
        assert_eq!(layout.audio_out_count(), 1);
    }

    #[test]
    fn test_audio_port_limit() {
        let ports: Vec<_> = (0..=MAX_AUDIO_PORTS as u32)
            .map(|i| PortInfo::audio_in(i, format!("In {i}")))
            .collect();
        assert!(!PortCounts::from_ports(&ports).fits_audio_limit());
        assert!(PortCounts::from_ports(&ports[1..]).fits_audio_limit());
    }

    #[test]
    fn test_parameter_limit() {
        let ports: Vec<_> = (0..10)
            .map(|i| PortInfo::control_in(i, format!("P{i}"), ControlPortInfo::new(0.0, 1.0, 0.0)))
            .collect();
        let layout = PluginLayout::build(
            &ports,
            LayoutParams {
                max_parameters: 4,
                ..params(48000.0)
            },
        );
        assert_eq!(layout.parameter_count(), 4);
        assert_eq!(layout.parameter_by_rindex(3), Some(3));
        assert_eq!(layout.parameter_by_rindex(7), None);
    }
}
