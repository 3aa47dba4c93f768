//! OSC messages exchanged between the host and an out-of-process UI.
//!
//! Every message is addressed `<path>/<name>`, where `path` is the receiver's
//! endpoint path. Arguments are checked against a fixed type signature per
//! name; anything else is a [`PluginError::ProtocolError`].

use crate::{PluginError, Result};
use rosc::{OscMessage, OscMidiMessage, OscPacket, OscType};

/// Largest datagram either side reads.
pub const MAX_PACKET_SIZE: usize = rosc::decoder::MTU;

/// UI to host.
#[derive(Debug, Clone, PartialEq)]
pub enum UiMessage {
    Configure { key: String, value: String },
    /// Negative indices address internal controls.
    Control { index: i32, value: f32 },
    Program { bank: i32, program: i32 },
    /// `[port, status, data1, data2]`
    Midi([u8; 4]),
    /// Handshake, carries the UI's own reply URL.
    Update { url: String },
    Exiting,
}

/// Host to UI.
#[derive(Debug, Clone, PartialEq)]
pub enum HostUiMessage {
    SampleRate(f32),
    Configure { key: String, value: String },
    Control { index: i32, value: f32 },
    Program { bank: i32, program: i32 },
    Midi([u8; 4]),
    Show,
    Hide,
    Quit,
}

impl UiMessage {
    pub fn name(&self) -> &'static str {
        match self {
            UiMessage::Configure { .. } => "configure",
            UiMessage::Control { .. } => "control",
            UiMessage::Program { .. } => "program",
            UiMessage::Midi(_) => "midi",
            UiMessage::Update { .. } => "update",
            UiMessage::Exiting => "exiting",
        }
    }

    fn args(&self) -> Vec<OscType> {
        match self {
            UiMessage::Configure { key, value } => {
                vec![OscType::String(key.clone()), OscType::String(value.clone())]
            }
            UiMessage::Control { index, value } => vec![OscType::Int(*index), OscType::Float(*value)],
            UiMessage::Program { bank, program } => vec![OscType::Int(*bank), OscType::Int(*program)],
            UiMessage::Midi(data) => vec![midi_arg(*data)],
            UiMessage::Update { url } => vec![OscType::String(url.clone())],
            UiMessage::Exiting => Vec::new(),
        }
    }

    pub fn encode(&self, path: &str) -> Result<Vec<u8>> {
        encode_message(path, self.name(), self.args())
    }

    pub fn decode(message: &OscMessage, path: &str) -> Result<Self> {
        let name = message_name(message, path)?;
        let args = message.args.as_slice();
        match name {
            "configure" => match args {
                [OscType::String(key), OscType::String(value)] => Ok(UiMessage::Configure {
                    key: key.clone(),
                    value: value.clone(),
                }),
                _ => Err(bad_signature(name, "ss", args)),
            },
            "control" => match args {
                [OscType::Int(_), OscType::Float(value)] if !value.is_finite() => Err(
                    PluginError::ProtocolError(format!("non-finite control value {value}")),
                ),
                [OscType::Int(index), OscType::Float(value)] => Ok(UiMessage::Control {
                    index: *index,
                    value: *value,
                }),
                _ => Err(bad_signature(name, "if", args)),
            },
            "program" => match args {
                [OscType::Int(bank), OscType::Int(program)] => Ok(UiMessage::Program {
                    bank: *bank,
                    program: *program,
                }),
                _ => Err(bad_signature(name, "ii", args)),
            },
            "midi" => match args {
                [OscType::Midi(midi)] => Ok(UiMessage::Midi(midi_data(midi))),
                _ => Err(bad_signature(name, "m", args)),
            },
            "update" => match args {
                [OscType::String(url)] => Ok(UiMessage::Update { url: url.clone() }),
                _ => Err(bad_signature(name, "s", args)),
            },
            "exiting" => match args {
                [] => Ok(UiMessage::Exiting),
                _ => Err(bad_signature(name, "", args)),
            },
            other => Err(PluginError::ProtocolError(format!("unknown UI message '{other}'"))),
        }
    }
}

impl HostUiMessage {
    pub fn name(&self) -> &'static str {
        match self {
            HostUiMessage::SampleRate(_) => "sample-rate",
            HostUiMessage::Configure { .. } => "configure",
            HostUiMessage::Control { .. } => "control",
            HostUiMessage::Program { .. } => "program",
            HostUiMessage::Midi(_) => "midi",
            HostUiMessage::Show => "show",
            HostUiMessage::Hide => "hide",
            HostUiMessage::Quit => "quit",
        }
    }

    fn args(&self) -> Vec<OscType> {
        match self {
            HostUiMessage::SampleRate(rate) => vec![OscType::Float(*rate)],
            HostUiMessage::Configure { key, value } => {
                vec![OscType::String(key.clone()), OscType::String(value.clone())]
            }
            HostUiMessage::Control { index, value } => vec![OscType::Int(*index), OscType::Float(*value)],
            HostUiMessage::Program { bank, program } => vec![OscType::Int(*bank), OscType::Int(*program)],
            HostUiMessage::Midi(data) => vec![midi_arg(*data)],
            HostUiMessage::Show | HostUiMessage::Hide | HostUiMessage::Quit => Vec::new(),
        }
    }

    pub fn encode(&self, path: &str) -> Result<Vec<u8>> {
        encode_message(path, self.name(), self.args())
    }

    pub fn decode(message: &OscMessage, path: &str) -> Result<Self> {
        let name = message_name(message, path)?;
        let args = message.args.as_slice();
        match name {
            "sample-rate" => match args {
                [OscType::Float(rate)] => Ok(HostUiMessage::SampleRate(*rate)),
                _ => Err(bad_signature(name, "f", args)),
            },
            "configure" => match args {
                [OscType::String(key), OscType::String(value)] => Ok(HostUiMessage::Configure {
                    key: key.clone(),
                    value: value.clone(),
                }),
                _ => Err(bad_signature(name, "ss", args)),
            },
            "control" => match args {
                [OscType::Int(index), OscType::Float(value)] => Ok(HostUiMessage::Control {
                    index: *index,
                    value: *value,
                }),
                _ => Err(bad_signature(name, "if", args)),
            },
            "program" => match args {
                [OscType::Int(bank), OscType::Int(program)] => Ok(HostUiMessage::Program {
                    bank: *bank,
                    program: *program,
                }),
                _ => Err(bad_signature(name, "ii", args)),
            },
            "midi" => match args {
                [OscType::Midi(midi)] => Ok(HostUiMessage::Midi(midi_data(midi))),
                _ => Err(bad_signature(name, "m", args)),
            },
            "show" | "hide" | "quit" if !args.is_empty() => Err(bad_signature(name, "", args)),
            "show" => Ok(HostUiMessage::Show),
            "hide" => Ok(HostUiMessage::Hide),
            "quit" => Ok(HostUiMessage::Quit),
            other => Err(PluginError::ProtocolError(format!("unknown host message '{other}'"))),
        }
    }
}

/// Decode one datagram into its messages. Bundles are flattened.
pub fn decode_packet(bytes: &[u8]) -> Result<Vec<OscMessage>> {
    let (_, packet) = rosc::decoder::decode_udp(bytes)
        .map_err(|err| PluginError::ProtocolError(format!("malformed OSC packet: {err:?}")))?;

    let mut messages = Vec::new();
    flatten(packet, &mut messages);
    Ok(messages)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(message) => out.push(message),
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                flatten(packet, out);
            }
        }
    }
}

fn encode_message(path: &str, name: &str, args: Vec<OscType>) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: format!("{}/{}", path.trim_end_matches('/'), name),
        args,
    });
    rosc::encoder::encode(&packet)
        .map_err(|err| PluginError::ProtocolError(format!("failed to encode '{name}': {err:?}")))
}

/// The message name below `path`, or an error if addressed elsewhere.
fn message_name<'a>(message: &'a OscMessage, path: &str) -> Result<&'a str> {
    let path = path.trim_end_matches('/');
    message
        .addr
        .strip_prefix(path)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| {
            PluginError::ProtocolError(format!(
                "message '{}' is not addressed to '{}'",
                message.addr, path
            ))
        })
}

fn bad_signature(name: &str, expected: &str, args: &[OscType]) -> PluginError {
    PluginError::ProtocolError(format!(
        "'{}' expects signature '{}', got '{}'",
        name,
        expected,
        signature(args)
    ))
}

/// OSC type tags of `args`, e.g. `"if"`.
pub fn signature(args: &[OscType]) -> String {
    args.iter()
        .map(|arg| match arg {
            OscType::Int(_) => 'i',
            OscType::Float(_) => 'f',
            OscType::String(_) => 's',
            OscType::Blob(_) => 'b',
            OscType::Time(_) => 't',
            OscType::Long(_) => 'h',
            OscType::Double(_) => 'd',
            OscType::Char(_) => 'c',
            OscType::Color(_) => 'r',
            OscType::Midi(_) => 'm',
            OscType::Bool(true) => 'T',
            OscType::Bool(false) => 'F',
            OscType::Array(_) => '[',
            OscType::Nil => 'N',
            OscType::Inf => 'I',
            #[allow(unreachable_patterns)]
            _ => '?',
        })
        .collect()
}

fn midi_arg(data: [u8; 4]) -> OscType {
    OscType::Midi(OscMidiMessage {
        port: data[0],
        status: data[1],
        data1: data[2],
        data2: data[3],
    })
}

fn midi_data(midi: &OscMidiMessage) -> [u8; 4] {
    [midi.port, midi.status, midi.data1, midi.data2]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_ui(message: UiMessage) -> UiMessage {
        let bytes = message.encode("/consort/3").unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        UiMessage::decode(&decoded[0], "/consort/3").unwrap()
    }

    #[test]
    fn test_ui_messages_survive_the_wire() {
        let control = UiMessage::Control { index: 4, value: 0.25 };
        assert_eq!(roundtrip_ui(control.clone()), control);

        let midi = UiMessage::Midi([0, 0x90, 60, 100]);
        assert_eq!(roundtrip_ui(midi.clone()), midi);

        assert_eq!(roundtrip_ui(UiMessage::Exiting), UiMessage::Exiting);
    }

    #[test]
    fn test_address_must_match_path() {
        let bytes = UiMessage::Exiting.encode("/consort/3").unwrap();
        let message = &decode_packet(&bytes).unwrap()[0];
        assert_eq!(message.addr, "/consort/3/exiting");
        assert!(UiMessage::decode(message, "/consort/4").is_err());
        assert!(UiMessage::decode(message, "/consort/3/").is_ok());
    }

    #[test]
    fn test_signature_mismatch_is_rejected() {
        let message = OscMessage {
            addr: "/consort/1/control".into(),
            args: vec![OscType::Float(1.0), OscType::Float(0.5)],
        };
        let err = UiMessage::decode(&message, "/consort/1").unwrap_err();
        assert!(err.to_string().contains("'if'"));
        assert!(err.to_string().contains("'ff'"));

        let message = OscMessage {
            addr: "/consort/1/exiting".into(),
            args: vec![OscType::Int(1)],
        };
        assert!(UiMessage::decode(&message, "/consort/1").is_err());
    }

    #[test]
    fn test_non_finite_control_is_rejected() {
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let message = OscMessage {
                addr: "/consort/1/control".into(),
                args: vec![OscType::Int(0), OscType::Float(value)],
            };
            assert!(matches!(
                UiMessage::decode(&message, "/consort/1"),
                Err(PluginError::ProtocolError(_))
            ));
        }
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let message = OscMessage {
            addr: "/consort/1/resize".into(),
            args: vec![],
        };
        assert!(matches!(
            UiMessage::decode(&message, "/consort/1"),
            Err(PluginError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_host_messages_decode() {
        let bytes = HostUiMessage::SampleRate(48000.0).encode("/ui").unwrap();
        let message = &decode_packet(&bytes).unwrap()[0];
        assert_eq!(message.addr, "/ui/sample-rate");
        assert_eq!(
            HostUiMessage::decode(message, "/ui").unwrap(),
            HostUiMessage::SampleRate(48000.0)
        );

        let bytes = HostUiMessage::Quit.encode("/ui").unwrap();
        let message = &decode_packet(&bytes).unwrap()[0];
        assert_eq!(HostUiMessage::decode(message, "/ui").unwrap(), HostUiMessage::Quit);
    }

    #[test]
    fn test_garbage_packet() {
        assert!(decode_packet(&[0xFF, 0x00, 0x13]).is_err());
    }
}
