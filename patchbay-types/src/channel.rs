use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ChannelId;

/// The closed set of channel variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    AudioInput,
    MidiInput,
    Playback,
    Aux,
    Master,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::AudioInput => "audio input",
            ChannelKind::MidiInput => "midi input",
            ChannelKind::Playback => "playback",
            ChannelKind::Aux => "aux",
            ChannelKind::Master => "master",
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        use Capability::*;
        match (self, capability) {
            (ChannelKind::Playback | ChannelKind::Aux, Pan) => false,
            (_, Pan) => true,
            (ChannelKind::Playback, PluginChain) => false,
            (_, PluginChain) => true,
            (ChannelKind::MidiInput, Instrument) => true,
            (_, Instrument) => false,
            (ChannelKind::Aux | ChannelKind::Master, AuxSends) => false,
            (_, AuxSends) => true,
            (ChannelKind::AudioInput | ChannelKind::MidiInput, InputDevice) => true,
            (_, InputDevice) => false,
            (ChannelKind::Playback, Transport) => true,
            (_, Transport) => false,
            (ChannelKind::Aux | ChannelKind::Master, ReceiveInputs) => true,
            (_, ReceiveInputs) => false,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional behaviours a channel variant may or may not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Pan,
    PluginChain,
    Instrument,
    AuxSends,
    InputDevice,
    Transport,
    ReceiveInputs,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Pan => "pan",
            Capability::PluginChain => "plugin chain",
            Capability::Instrument => "instrument plugins",
            Capability::AuxSends => "aux sends",
            Capability::InputDevice => "input device binding",
            Capability::Transport => "playback transport",
            Capability::ReceiveInputs => "incoming connections",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Audio,
    Midi,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Audio => f.write_str("audio"),
            DeviceKind::Midi => f.write_str("midi"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInputConfig {
    pub device_uid: String,
    pub input_bus: u32,
    #[serde(default = "unity")]
    pub monitoring_level: f32,
}

impl AudioInputConfig {
    pub fn new(device_uid: impl Into<String>, input_bus: u32) -> Self {
        Self {
            device_uid: device_uid.into(),
            input_bus,
            monitoring_level: 1.0,
        }
    }

    /// Key of the shared native input node this channel binds to.
    pub fn input_node_key(&self) -> String {
        format!("{}:{}", self.device_uid, self.input_bus)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiInputConfig {
    pub device_uid: String,
    /// MIDI channel 0-15; `None` listens on all channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_channel: Option<u8>,
}

impl MidiInputConfig {
    pub fn new(device_uid: impl Into<String>) -> Self {
        Self {
            device_uid: device_uid.into(),
            midi_channel: None,
        }
    }

    pub fn on_channel(mut self, channel: u8) -> Self {
        self.midi_channel = Some(channel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub file_path: PathBuf,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default)]
    pub auto_start: bool,
    /// Fade-in length in seconds.
    #[serde(default)]
    pub fade_in: f64,
    /// Fade-out length in seconds.
    #[serde(default)]
    pub fade_out: f64,
}

impl PlaybackConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            looping: false,
            auto_start: false,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxConfig {
    #[serde(default = "unity")]
    pub return_level: f32,
}

impl Default for AuxConfig {
    fn default() -> Self {
        Self { return_level: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub output_device_uid: String,
    #[serde(default)]
    pub limiter: bool,
    #[serde(default)]
    pub metering: bool,
}

/// Variant-specific half of a channel. Serialized inline with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelVariant {
    AudioInput(AudioInputConfig),
    MidiInput(MidiInputConfig),
    Playback(PlaybackConfig),
    Aux(AuxConfig),
    Master(MasterConfig),
}

impl ChannelVariant {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelVariant::AudioInput(_) => ChannelKind::AudioInput,
            ChannelVariant::MidiInput(_) => ChannelKind::MidiInput,
            ChannelVariant::Playback(_) => ChannelKind::Playback,
            ChannelVariant::Aux(_) => ChannelKind::Aux,
            ChannelVariant::Master(_) => ChannelKind::Master,
        }
    }

    /// The device this channel is bound to, if any.
    pub fn bound_device(&self) -> Option<(&str, DeviceKind)> {
        match self {
            ChannelVariant::AudioInput(c) => Some((&c.device_uid, DeviceKind::Audio)),
            ChannelVariant::MidiInput(c) => Some((&c.device_uid, DeviceKind::Midi)),
            ChannelVariant::Master(c) => Some((&c.output_device_uid, DeviceKind::Audio)),
            ChannelVariant::Playback(_) | ChannelVariant::Aux(_) => None,
        }
    }
}

/// Outbound routing from one channel's fader into another channel's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: ChannelId,
    pub target: ChannelId,
    pub source_bus: u32,
    pub target_bus: u32,
}

/// A parallel path from a sending channel into an aux channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxSend {
    pub target: ChannelId,
    pub level: f32,
    #[serde(default)]
    pub pre_fader: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
    /// Seek to a position in seconds.
    Seek(f64),
}

fn unity() -> f32 {
    1.0
}
