use std::sync::mpsc::Sender;
use std::time::Instant;

use patchbay_types::{
    BufferSize, ChannelId, ChannelVariant, PluginBlueprint, PluginInstanceId, TransportCommand,
};

use crate::error::EngineError;
use crate::persistence::EngineDocument;

/// A structural change, executed by the dispatcher worker.
#[derive(Debug)]
pub(crate) enum Operation {
    Start,
    Stop,
    CreateChannel {
        name: Option<String>,
        variant: ChannelVariant,
    },
    RemoveChannel(ChannelId),
    RenameChannel {
        channel: ChannelId,
        name: String,
    },
    Connect {
        source: ChannelId,
        target: ChannelId,
    },
    Disconnect {
        source: ChannelId,
        target: ChannelId,
    },
    AddSend {
        source: ChannelId,
        target: ChannelId,
        level: f32,
        pre_fader: bool,
    },
    RemoveSend {
        source: ChannelId,
        target: ChannelId,
    },
    SetMute {
        channel: ChannelId,
        muted: bool,
    },
    AddPlugin {
        channel: ChannelId,
        blueprint: PluginBlueprint,
        position: Option<usize>,
    },
    RemovePlugin {
        channel: ChannelId,
        plugin: PluginInstanceId,
    },
    MovePlugin {
        channel: ChannelId,
        plugin: PluginInstanceId,
        position: usize,
    },
    SetPluginBypass {
        channel: ChannelId,
        plugin: PluginInstanceId,
        bypassed: bool,
    },
    ChangeInputDevice {
        channel: ChannelId,
        uid: String,
    },
    ChangeOutputDevice(String),
    SetBufferSize(BufferSize),
    Transport {
        channel: ChannelId,
        command: TransportCommand,
    },
    SetMasterOptions {
        limiter: bool,
        metering: bool,
    },
    Restore(Box<EngineDocument>),
    Shutdown,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Start => "start engine",
            Operation::Stop => "stop engine",
            Operation::CreateChannel { .. } => "create channel",
            Operation::RemoveChannel(_) => "remove channel",
            Operation::RenameChannel { .. } => "rename channel",
            Operation::Connect { .. } => "connect channels",
            Operation::Disconnect { .. } => "disconnect channels",
            Operation::AddSend { .. } => "add aux send",
            Operation::RemoveSend { .. } => "remove aux send",
            Operation::SetMute { .. } => "set mute",
            Operation::AddPlugin { .. } => "add plugin",
            Operation::RemovePlugin { .. } => "remove plugin",
            Operation::MovePlugin { .. } => "move plugin",
            Operation::SetPluginBypass { .. } => "set plugin bypass",
            Operation::ChangeInputDevice { .. } => "change input device",
            Operation::ChangeOutputDevice(_) => "change output device",
            Operation::SetBufferSize(_) => "set buffer size",
            Operation::Transport { .. } => "playback transport",
            Operation::SetMasterOptions { .. } => "set master options",
            Operation::Restore(_) => "restore state",
            Operation::Shutdown => "shutdown",
        }
    }
}

/// What a successful operation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpOutput {
    Done,
    Channel(ChannelId),
    Plugin(PluginInstanceId),
}

pub(crate) type OpResult = Result<OpOutput, EngineError>;

/// An operation in the queue with its one-shot reply slot.
pub(crate) struct Envelope {
    pub op: Operation,
    pub reply: Sender<OpResult>,
    pub submitted: Instant,
}
