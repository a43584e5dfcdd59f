//! The native nodes behind one channel.
//!
//! ```text
//! [input mixer] ──> [unit 0] ──> ... ──> [unit n] ──> [fader mixer] ──> connections / post-fader sends
//!       └──> pre-fader sends
//! ```
//!
//! Playback strips also own a file player feeding bus 0 of the input mixer.
//! The input mixer is the pre-fader summing point: hardware inputs and other
//! channels' connections land on its buses. The fader carries volume and pan.
//! Muting breaks the link into the fader, so everything downstream of it goes
//! silent without touching the volume.

use patchbay_audio::{AudioFormat, NativeEngine, NativeResult, NodeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strip {
    pub input: NodeHandle,
    pub fader: NodeHandle,
    pub player: Option<NodeHandle>,
    /// False for the master, whose fader is the native main mixer.
    owns_fader: bool,
}

impl Strip {
    /// Allocate both mixers. Nothing is connected yet.
    pub fn allocate(native: &dyn NativeEngine) -> NativeResult<Self> {
        let input = native.create_mixer_node()?;
        let fader = match native.create_mixer_node() {
            Ok(node) => node,
            Err(e) => {
                release_logged(native, input);
                return Err(e);
            }
        };
        Ok(Self {
            input,
            fader,
            player: None,
            owns_fader: true,
        })
    }

    pub fn with_player(self, player: NodeHandle) -> Self {
        Self {
            player: Some(player),
            ..self
        }
    }

    /// The master strip: its own input mixer feeding the engine's main mixer.
    pub fn master(native: &dyn NativeEngine) -> NativeResult<Self> {
        let fader = native.main_mixer_node()?;
        let input = native.create_mixer_node()?;
        Ok(Self {
            input,
            fader,
            player: None,
            owns_fader: false,
        })
    }

    /// Tap point for a send.
    pub fn tap(&self, pre_fader: bool) -> NodeHandle {
        if pre_fader {
            self.input
        } else {
            self.fader
        }
    }

    /// Connect `input → units → fader`, leaving the last link open when muted.
    pub fn wire(
        &self,
        native: &dyn NativeEngine,
        units: &[NodeHandle],
        muted: bool,
        format: AudioFormat,
    ) -> NativeResult {
        let mut previous = self.input;
        for &unit in units {
            native.connect(previous, 0, unit, 0, Some(format))?;
            previous = unit;
        }
        if !muted {
            native.connect(previous, 0, self.fader, 0, Some(format))?;
        }
        Ok(())
    }

    /// Replace the unit chain `old` with `new`.
    pub fn rewire(
        &self,
        native: &dyn NativeEngine,
        old: &[NodeHandle],
        new: &[NodeHandle],
        muted: bool,
        format: AudioFormat,
    ) -> NativeResult {
        for &unit in old {
            native.disconnect_node_input(unit, 0)?;
        }
        native.disconnect_node_input(self.fader, 0)?;
        self.wire(native, new, muted, format)
    }

    /// Open or close the link into the fader.
    pub fn set_muted(
        &self,
        native: &dyn NativeEngine,
        units: &[NodeHandle],
        muted: bool,
        format: AudioFormat,
    ) -> NativeResult {
        if muted {
            native.disconnect_node_input(self.fader, 0)
        } else {
            let last = units.last().copied().unwrap_or(self.input);
            native.connect(last, 0, self.fader, 0, Some(format))
        }
    }

    /// Release the nodes this strip allocated. Failures are logged; teardown always completes.
    pub fn release(&self, native: &dyn NativeEngine) {
        if let Some(player) = self.player {
            release_logged(native, player);
        }
        if self.owns_fader {
            release_logged(native, self.fader);
        } else if let Err(e) = native.disconnect_node_input(self.fader, 0) {
            log::warn!(target: "native", "{}", e);
        }
        release_logged(native, self.input);
    }
}

pub(crate) fn release_logged(native: &dyn NativeEngine, node: NodeHandle) {
    if let Err(e) = native.release_node(node) {
        log::warn!(target: "native", "releasing {}: {}", node, e);
    }
}
