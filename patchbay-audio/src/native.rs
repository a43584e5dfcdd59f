//! Native engine trait: a semantic-level abstraction over the render engine's node graph.
//!
//! `NativeEngine` captures what the control plane *means* to do (create a mixer,
//! connect two nodes on given buses, start rendering) independently of the
//! framework binding that does it. This enables testing of routing logic
//! without audio hardware.
//!
//! Structural calls (node lifecycle, connect/disconnect, buffer and device
//! configuration, prepare/start/stop) are only ever made from the dispatcher's
//! worker thread. Mixer volume/pan and unit parameter setters are real-time safe
//! and may be called from any thread.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use patchbay_types::PluginBlueprint;

/// Result type for native engine calls.
pub type NativeResult<T = ()> = Result<T, NativeError>;

/// Error from a native engine call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{call}: {message}")]
pub struct NativeError {
    pub call: &'static str,
    pub message: String,
}

impl NativeError {
    pub fn new(call: &'static str, message: impl Into<String>) -> Self {
        Self {
            call,
            message: message.into(),
        }
    }
}

/// Opaque handle to a node owned by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Stream format passed explicitly on every connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub channels: u32,
}

impl AudioFormat {
    pub fn stereo(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }
}

/// Semantic-level render engine trait.
pub trait NativeEngine: Send + Sync {
    /// The engine's hardware input node.
    fn input_node(&self) -> NativeResult<NodeHandle>;

    /// The engine's main mixer, which feeds the output node.
    fn main_mixer_node(&self) -> NativeResult<NodeHandle>;

    /// The engine's hardware output node.
    fn output_node(&self) -> NativeResult<NodeHandle>;

    /// Create and attach a new mixer node.
    fn create_mixer_node(&self) -> NativeResult<NodeHandle>;

    /// Instantiate and attach a plugin unit. Fails when the plugin is not installed.
    fn instantiate_unit(&self, blueprint: &PluginBlueprint) -> NativeResult<NodeHandle>;

    /// Detach and release a node created by this engine.
    fn release_node(&self, node: NodeHandle) -> NativeResult;

    /// Create and attach a file player node for `file`. It starts paused.
    fn create_player_node(&self, file: &Path) -> NativeResult<NodeHandle>;

    /// Start `player` from `position` seconds into its file.
    fn play_player(&self, player: NodeHandle, position: f64) -> NativeResult;

    fn pause_player(&self, player: NodeHandle) -> NativeResult;

    /// Connect `source`'s output bus to `target`'s input bus. Connecting to an
    /// occupied input bus replaces the previous connection.
    fn connect(
        &self,
        source: NodeHandle,
        source_bus: u32,
        target: NodeHandle,
        target_bus: u32,
        format: Option<AudioFormat>,
    ) -> NativeResult;

    /// Break whatever connection feeds `node`'s input `bus`.
    fn disconnect_node_input(&self, node: NodeHandle, bus: u32) -> NativeResult;

    fn set_buffer_size(&self, frames: u32) -> NativeResult;

    fn set_output_device(&self, uid: &str) -> NativeResult;

    fn prepare(&self) -> NativeResult;

    fn start(&self) -> NativeResult;

    fn stop(&self) -> NativeResult;

    fn is_running(&self) -> bool;

    fn set_mixer_volume(&self, node: NodeHandle, volume: f32) -> NativeResult;

    fn mixer_volume(&self, node: NodeHandle) -> NativeResult<f32>;

    fn set_mixer_pan(&self, node: NodeHandle, pan: f32) -> NativeResult;

    fn set_unit_parameter(&self, unit: NodeHandle, address: u64, value: f32) -> NativeResult;

    /// Cumulative count of render buffer underruns.
    fn underrun_count(&self) -> u64 {
        0
    }

    /// Whether the output device can be switched while rendering.
    fn supports_live_output_switch(&self) -> bool {
        false
    }

    /// Release every native resource. Called exactly once by the owning engine.
    fn destroy(&self);
}

// ─── Test Engine ────────────────────────────────────────────────────

/// A call recorded by `TestEngine` for assertion in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOp {
    CreateMixer(NodeHandle),
    InstantiateUnit {
        node: NodeHandle,
        plugin: String,
    },
    ReleaseNode(NodeHandle),
    CreatePlayer {
        node: NodeHandle,
        file: PathBuf,
    },
    PlayPlayer {
        node: NodeHandle,
        position: f64,
    },
    PausePlayer(NodeHandle),
    Connect {
        source: NodeHandle,
        source_bus: u32,
        target: NodeHandle,
        target_bus: u32,
    },
    Disconnect {
        node: NodeHandle,
        bus: u32,
    },
    SetBufferSize(u32),
    SetOutputDevice(String),
    Prepare,
    Start,
    Stop,
    SetVolume {
        node: NodeHandle,
        volume: f32,
    },
    SetPan {
        node: NodeHandle,
        pan: f32,
    },
    SetParameter {
        unit: NodeHandle,
        address: u64,
        value: f32,
    },
    Destroy,
}

impl NativeOp {
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            NativeOp::SetVolume { .. }
                | NativeOp::SetPan { .. }
                | NativeOp::SetParameter { .. }
                | NativeOp::PlayPlayer { .. }
                | NativeOp::PausePlayer(_)
        )
    }
}

/// Call kinds that can be made to fail (or panic) on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeCall {
    CreateMixer,
    InstantiateUnit,
    ReleaseNode,
    CreatePlayer,
    PlayPlayer,
    PausePlayer,
    Connect,
    Disconnect,
    SetBufferSize,
    SetOutputDevice,
    Prepare,
    Start,
    Stop,
    SetVolume,
    SetPan,
    SetParameter,
}

impl NativeCall {
    fn name(self) -> &'static str {
        match self {
            NativeCall::CreateMixer => "create_mixer_node",
            NativeCall::InstantiateUnit => "instantiate_unit",
            NativeCall::ReleaseNode => "release_node",
            NativeCall::CreatePlayer => "create_player_node",
            NativeCall::PlayPlayer => "play_player",
            NativeCall::PausePlayer => "pause_player",
            NativeCall::Connect => "connect",
            NativeCall::Disconnect => "disconnect_node_input",
            NativeCall::SetBufferSize => "set_buffer_size",
            NativeCall::SetOutputDevice => "set_output_device",
            NativeCall::Prepare => "prepare",
            NativeCall::Start => "start",
            NativeCall::Stop => "stop",
            NativeCall::SetVolume => "set_mixer_volume",
            NativeCall::SetPan => "set_mixer_pan",
            NativeCall::SetParameter => "set_unit_parameter",
        }
    }
}

/// A live connection in the `TestEngine` graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub source: NodeHandle,
    pub source_bus: u32,
    pub target: NodeHandle,
    pub target_bus: u32,
}

/// A test engine that records every call and keeps a model of the live graph.
/// All calls succeed unless a failure is injected. Tracks how many structural
/// calls are in flight at once so tests can assert they never overlap.
pub struct TestEngine {
    ops: Mutex<Vec<NativeOp>>,
    links: Mutex<Vec<Link>>,
    volumes: Mutex<HashMap<NodeHandle, f32>>,
    playing: Mutex<HashMap<NodeHandle, bool>>,
    failures: Mutex<HashMap<NativeCall, Injected>>,
    panics: Mutex<HashSet<NativeCall>>,
    missing_plugins: Mutex<HashSet<String>>,
    output_device: Mutex<Option<String>>,
    structural_delay: Mutex<Duration>,
    next_node: AtomicU64,
    running: AtomicBool,
    live_output_switch: AtomicBool,
    underruns: AtomicU64,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    destroy_calls: AtomicUsize,
}

impl TestEngine {
    pub const INPUT_NODE: NodeHandle = NodeHandle(1);
    pub const MAIN_MIXER: NodeHandle = NodeHandle(2);
    pub const OUTPUT_NODE: NodeHandle = NodeHandle(3);

    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            volumes: Mutex::new(HashMap::new()),
            playing: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            missing_plugins: Mutex::new(HashSet::new()),
            output_device: Mutex::new(None),
            structural_delay: Mutex::new(Duration::ZERO),
            next_node: AtomicU64::new(100),
            running: AtomicBool::new(false),
            live_output_switch: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    /// Return all recorded operations.
    pub fn operations(&self) -> Vec<NativeOp> {
        self.ops.lock().clone()
    }

    /// Clear recorded operations. The live graph model is kept.
    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    /// Count operations matching a predicate.
    pub fn count<F: Fn(&NativeOp) -> bool>(&self, f: F) -> usize {
        self.ops.lock().iter().filter(|op| f(op)).count()
    }

    /// Find the first operation matching a predicate.
    pub fn find<F: Fn(&NativeOp) -> bool>(&self, f: F) -> Option<NativeOp> {
        self.ops.lock().iter().find(|op| f(op)).cloned()
    }

    /// Currently live connections.
    pub fn links(&self) -> Vec<Link> {
        self.links.lock().clone()
    }

    /// Whether any live connection runs from `source` to `target`.
    pub fn is_linked(&self, source: NodeHandle, target: NodeHandle) -> bool {
        self.links
            .lock()
            .iter()
            .any(|l| l.source == source && l.target == target)
    }

    /// The node feeding `target`'s input `bus`, if any.
    pub fn feeding(&self, target: NodeHandle, bus: u32) -> Option<NodeHandle> {
        self.links
            .lock()
            .iter()
            .find(|l| l.target == target && l.target_bus == bus)
            .map(|l| l.source)
    }

    pub fn volume(&self, node: NodeHandle) -> Option<f32> {
        self.volumes.lock().get(&node).copied()
    }

    /// Whether `player` exists and is playing.
    pub fn is_playing(&self, player: NodeHandle) -> bool {
        self.playing.lock().get(&player).copied().unwrap_or(false)
    }

    /// Every player node still attached.
    pub fn players(&self) -> Vec<NodeHandle> {
        let mut players: Vec<NodeHandle> = self.playing.lock().keys().copied().collect();
        players.sort();
        players
    }

    /// Make the next `times` calls of `call` fail.
    pub fn fail_next(&self, call: NativeCall, times: usize) {
        self.fail_after(call, 0, times);
    }

    /// Let `skip` calls of `call` through, then fail the `times` after them.
    pub fn fail_after(&self, call: NativeCall, skip: usize, times: usize) {
        self.failures.lock().insert(
            call,
            Injected {
                skip,
                remaining: times,
            },
        );
    }

    /// Make every call of `call` panic until `clear_panics`.
    pub fn panic_on(&self, call: NativeCall) {
        self.panics.lock().insert(call);
    }

    pub fn clear_panics(&self) {
        self.panics.lock().clear();
    }

    /// Simulate a plugin missing from this machine: instantiation by name fails.
    pub fn remove_plugin(&self, name: &str) {
        self.missing_plugins.lock().insert(name.to_string());
    }

    /// Sleep inside every structural call, widening any overlap window.
    pub fn set_structural_delay(&self, delay: Duration) {
        *self.structural_delay.lock() = delay;
    }

    pub fn set_live_output_switch(&self, supported: bool) {
        self.live_output_switch.store(supported, Ordering::SeqCst);
    }

    pub fn inject_underruns(&self, count: u64) {
        self.underruns.fetch_add(count, Ordering::SeqCst);
    }

    /// Whether two structural calls were ever in flight at the same time.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn output_device(&self) -> Option<String> {
        self.output_device.lock().clone()
    }

    fn record(&self, op: NativeOp) {
        self.ops.lock().push(op);
    }

    fn check(&self, call: NativeCall) -> NativeResult {
        if self.panics.lock().contains(&call) {
            panic!("injected panic in {}", call.name());
        }
        let mut failures = self.failures.lock();
        if let Some(injected) = failures.get_mut(&call) {
            if injected.skip > 0 {
                injected.skip -= 1;
            } else if injected.remaining > 0 {
                injected.remaining -= 1;
                return Err(NativeError::new(call.name(), "injected failure"));
            }
        }
        Ok(())
    }

    fn structural(&self, call: NativeCall) -> NativeResult<InFlight<'_>> {
        let guard = InFlight::enter(&self.in_flight, &self.overlapped);
        let delay = *self.structural_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.check(call)?;
        Ok(guard)
    }

    fn allocate_node(&self) -> NodeHandle {
        NodeHandle(self.next_node.fetch_add(1, Ordering::SeqCst))
    }
}

struct Injected {
    skip: usize,
    remaining: usize,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, overlapped: &AtomicBool) -> Self {
        if counter.fetch_add(1, Ordering::SeqCst) > 0 {
            overlapped.store(true, Ordering::SeqCst);
        }
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeEngine for TestEngine {
    fn input_node(&self) -> NativeResult<NodeHandle> {
        Ok(Self::INPUT_NODE)
    }

    fn main_mixer_node(&self) -> NativeResult<NodeHandle> {
        Ok(Self::MAIN_MIXER)
    }

    fn output_node(&self) -> NativeResult<NodeHandle> {
        Ok(Self::OUTPUT_NODE)
    }

    fn create_mixer_node(&self) -> NativeResult<NodeHandle> {
        let _guard = self.structural(NativeCall::CreateMixer)?;
        let node = self.allocate_node();
        self.volumes.lock().insert(node, 1.0);
        self.record(NativeOp::CreateMixer(node));
        Ok(node)
    }

    fn instantiate_unit(&self, blueprint: &PluginBlueprint) -> NativeResult<NodeHandle> {
        let _guard = self.structural(NativeCall::InstantiateUnit)?;
        if self.missing_plugins.lock().contains(&blueprint.name) {
            return Err(NativeError::new(
                "instantiate_unit",
                format!("component {blueprint} not found"),
            ));
        }
        let node = self.allocate_node();
        self.record(NativeOp::InstantiateUnit {
            node,
            plugin: blueprint.name.clone(),
        });
        Ok(node)
    }

    fn release_node(&self, node: NodeHandle) -> NativeResult {
        let _guard = self.structural(NativeCall::ReleaseNode)?;
        self.links
            .lock()
            .retain(|l| l.source != node && l.target != node);
        self.volumes.lock().remove(&node);
        self.playing.lock().remove(&node);
        self.record(NativeOp::ReleaseNode(node));
        Ok(())
    }

    fn create_player_node(&self, file: &Path) -> NativeResult<NodeHandle> {
        let _guard = self.structural(NativeCall::CreatePlayer)?;
        let node = self.allocate_node();
        self.playing.lock().insert(node, false);
        self.record(NativeOp::CreatePlayer {
            node,
            file: file.to_path_buf(),
        });
        Ok(node)
    }

    fn play_player(&self, player: NodeHandle, position: f64) -> NativeResult {
        self.check(NativeCall::PlayPlayer)?;
        match self.playing.lock().get_mut(&player) {
            Some(playing) => *playing = true,
            None => return Err(NativeError::new("play_player", format!("{player} is not a player"))),
        }
        self.record(NativeOp::PlayPlayer {
            node: player,
            position,
        });
        Ok(())
    }

    fn pause_player(&self, player: NodeHandle) -> NativeResult {
        self.check(NativeCall::PausePlayer)?;
        match self.playing.lock().get_mut(&player) {
            Some(playing) => *playing = false,
            None => return Err(NativeError::new("pause_player", format!("{player} is not a player"))),
        }
        self.record(NativeOp::PausePlayer(player));
        Ok(())
    }

    fn connect(
        &self,
        source: NodeHandle,
        source_bus: u32,
        target: NodeHandle,
        target_bus: u32,
        _format: Option<AudioFormat>,
    ) -> NativeResult {
        let _guard = self.structural(NativeCall::Connect)?;
        let mut links = self.links.lock();
        links.retain(|l| !(l.target == target && l.target_bus == target_bus));
        links.push(Link {
            source,
            source_bus,
            target,
            target_bus,
        });
        drop(links);
        self.record(NativeOp::Connect {
            source,
            source_bus,
            target,
            target_bus,
        });
        Ok(())
    }

    fn disconnect_node_input(&self, node: NodeHandle, bus: u32) -> NativeResult {
        let _guard = self.structural(NativeCall::Disconnect)?;
        self.links
            .lock()
            .retain(|l| !(l.target == node && l.target_bus == bus));
        self.record(NativeOp::Disconnect { node, bus });
        Ok(())
    }

    fn set_buffer_size(&self, frames: u32) -> NativeResult {
        let _guard = self.structural(NativeCall::SetBufferSize)?;
        self.record(NativeOp::SetBufferSize(frames));
        Ok(())
    }

    fn set_output_device(&self, uid: &str) -> NativeResult {
        let _guard = self.structural(NativeCall::SetOutputDevice)?;
        *self.output_device.lock() = Some(uid.to_string());
        self.record(NativeOp::SetOutputDevice(uid.to_string()));
        Ok(())
    }

    fn prepare(&self) -> NativeResult {
        let _guard = self.structural(NativeCall::Prepare)?;
        self.record(NativeOp::Prepare);
        Ok(())
    }

    fn start(&self) -> NativeResult {
        let _guard = self.structural(NativeCall::Start)?;
        self.running.store(true, Ordering::SeqCst);
        self.record(NativeOp::Start);
        Ok(())
    }

    fn stop(&self) -> NativeResult {
        let _guard = self.structural(NativeCall::Stop)?;
        self.running.store(false, Ordering::SeqCst);
        self.record(NativeOp::Stop);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_mixer_volume(&self, node: NodeHandle, volume: f32) -> NativeResult {
        self.check(NativeCall::SetVolume)?;
        self.volumes.lock().insert(node, volume);
        self.record(NativeOp::SetVolume { node, volume });
        Ok(())
    }

    fn mixer_volume(&self, node: NodeHandle) -> NativeResult<f32> {
        self.volumes
            .lock()
            .get(&node)
            .copied()
            .ok_or_else(|| NativeError::new("mixer_volume", format!("{node} is not a mixer")))
    }

    fn set_mixer_pan(&self, node: NodeHandle, pan: f32) -> NativeResult {
        self.check(NativeCall::SetPan)?;
        self.record(NativeOp::SetPan { node, pan });
        Ok(())
    }

    fn set_unit_parameter(&self, unit: NodeHandle, address: u64, value: f32) -> NativeResult {
        self.check(NativeCall::SetParameter)?;
        self.record(NativeOp::SetParameter {
            unit,
            address,
            value,
        });
        Ok(())
    }

    fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::SeqCst)
    }

    fn supports_live_output_switch(&self) -> bool {
        self.live_output_switch.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.links.lock().clear();
        self.playing.lock().clear();
        self.record(NativeOp::Destroy);
    }
}

// ─── NullEngine ─────────────────────────────────────────────────────

/// A no-op engine that silently succeeds. Useful as a default when no
/// render engine is attached.
pub struct NullEngine {
    next_node: AtomicU64,
    running: AtomicBool,
}

impl NullEngine {
    pub fn new() -> Self {
        Self {
            next_node: AtomicU64::new(100),
            running: AtomicBool::new(false),
        }
    }

    fn allocate(&self) -> NativeResult<NodeHandle> {
        Ok(NodeHandle(self.next_node.fetch_add(1, Ordering::Relaxed)))
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for NullEngine {
    fn input_node(&self) -> NativeResult<NodeHandle> { Ok(NodeHandle(1)) }
    fn main_mixer_node(&self) -> NativeResult<NodeHandle> { Ok(NodeHandle(2)) }
    fn output_node(&self) -> NativeResult<NodeHandle> { Ok(NodeHandle(3)) }
    fn create_mixer_node(&self) -> NativeResult<NodeHandle> { self.allocate() }
    fn instantiate_unit(&self, _: &PluginBlueprint) -> NativeResult<NodeHandle> { self.allocate() }
    fn release_node(&self, _: NodeHandle) -> NativeResult { Ok(()) }
    fn create_player_node(&self, _: &Path) -> NativeResult<NodeHandle> { self.allocate() }
    fn play_player(&self, _: NodeHandle, _: f64) -> NativeResult { Ok(()) }
    fn pause_player(&self, _: NodeHandle) -> NativeResult { Ok(()) }
    fn connect(&self, _: NodeHandle, _: u32, _: NodeHandle, _: u32, _: Option<AudioFormat>) -> NativeResult { Ok(()) }
    fn disconnect_node_input(&self, _: NodeHandle, _: u32) -> NativeResult { Ok(()) }
    fn set_buffer_size(&self, _: u32) -> NativeResult { Ok(()) }
    fn set_output_device(&self, _: &str) -> NativeResult { Ok(()) }
    fn prepare(&self) -> NativeResult { Ok(()) }
    fn start(&self) -> NativeResult {
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }
    fn stop(&self) -> NativeResult {
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }
    fn is_running(&self) -> bool { self.running.load(Ordering::Relaxed) }
    fn set_mixer_volume(&self, _: NodeHandle, _: f32) -> NativeResult { Ok(()) }
    fn mixer_volume(&self, _: NodeHandle) -> NativeResult<f32> { Ok(1.0) }
    fn set_mixer_pan(&self, _: NodeHandle, _: f32) -> NativeResult { Ok(()) }
    fn set_unit_parameter(&self, _: NodeHandle, _: u64, _: f32) -> NativeResult { Ok(()) }
    fn destroy(&self) {}
}
