#![allow(dead_code)]
//! Test harness for patchbay-core integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use patchbay_audio::{AudioDevice, Link, MidiDevice, Plugin, TestDevices, TestEngine, TestPlugins};
use patchbay_core::{Collaborators, Engine, EngineError, EngineSettings};
use patchbay_types::{Parameter, PluginBlueprint};

pub const OUTPUT: &str = "speakers";
pub const MIC: &str = "mic";
pub const KEYS: &str = "keys";

pub fn delay() -> PluginBlueprint {
    PluginBlueprint::new("aufx", "dely", "acme", "Delay")
}

pub fn synth() -> PluginBlueprint {
    PluginBlueprint::new("aumu", "syn1", "acme", "Synth")
}

/// Delay v1: mix at address 7, time at address 12.
pub fn delay_plugin() -> Plugin {
    Plugin::new(
        delay(),
        vec![
            Parameter::new(7, "Mix", 0.0, 100.0, 50.0),
            Parameter::new(12, "Time", 0.0, 2.0, 0.5),
        ],
    )
}

/// Delay v2: same addresses in a different order, plus a new feedback control.
pub fn delay_plugin_v2() -> Plugin {
    Plugin::new(
        delay(),
        vec![
            Parameter::new(12, "Time", 0.0, 2.0, 0.5),
            Parameter::new(3, "Feedback", 0.0, 1.0, 0.2),
            Parameter::new(7, "Mix", 0.0, 100.0, 50.0),
        ],
    )
}

pub fn synth_plugin() -> Plugin {
    Plugin::new(synth(), vec![Parameter::new(0, "Cutoff", 20.0, 20_000.0, 8_000.0)])
}

pub fn test_devices() -> TestDevices {
    TestDevices::new()
        .with_audio(AudioDevice::new(OUTPUT, "Speakers").with_outputs(2))
        .with_audio(AudioDevice::new("headphones", "Headphones").with_outputs(2))
        .with_audio(AudioDevice::new(MIC, "Microphone").with_inputs(2))
        .with_midi(MidiDevice::input(KEYS, "Keyboard"))
}

/// An engine over recording collaborators, with every reported error captured.
pub struct Harness {
    pub engine: Engine,
    pub native: Arc<TestEngine>,
    pub devices: Arc<TestDevices>,
    pub plugins: Arc<TestPlugins>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let native = Arc::new(TestEngine::new());
        let devices = Arc::new(test_devices());
        let plugins = Arc::new(TestPlugins::new().with(delay_plugin()).with(synth_plugin()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&errors);
        let parts = Collaborators {
            native: native.clone(),
            devices: devices.clone(),
            plugins: plugins.clone(),
            errors: Arc::new(move |e: &EngineError| sink.lock().push(format!("{e:?}"))),
        };
        let engine = Engine::new(settings, parts).unwrap();

        Self {
            engine,
            native,
            devices,
            plugins,
            errors,
        }
    }

    /// Reported errors whose debug form starts with `variant`.
    pub fn reported(&self, variant: &str) -> Vec<String> {
        self.errors
            .lock()
            .iter()
            .filter(|e| e.starts_with(variant))
            .cloned()
            .collect()
    }
}

pub fn settings() -> EngineSettings {
    let mut settings = EngineSettings::new(OUTPUT);
    settings.health_tick = Duration::from_millis(10);
    settings
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// The same live connections, in any order.
pub fn same_links(before: &[Link], after: &[Link]) -> bool {
    before.len() == after.len() && before.iter().all(|l| after.contains(l))
}
