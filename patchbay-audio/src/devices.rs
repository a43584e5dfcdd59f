//! Audio and MIDI device enumeration.
//!
//! `DeviceProvider` is the seam to the platform's device list. Besides full
//! enumeration it exposes `device_counts`, a cheap probe the hotplug monitor
//! polls on every tick before deciding whether a full enumeration is needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// An audio device discovered on the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub uid: String,
    pub name: String,
    pub input_channels: u32,
    pub output_channels: u32,
    pub online: bool,
    #[serde(default)]
    pub is_default_input: bool,
    #[serde(default)]
    pub is_default_output: bool,
    #[serde(default)]
    pub sample_rates: Vec<u32>,
}

impl AudioDevice {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            input_channels: 0,
            output_channels: 0,
            online: true,
            is_default_input: false,
            is_default_output: false,
            sample_rates: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, channels: u32) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn with_outputs(mut self, channels: u32) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }
}

/// A MIDI endpoint discovered on the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiDevice {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    pub is_input: bool,
    pub is_output: bool,
    pub online: bool,
}

impl MidiDevice {
    pub fn input(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            manufacturer: String::new(),
            is_input: true,
            is_output: false,
            online: true,
        }
    }
}

/// Result of the cheap device-count probe. Online counts are included so
/// online/offline transitions register as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCounts {
    pub audio: usize,
    pub audio_online: usize,
    pub midi: usize,
    pub midi_online: usize,
}

impl DeviceCounts {
    pub fn from_devices(audio: &[AudioDevice], midi: &[MidiDevice]) -> Self {
        Self {
            audio: audio.len(),
            audio_online: audio.iter().filter(|d| d.online).count(),
            midi: midi.len(),
            midi_online: midi.iter().filter(|d| d.online).count(),
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
    #[error("device count probe failed: {0}")]
    Probe(String),
}

/// Source of device lists.
pub trait DeviceProvider: Send + Sync {
    fn audio_devices(&self) -> DeviceResult<Vec<AudioDevice>>;

    fn midi_devices(&self) -> DeviceResult<Vec<MidiDevice>>;

    /// Cheap probe polled by the hotplug monitor.
    fn device_counts(&self) -> DeviceResult<DeviceCounts>;

    fn audio_device(&self, uid: &str) -> DeviceResult<Option<AudioDevice>> {
        Ok(self.audio_devices()?.into_iter().find(|d| d.uid == uid))
    }

    fn midi_device(&self, uid: &str) -> DeviceResult<Option<MidiDevice>> {
        Ok(self.midi_devices()?.into_iter().find(|d| d.uid == uid))
    }
}

// ─── Test Devices ───────────────────────────────────────────────────

/// In-memory device provider for tests: devices can be plugged, unplugged and
/// toggled online, and probes or enumerations can be made to fail.
pub struct TestDevices {
    audio: Mutex<Vec<AudioDevice>>,
    midi: Mutex<Vec<MidiDevice>>,
    failing_probes: AtomicUsize,
    failing_enumerations: AtomicUsize,
    probe_calls: AtomicUsize,
    probe_delay: Mutex<Duration>,
}

impl TestDevices {
    pub fn new() -> Self {
        Self {
            audio: Mutex::new(Vec::new()),
            midi: Mutex::new(Vec::new()),
            failing_probes: AtomicUsize::new(0),
            failing_enumerations: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            probe_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_audio(self, device: AudioDevice) -> Self {
        self.plug_audio(device);
        self
    }

    pub fn with_midi(self, device: MidiDevice) -> Self {
        self.plug_midi(device);
        self
    }

    pub fn plug_audio(&self, device: AudioDevice) {
        let mut audio = self.audio.lock();
        audio.retain(|d| d.uid != device.uid);
        audio.push(device);
    }

    pub fn unplug_audio(&self, uid: &str) {
        self.audio.lock().retain(|d| d.uid != uid);
    }

    pub fn plug_midi(&self, device: MidiDevice) {
        let mut midi = self.midi.lock();
        midi.retain(|d| d.uid != device.uid);
        midi.push(device);
    }

    pub fn unplug_midi(&self, uid: &str) {
        self.midi.lock().retain(|d| d.uid != uid);
    }

    /// Flip the online flag of every device with this uid.
    pub fn set_online(&self, uid: &str, online: bool) {
        for d in self.audio.lock().iter_mut().filter(|d| d.uid == uid) {
            d.online = online;
        }
        for d in self.midi.lock().iter_mut().filter(|d| d.uid == uid) {
            d.online = online;
        }
    }

    pub fn fail_next_probes(&self, count: usize) {
        self.failing_probes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_enumerations(&self, count: usize) {
        self.failing_enumerations.store(count, Ordering::SeqCst);
    }

    /// Make every probe take at least this long.
    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock() = delay;
    }

    pub fn probe_count(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for TestDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for TestDevices {
    fn audio_devices(&self) -> DeviceResult<Vec<AudioDevice>> {
        if Self::take_failure(&self.failing_enumerations) {
            return Err(DeviceError::Enumeration("injected failure".into()));
        }
        Ok(self.audio.lock().clone())
    }

    fn midi_devices(&self) -> DeviceResult<Vec<MidiDevice>> {
        Ok(self.midi.lock().clone())
    }

    fn device_counts(&self) -> DeviceResult<DeviceCounts> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if Self::take_failure(&self.failing_probes) {
            return Err(DeviceError::Probe("injected failure".into()));
        }
        Ok(DeviceCounts::from_devices(&self.audio.lock(), &self.midi.lock()))
    }

    fn audio_device(&self, uid: &str) -> DeviceResult<Option<AudioDevice>> {
        Ok(self.audio.lock().iter().find(|d| d.uid == uid).cloned())
    }

    fn midi_device(&self, uid: &str) -> DeviceResult<Option<MidiDevice>> {
        Ok(self.midi.lock().iter().find(|d| d.uid == uid).cloned())
    }
}

// ─── System Devices ─────────────────────────────────────────────────

#[cfg(feature = "system-devices")]
pub use system::SystemDevices;

#[cfg(feature = "system-devices")]
mod system {
    use cpal::traits::{DeviceTrait, HostTrait};

    use super::*;

    const CLIENT_NAME: &str = "patchbay-probe";

    /// Device provider backed by the default cpal host and midir.
    /// Device names double as uids; every enumerated device is online.
    pub struct SystemDevices {
        host: cpal::Host,
    }

    impl SystemDevices {
        pub fn new() -> Self {
            Self {
                host: cpal::default_host(),
            }
        }
    }

    impl Default for SystemDevices {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DeviceProvider for SystemDevices {
        fn audio_devices(&self) -> DeviceResult<Vec<AudioDevice>> {
            let default_in = self.host.default_input_device().and_then(|d| d.name().ok());
            let default_out = self.host.default_output_device().and_then(|d| d.name().ok());
            let devices = self
                .host
                .devices()
                .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

            let mut result = Vec::new();
            for device in devices {
                let Ok(name) = device.name() else { continue };
                let input = device.default_input_config().ok();
                let output = device.default_output_config().ok();
                let mut sample_rates: Vec<u32> = input
                    .iter()
                    .chain(output.iter())
                    .map(|c| c.sample_rate().0)
                    .collect();
                sample_rates.dedup();
                result.push(AudioDevice {
                    uid: name.clone(),
                    input_channels: input.as_ref().map(|c| c.channels() as u32).unwrap_or(0),
                    output_channels: output.as_ref().map(|c| c.channels() as u32).unwrap_or(0),
                    online: true,
                    is_default_input: default_in.as_deref() == Some(name.as_str()),
                    is_default_output: default_out.as_deref() == Some(name.as_str()),
                    sample_rates,
                    name,
                });
            }
            Ok(result)
        }

        fn midi_devices(&self) -> DeviceResult<Vec<MidiDevice>> {
            let input = midir::MidiInput::new(CLIENT_NAME)
                .map_err(|e| DeviceError::Enumeration(e.to_string()))?;
            let output = midir::MidiOutput::new(CLIENT_NAME)
                .map_err(|e| DeviceError::Enumeration(e.to_string()))?;

            let mut result: Vec<MidiDevice> = Vec::new();
            for port in input.ports() {
                if let Ok(name) = input.port_name(&port) {
                    result.push(MidiDevice::input(name.clone(), name));
                }
            }
            for port in output.ports() {
                let Ok(name) = output.port_name(&port) else { continue };
                match result.iter_mut().find(|d| d.uid == name) {
                    Some(existing) => existing.is_output = true,
                    None => result.push(MidiDevice {
                        uid: name.clone(),
                        name,
                        manufacturer: String::new(),
                        is_input: false,
                        is_output: true,
                        online: true,
                    }),
                }
            }
            Ok(result)
        }

        fn device_counts(&self) -> DeviceResult<DeviceCounts> {
            let audio = self
                .host
                .devices()
                .map_err(|e| DeviceError::Probe(e.to_string()))?
                .count();
            let midi = midir::MidiInput::new(CLIENT_NAME)
                .map(|m| m.port_count())
                .map_err(|e| DeviceError::Probe(e.to_string()))?;
            Ok(DeviceCounts {
                audio,
                audio_online: audio,
                midi,
                midi_online: midi,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> TestDevices {
        TestDevices::new()
            .with_audio(AudioDevice::new("usb-1", "USB Interface").with_inputs(2).with_outputs(2))
            .with_audio(AudioDevice::new("hdmi", "HDMI").with_outputs(8).offline())
            .with_midi(MidiDevice::input("keys", "Keystation"))
    }

    #[test]
    fn counts_include_online_totals() {
        let counts = provider().device_counts().unwrap();
        assert_eq!(
            counts,
            DeviceCounts {
                audio: 2,
                audio_online: 1,
                midi: 1,
                midi_online: 1,
            }
        );
    }

    #[test]
    fn status_flip_changes_counts() {
        let devices = provider();
        let before = devices.device_counts().unwrap();
        devices.set_online("hdmi", true);
        assert_ne!(before, devices.device_counts().unwrap());
    }

    #[test]
    fn lookup_by_uid() {
        let devices = provider();
        assert_eq!(devices.audio_device("usb-1").unwrap().unwrap().input_channels, 2);
        assert!(devices.audio_device("missing").unwrap().is_none());
        assert!(devices.midi_device("keys").unwrap().unwrap().is_input);
    }

    #[test]
    fn plug_replaces_same_uid() {
        let devices = provider();
        devices.plug_audio(AudioDevice::new("usb-1", "USB Interface").with_inputs(4));
        assert_eq!(devices.audio_devices().unwrap().len(), 2);
        devices.unplug_audio("usb-1");
        assert!(devices.audio_device("usb-1").unwrap().is_none());
    }

    #[test]
    fn injected_probe_failures_run_out() {
        let devices = provider();
        devices.fail_next_probes(2);
        assert!(devices.device_counts().is_err());
        assert!(devices.device_counts().is_err());
        assert!(devices.device_counts().is_ok());
        assert_eq!(devices.probe_count(), 3);
    }
}
