//! Device hotplug monitor with adaptive polling.
//!
//! The monitor polls the provider's cheap `device_counts` probe. When the
//! counts change it drops back to the base interval, runs a full enumeration
//! and emits one `DeviceEvent` per difference. While nothing changes it slowly
//! stretches the interval toward the maximum, trading detection latency for
//! idle CPU.
//!
//! Events are sent over a channel rather than delivered through callbacks, so
//! the consumer decides on which thread (and under which locks) they are handled.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use patchbay_types::DeviceKind;

use crate::devices::{AudioDevice, DeviceCounts, DeviceError, DeviceProvider, DeviceResult, MidiDevice};
use crate::telemetry::{ProbeSummary, ProbeTelemetry};

/// Lower bound for any polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Interval right after a detected change.
    pub base_interval: Duration,
    /// Ceiling the interval grows toward while nothing changes.
    pub max_interval: Duration,
    pub growth_factor: f64,
    /// Unchanged polls tolerated before the interval starts growing.
    pub slowdown_after: u32,
    pub probe_budget: Duration,
    /// Probes slower than this are logged and reported.
    pub slow_probe_report: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
            growth_factor: 1.1,
            slowdown_after: 10,
            probe_budget: Duration::from_micros(50),
            slow_probe_report: Duration::from_micros(200),
        }
    }
}

impl MonitorSettings {
    /// Clamp to usable values: intervals at least `MIN_POLL_INTERVAL`, max not
    /// below base, growth factor at least 1.
    pub fn sanitized(mut self) -> Self {
        self.base_interval = self.base_interval.max(MIN_POLL_INTERVAL);
        self.max_interval = self.max_interval.max(self.base_interval);
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            self.growth_factor = 1.0;
        }
        self
    }
}

/// The interval state machine, kept separate from the thread so it can be
/// driven deterministically.
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    base: Duration,
    max: Duration,
    growth: f64,
    slowdown_after: u32,
    current: Duration,
    unchanged: u32,
}

impl AdaptiveInterval {
    pub fn new(settings: &MonitorSettings) -> Self {
        let settings = settings.clone().sanitized();
        Self {
            base: settings.base_interval,
            max: settings.max_interval,
            growth: settings.growth_factor,
            slowdown_after: settings.slowdown_after,
            current: settings.base_interval,
            unchanged: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn unchanged_polls(&self) -> u32 {
        self.unchanged
    }

    pub fn on_unchanged(&mut self) {
        self.unchanged = self.unchanged.saturating_add(1);
        if self.unchanged > self.slowdown_after {
            self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.growth)
                .map_or(self.max, |grown| grown.min(self.max));
        }
    }

    pub fn on_changed(&mut self) {
        self.unchanged = 0;
        self.current = self.base;
    }

    /// Replace the base interval (clamped to `MIN_POLL_INTERVAL`) and restart from it.
    pub fn set_base(&mut self, base: Duration) {
        self.base = base.max(MIN_POLL_INTERVAL);
        self.max = self.max.max(self.base);
        self.on_changed();
    }
}

/// A hardware change found by diffing two enumerations.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    AudioDeviceAdded(AudioDevice),
    AudioDeviceRemoved { uid: String, name: String },
    MidiDeviceAdded(MidiDevice),
    MidiDeviceRemoved { uid: String, name: String },
    DeviceStatusChanged {
        uid: String,
        kind: DeviceKind,
        online: bool,
    },
}

impl DeviceEvent {
    pub fn uid(&self) -> &str {
        match self {
            DeviceEvent::AudioDeviceAdded(d) => &d.uid,
            DeviceEvent::MidiDeviceAdded(d) => &d.uid,
            DeviceEvent::AudioDeviceRemoved { uid, .. }
            | DeviceEvent::MidiDeviceRemoved { uid, .. }
            | DeviceEvent::DeviceStatusChanged { uid, .. } => uid,
        }
    }
}

/// Everything the monitor reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Device(DeviceEvent),
    ProbeFailed(String),
    SlowProbe(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Changed { events: usize },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorStats {
    pub running: bool,
    pub interval: Duration,
    pub unchanged_polls: u32,
    pub polls: u64,
    pub changes: u64,
    pub probe: ProbeSummary,
}

struct PollState {
    settings: MonitorSettings,
    interval: AdaptiveInterval,
    counts: Option<DeviceCounts>,
    audio: Vec<AudioDevice>,
    midi: Vec<MidiDevice>,
    telemetry: ProbeTelemetry,
    polls: u64,
    changes: u64,
}

struct Poller {
    provider: Arc<dyn DeviceProvider>,
    events: Sender<MonitorEvent>,
    state: Mutex<PollState>,
}

impl Poller {
    fn emit(&self, event: MonitorEvent) {
        if self.events.send(event).is_err() {
            log::debug!(target: "monitor", "event receiver gone, dropping event");
        }
    }

    fn current_interval(&self) -> Duration {
        self.state.lock().interval.current()
    }

    fn enumerate(&self) -> DeviceResult<(Vec<AudioDevice>, Vec<MidiDevice>)> {
        Ok((self.provider.audio_devices()?, self.provider.midi_devices()?))
    }

    /// Record the baseline the next polls are compared against.
    fn snapshot(&self) -> DeviceResult<()> {
        let counts = self.provider.device_counts()?;
        let (audio, midi) = self.enumerate()?;
        let mut state = self.state.lock();
        state.counts = Some(counts);
        state.audio = audio;
        state.midi = midi;
        state.interval.on_changed();
        Ok(())
    }

    fn poll(&self) -> PollOutcome {
        let mut state = self.state.lock();
        state.polls += 1;

        let started = Instant::now();
        let probe = self.provider.device_counts();
        let elapsed = started.elapsed();

        let budget = state.settings.probe_budget;
        state.telemetry.record(elapsed, budget);
        if elapsed > state.settings.slow_probe_report {
            log::warn!(
                target: "monitor",
                "device probe took {:?}, target is {:?}",
                elapsed,
                budget
            );
            self.emit(MonitorEvent::SlowProbe(elapsed));
        }

        let counts = match probe {
            Ok(counts) => counts,
            Err(e) => {
                state.telemetry.record_failure();
                log::warn!(target: "monitor", "{}", e);
                self.emit(MonitorEvent::ProbeFailed(e.to_string()));
                return PollOutcome::Failed;
            }
        };

        if state.counts == Some(counts) {
            state.interval.on_unchanged();
            return PollOutcome::Unchanged;
        }

        state.interval.on_changed();
        let (audio, midi) = match self.enumerate() {
            Ok(lists) => lists,
            Err(e) => {
                // Keep the old counts so the next poll sees the change again.
                state.telemetry.record_failure();
                log::warn!(target: "monitor", "{}", e);
                self.emit(MonitorEvent::ProbeFailed(e.to_string()));
                return PollOutcome::Failed;
            }
        };

        let events = diff_devices(&state.audio, &audio, &state.midi, &midi);
        state.counts = Some(counts);
        state.audio = audio;
        state.midi = midi;
        state.changes += 1;
        drop(state);

        log::debug!(target: "monitor", "device change detected ({} events)", events.len());
        let n = events.len();
        for event in events {
            self.emit(MonitorEvent::Device(event));
        }
        PollOutcome::Changed { events: n }
    }
}

/// Differences between two enumerations, additions and status flips in the
/// order of the new lists, removals in the order of the old ones.
pub fn diff_devices(
    old_audio: &[AudioDevice],
    new_audio: &[AudioDevice],
    old_midi: &[MidiDevice],
    new_midi: &[MidiDevice],
) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for device in new_audio {
        match old_audio.iter().find(|d| d.uid == device.uid) {
            None => events.push(DeviceEvent::AudioDeviceAdded(device.clone())),
            Some(old) if old.online != device.online => {
                events.push(DeviceEvent::DeviceStatusChanged {
                    uid: device.uid.clone(),
                    kind: DeviceKind::Audio,
                    online: device.online,
                })
            }
            Some(_) => {}
        }
    }
    for old in old_audio {
        if !new_audio.iter().any(|d| d.uid == old.uid) {
            events.push(DeviceEvent::AudioDeviceRemoved {
                uid: old.uid.clone(),
                name: old.name.clone(),
            });
        }
    }

    for device in new_midi {
        match old_midi.iter().find(|d| d.uid == device.uid) {
            None => events.push(DeviceEvent::MidiDeviceAdded(device.clone())),
            Some(old) if old.online != device.online => {
                events.push(DeviceEvent::DeviceStatusChanged {
                    uid: device.uid.clone(),
                    kind: DeviceKind::Midi,
                    online: device.online,
                })
            }
            Some(_) => {}
        }
    }
    for old in old_midi {
        if !new_midi.iter().any(|d| d.uid == old.uid) {
            events.push(DeviceEvent::MidiDeviceRemoved {
                uid: old.uid.clone(),
                name: old.name.clone(),
            });
        }
    }

    events
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Background hotplug detector. Owns its polling thread between `start` and `stop`.
pub struct DeviceMonitor {
    poller: Arc<Poller>,
    worker: Option<Worker>,
}

impl DeviceMonitor {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        settings: MonitorSettings,
        events: Sender<MonitorEvent>,
    ) -> Self {
        let settings = settings.sanitized();
        let state = PollState {
            interval: AdaptiveInterval::new(&settings),
            settings,
            counts: None,
            audio: Vec::new(),
            midi: Vec::new(),
            telemetry: ProbeTelemetry::new(),
            polls: 0,
            changes: 0,
        };
        Self {
            poller: Arc::new(Poller {
                provider,
                events,
                state: Mutex::new(state),
            }),
            worker: None,
        }
    }

    /// Take the initial snapshot and start polling. A no-op when already running.
    pub fn start(&mut self) -> DeviceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.poller.snapshot()?;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let poller = Arc::clone(&self.poller);
        let handle = thread::Builder::new()
            .name("patchbay-device-monitor".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(poller.current_interval()) {
                    Err(RecvTimeoutError::Timeout) => {
                        poller.poll();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| DeviceError::Enumeration(format!("could not spawn monitor thread: {e}")))?;

        self.worker = Some(Worker { stop_tx, handle });
        log::info!(target: "monitor", "device monitor started");
        Ok(())
    }

    /// Stop polling and join the thread. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                log::error!(target: "monitor", "device monitor thread panicked");
            }
            log::info!(target: "monitor", "device monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Run one poll on the calling thread. Without a baseline (never started)
    /// the first call only records one.
    pub fn poll_now(&self) -> PollOutcome {
        if self.poller.state.lock().counts.is_none() {
            return match self.poller.snapshot() {
                Ok(()) => PollOutcome::Unchanged,
                Err(e) => {
                    self.poller.emit(MonitorEvent::ProbeFailed(e.to_string()));
                    PollOutcome::Failed
                }
            };
        }
        self.poller.poll()
    }

    /// Change the base polling interval (minimum 10ms).
    pub fn set_polling_interval(&self, base: Duration) {
        let mut state = self.poller.state.lock();
        state.interval.set_base(base);
        state.settings.base_interval = state.interval.current();
    }

    pub fn current_interval(&self) -> Duration {
        self.poller.current_interval()
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.poller.state.lock();
        MonitorStats {
            running: self.worker.is_some(),
            interval: state.interval.current(),
            unchanged_polls: state.interval.unchanged_polls(),
            polls: state.polls,
            changes: state.changes,
            probe: state.telemetry.summary(),
        }
    }

    /// Audio devices as of the last successful enumeration.
    pub fn known_audio_devices(&self) -> Vec<AudioDevice> {
        self.poller.state.lock().audio.clone()
    }

    /// MIDI devices as of the last successful enumeration.
    pub fn known_midi_devices(&self) -> Vec<MidiDevice> {
        self.poller.state.lock().midi.clone()
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::TestDevices;
    use crossbeam_channel::Receiver;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            slow_probe_report: Duration::from_secs(1),
            ..MonitorSettings::default()
        }
    }

    fn monitor(devices: Arc<TestDevices>) -> (DeviceMonitor, Receiver<MonitorEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (DeviceMonitor::new(devices, settings(), tx), rx)
    }

    fn drain(rx: &Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn interval_grows_after_eleven_quiet_polls() {
        let mut interval = AdaptiveInterval::new(&settings());
        for _ in 0..10 {
            interval.on_unchanged();
        }
        assert_eq!(interval.current(), Duration::from_millis(50));

        interval.on_unchanged();
        assert!(interval.current() > Duration::from_millis(50));
        assert!(interval.current() <= Duration::from_millis(200));
    }

    #[test]
    fn interval_is_capped_at_max() {
        let mut interval = AdaptiveInterval::new(&settings());
        for _ in 0..200 {
            interval.on_unchanged();
        }
        assert_eq!(interval.current(), Duration::from_millis(200));
    }

    #[test]
    fn change_resets_to_base() {
        let mut interval = AdaptiveInterval::new(&settings());
        for _ in 0..30 {
            interval.on_unchanged();
        }
        interval.on_changed();
        assert_eq!(interval.current(), Duration::from_millis(50));
        assert_eq!(interval.unchanged_polls(), 0);
    }

    #[test]
    fn base_interval_has_a_floor() {
        let mut interval = AdaptiveInterval::new(&settings());
        interval.set_base(Duration::from_millis(1));
        assert_eq!(interval.current(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn sanitized_settings() {
        let s = MonitorSettings {
            base_interval: Duration::from_millis(300),
            max_interval: Duration::from_millis(100),
            growth_factor: 0.5,
            ..MonitorSettings::default()
        }
        .sanitized();
        assert_eq!(s.max_interval, Duration::from_millis(300));
        assert_eq!(s.growth_factor, 1.0);
    }

    #[test]
    fn huge_growth_factor_caps_at_max() {
        let settings = MonitorSettings {
            base_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
            growth_factor: 1e300,
            slowdown_after: 0,
            ..MonitorSettings::default()
        };
        let mut interval = AdaptiveInterval::new(&settings);
        interval.on_unchanged();
        assert_eq!(interval.current(), Duration::from_millis(200));
        interval.on_unchanged();
        assert_eq!(interval.current(), Duration::from_millis(200));
    }

    #[test]
    fn polls_report_device_differences() {
        let devices = Arc::new(
            TestDevices::new()
                .with_audio(AudioDevice::new("built-in", "Built-in Output").with_outputs(2))
                .with_audio(AudioDevice::new("usb", "USB Interface").with_inputs(2)),
        );
        let (monitor, rx) = monitor(devices.clone());
        assert_eq!(monitor.poll_now(), PollOutcome::Unchanged);
        assert_eq!(monitor.poll_now(), PollOutcome::Unchanged);
        assert!(drain(&rx).is_empty());

        devices.unplug_audio("usb");
        devices.plug_midi(MidiDevice::input("keys", "Keys"));
        assert_eq!(monitor.poll_now(), PollOutcome::Changed { events: 2 });
        assert_eq!(
            drain(&rx),
            vec![
                MonitorEvent::Device(DeviceEvent::AudioDeviceRemoved {
                    uid: "usb".into(),
                    name: "USB Interface".into(),
                }),
                MonitorEvent::Device(DeviceEvent::MidiDeviceAdded(MidiDevice::input("keys", "Keys"))),
            ]
        );

        devices.set_online("built-in", false);
        assert_eq!(monitor.poll_now(), PollOutcome::Changed { events: 1 });
        assert_eq!(
            drain(&rx),
            vec![MonitorEvent::Device(DeviceEvent::DeviceStatusChanged {
                uid: "built-in".into(),
                kind: DeviceKind::Audio,
                online: false,
            })]
        );
    }

    #[test]
    fn detected_change_resets_interval_on_next_poll() {
        let devices = Arc::new(TestDevices::new().with_audio(AudioDevice::new("a", "A")));
        let (monitor, _rx) = monitor(devices.clone());
        monitor.poll_now();
        for _ in 0..15 {
            monitor.poll_now();
        }
        assert!(monitor.current_interval() > Duration::from_millis(50));

        devices.plug_audio(AudioDevice::new("b", "B"));
        monitor.poll_now();
        assert_eq!(monitor.current_interval(), Duration::from_millis(50));
    }

    #[test]
    fn failed_probe_is_reported_and_polling_continues() {
        let devices = Arc::new(TestDevices::new().with_audio(AudioDevice::new("a", "A")));
        let (monitor, rx) = monitor(devices.clone());
        monitor.poll_now();
        for _ in 0..12 {
            monitor.poll_now();
        }
        let before = monitor.current_interval();

        devices.fail_next_probes(1);
        assert_eq!(monitor.poll_now(), PollOutcome::Failed);
        assert_eq!(monitor.current_interval(), before);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, MonitorEvent::ProbeFailed(_))));

        assert_eq!(monitor.poll_now(), PollOutcome::Unchanged);
        assert_eq!(monitor.stats().probe.failures, 1);
    }

    #[test]
    fn failed_enumeration_is_retried() {
        let devices = Arc::new(TestDevices::new().with_audio(AudioDevice::new("a", "A")));
        let (monitor, rx) = monitor(devices.clone());
        monitor.poll_now();

        devices.plug_audio(AudioDevice::new("b", "B"));
        devices.fail_next_enumerations(1);
        assert_eq!(monitor.poll_now(), PollOutcome::Failed);
        drain(&rx);

        assert_eq!(monitor.poll_now(), PollOutcome::Changed { events: 1 });
        assert!(matches!(
            drain(&rx).as_slice(),
            [MonitorEvent::Device(DeviceEvent::AudioDeviceAdded(d))] if d.uid == "b"
        ));
    }

    #[test]
    fn slow_probe_is_reported() {
        let devices = Arc::new(TestDevices::new());
        devices.set_probe_delay(Duration::from_millis(2));
        let (tx, rx) = crossbeam_channel::unbounded();
        let monitor = DeviceMonitor::new(devices.clone(), MonitorSettings::default(), tx);
        monitor.poll_now();
        monitor.poll_now();
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, MonitorEvent::SlowProbe(d) if *d >= Duration::from_millis(2))));
        assert!(monitor.stats().probe.over_budget >= 1);
    }

    #[test]
    fn background_thread_detects_hotplug() {
        let devices = Arc::new(TestDevices::new());
        let (mut monitor, rx) = monitor(devices.clone());
        monitor.set_polling_interval(Duration::from_millis(10));
        monitor.start().unwrap();
        assert!(monitor.is_running());

        devices.plug_audio(AudioDevice::new("usb", "USB Interface"));
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, MonitorEvent::Device(DeviceEvent::AudioDeviceAdded(_))));

        monitor.stop();
        assert!(!monitor.is_running());
        monitor.stop();
    }

    #[test]
    fn start_fails_when_initial_snapshot_fails() {
        let devices = Arc::new(TestDevices::new());
        devices.fail_next_probes(1);
        let (mut monitor, _rx) = monitor(devices);
        assert!(monitor.start().is_err());
        assert!(!monitor.is_running());
    }
}
