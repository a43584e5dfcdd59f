use std::path::PathBuf;
use std::time::Duration;

use patchbay_audio::monitor::MIN_POLL_INTERVAL;
use patchbay_audio::MonitorSettings;
use patchbay_types::BufferSize;
use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    monitor: MonitorConfig,
}

#[derive(Deserialize, Default)]
struct EngineConfig {
    buffer_size: Option<u32>,
    sample_rate: Option<u32>,
    strict_start_validation: Option<bool>,
    auto_connect_to_master: Option<bool>,
    queue_capacity: Option<usize>,
    operation_budget_ms: Option<u64>,
    health_tick_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MonitorConfig {
    base_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    growth_factor: Option<f64>,
    slowdown_after: Option<u32>,
    probe_budget_us: Option<u64>,
    slow_probe_report_us: Option<u64>,
}

/// Everything an `Engine` is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub output_device_uid: String,
    pub buffer_size: BufferSize,
    pub sample_rate: u32,
    /// Require a path to the master from every online channel before starting.
    pub strict_start_validation: bool,
    pub auto_connect_to_master: bool,
    pub queue_capacity: usize,
    /// Latency target for one dispatched operation.
    pub operation_budget: Duration,
    pub health_tick: Duration,
    pub monitor: MonitorSettings,
}

impl EngineSettings {
    pub fn new(output_device_uid: impl Into<String>) -> Self {
        Self {
            output_device_uid: output_device_uid.into(),
            buffer_size: BufferSize::default(),
            sample_rate: 48_000,
            strict_start_validation: false,
            auto_connect_to_master: true,
            queue_capacity: 100,
            operation_budget: Duration::from_millis(300),
            health_tick: Duration::from_millis(250),
            monitor: MonitorSettings::default(),
        }
    }
}

pub struct Config {
    engine: EngineConfig,
    monitor: MonitorConfig,
}

impl Config {
    /// Embedded defaults overlaid with `~/.config/patchbay/config.toml`, if present.
    pub fn load() -> Self {
        let mut config = Self::embedded();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => config.merge(user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    /// Embedded defaults overlaid with `contents`.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let user: ConfigFile = toml::from_str(contents)?;
        let mut config = Self::embedded();
        config.merge(user);
        Ok(config)
    }

    fn embedded() -> Self {
        let base = toml::from_str::<ConfigFile>(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::warn!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        Config {
            engine: base.engine,
            monitor: base.monitor,
        }
    }

    fn merge(&mut self, user: ConfigFile) {
        merge_engine(&mut self.engine, user.engine);
        merge_monitor(&mut self.monitor, user.monitor);
    }

    pub fn buffer_size(&self) -> BufferSize {
        match self.engine.buffer_size {
            Some(frames) => BufferSize::from_samples(frames).unwrap_or_else(|| {
                log::warn!(target: "config", "unsupported buffer_size {}, using default", frames);
                BufferSize::default()
            }),
            None => BufferSize::default(),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let fallback = MonitorSettings::default();
        let m = &self.monitor;
        MonitorSettings {
            base_interval: m
                .base_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.base_interval)
                .max(MIN_POLL_INTERVAL),
            max_interval: m
                .max_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.max_interval),
            growth_factor: m.growth_factor.unwrap_or(fallback.growth_factor),
            slowdown_after: m.slowdown_after.unwrap_or(fallback.slowdown_after),
            probe_budget: m
                .probe_budget_us
                .map(Duration::from_micros)
                .unwrap_or(fallback.probe_budget),
            slow_probe_report: m
                .slow_probe_report_us
                .map(Duration::from_micros)
                .unwrap_or(fallback.slow_probe_report),
        }
        .sanitized()
    }

    /// Settings for an engine rendering to `output_device_uid`.
    pub fn engine_settings(&self, output_device_uid: impl Into<String>) -> EngineSettings {
        let fallback = EngineSettings::new(output_device_uid);
        let e = &self.engine;
        EngineSettings {
            buffer_size: self.buffer_size(),
            sample_rate: e
                .sample_rate
                .filter(|r| *r > 0)
                .unwrap_or(fallback.sample_rate),
            strict_start_validation: e
                .strict_start_validation
                .unwrap_or(fallback.strict_start_validation),
            auto_connect_to_master: e
                .auto_connect_to_master
                .unwrap_or(fallback.auto_connect_to_master),
            queue_capacity: e.queue_capacity.unwrap_or(fallback.queue_capacity).max(1),
            operation_budget: e
                .operation_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.operation_budget),
            health_tick: e
                .health_tick_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(fallback.health_tick),
            monitor: self.monitor_settings(),
            output_device_uid: fallback.output_device_uid,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("patchbay").join("config.toml"))
}

fn merge_engine(base: &mut EngineConfig, user: EngineConfig) {
    if user.buffer_size.is_some() {
        base.buffer_size = user.buffer_size;
    }
    if user.sample_rate.is_some() {
        base.sample_rate = user.sample_rate;
    }
    if user.strict_start_validation.is_some() {
        base.strict_start_validation = user.strict_start_validation;
    }
    if user.auto_connect_to_master.is_some() {
        base.auto_connect_to_master = user.auto_connect_to_master;
    }
    if user.queue_capacity.is_some() {
        base.queue_capacity = user.queue_capacity;
    }
    if user.operation_budget_ms.is_some() {
        base.operation_budget_ms = user.operation_budget_ms;
    }
    if user.health_tick_ms.is_some() {
        base.health_tick_ms = user.health_tick_ms;
    }
}

fn merge_monitor(base: &mut MonitorConfig, user: MonitorConfig) {
    if user.base_interval_ms.is_some() {
        base.base_interval_ms = user.base_interval_ms;
    }
    if user.max_interval_ms.is_some() {
        base.max_interval_ms = user.max_interval_ms;
    }
    if user.growth_factor.is_some() {
        base.growth_factor = user.growth_factor;
    }
    if user.slowdown_after.is_some() {
        base.slowdown_after = user.slowdown_after;
    }
    if user.probe_budget_us.is_some() {
        base.probe_budget_us = user.probe_budget_us;
    }
    if user.slow_probe_report_us.is_some() {
        base.slow_probe_report_us = user.slow_probe_report_us;
    }
}
