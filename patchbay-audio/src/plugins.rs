//! Plugin discovery and parameter introspection.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use patchbay_types::{Parameter, PluginBlueprint};
use serde::Deserialize;

/// An installable plugin as listed by a quick scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginInfo {
    pub blueprint: PluginBlueprint,
}

/// A plugin with its live parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct Plugin {
    pub blueprint: PluginBlueprint,
    pub parameters: Vec<Parameter>,
}

impl Plugin {
    pub fn new(blueprint: PluginBlueprint, parameters: Vec<Parameter>) -> Self {
        Self {
            blueprint,
            parameters,
        }
    }

    pub fn parameter(&self, address: u64) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.address == address)
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    #[error("plugin {0} is not installed")]
    NotInstalled(String),
    #[error("plugin {plugin} did not respond within {timeout:?}")]
    Unresponsive { plugin: String, timeout: Duration },
    #[error("plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },
}

pub trait PluginProvider: Send + Sync {
    /// List installable plugins without loading them.
    fn quick_scan(&self) -> PluginResult<Vec<PluginInfo>>;

    /// Load a plugin and report its full parameter set.
    fn introspect(&self, blueprint: &PluginBlueprint) -> PluginResult<Plugin>;
}

// ─── Test Plugins ───────────────────────────────────────────────────

/// In-memory plugin registry for tests.
pub struct TestPlugins {
    plugins: Mutex<Vec<Plugin>>,
    unresponsive: Mutex<HashSet<String>>,
}

impl TestPlugins {
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            unresponsive: Mutex::new(HashSet::new()),
        }
    }

    pub fn with(self, plugin: Plugin) -> Self {
        self.install(plugin);
        self
    }

    /// Install a plugin, replacing any installed version of the same component.
    pub fn install(&self, plugin: Plugin) {
        let mut plugins = self.plugins.lock();
        plugins.retain(|p| !p.blueprint.same_component(&plugin.blueprint));
        plugins.push(plugin);
    }

    pub fn uninstall(&self, blueprint: &PluginBlueprint) {
        self.plugins
            .lock()
            .retain(|p| !p.blueprint.same_component(blueprint));
    }

    /// Make introspection of this plugin time out.
    pub fn set_unresponsive(&self, name: &str) {
        self.unresponsive.lock().insert(name.to_string());
    }
}

impl Default for TestPlugins {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginProvider for TestPlugins {
    fn quick_scan(&self) -> PluginResult<Vec<PluginInfo>> {
        Ok(self
            .plugins
            .lock()
            .iter()
            .map(|p| PluginInfo {
                blueprint: p.blueprint.clone(),
            })
            .collect())
    }

    fn introspect(&self, blueprint: &PluginBlueprint) -> PluginResult<Plugin> {
        if self.unresponsive.lock().contains(&blueprint.name) {
            return Err(PluginError::Unresponsive {
                plugin: blueprint.to_string(),
                timeout: Duration::from_secs(2),
            });
        }
        self.plugins
            .lock()
            .iter()
            .find(|p| p.blueprint.same_component(blueprint))
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(blueprint.to_string()))
    }
}

// ─── JSON Catalog ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    plugins: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(flatten)]
    blueprint: PluginBlueprint,
    #[serde(default)]
    parameters: Vec<Parameter>,
}

/// Plugin provider backed by the JSON listing a native scanner writes:
/// `{"plugins": [{"type", "subtype", "manufacturer", "name", "parameters": [...]}]}`.
pub struct JsonPluginCatalog {
    plugins: Vec<Plugin>,
}

impl JsonPluginCatalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let plugins = file
            .plugins
            .into_iter()
            .map(|e| Plugin::new(e.blueprint, e.parameters))
            .collect();
        Ok(Self { plugins })
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl PluginProvider for JsonPluginCatalog {
    fn quick_scan(&self) -> PluginResult<Vec<PluginInfo>> {
        Ok(self
            .plugins
            .iter()
            .map(|p| PluginInfo {
                blueprint: p.blueprint.clone(),
            })
            .collect())
    }

    fn introspect(&self, blueprint: &PluginBlueprint) -> PluginResult<Plugin> {
        self.plugins
            .iter()
            .find(|p| p.blueprint.same_component(blueprint))
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(blueprint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "plugins": [
            {
                "type": "aufx", "subtype": "dely", "manufacturer": "appl", "name": "AUDelay",
                "parameters": [
                    {"address": 0, "display_name": "Dry/Wet Mix", "unit": "percent",
                     "min": 0.0, "max": 100.0, "default": 50.0, "current": 50.0},
                    {"address": 1, "display_name": "Delay Time", "unit": "seconds",
                     "min": 0.0, "max": 2.0, "default": 1.0, "current": 0.25, "can_ramp": true}
                ]
            },
            {"type": "aumu", "subtype": "dls ", "manufacturer": "appl", "name": "DLSMusicDevice"}
        ]
    }"#;

    #[test]
    fn catalog_parses_scanner_listing() {
        let catalog = JsonPluginCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let delay = catalog
            .introspect(&PluginBlueprint::new("aufx", "dely", "appl", "AUDelay"))
            .unwrap();
        assert_eq!(delay.parameters.len(), 2);
        let time = delay.parameter(1).unwrap();
        assert!(time.writable);
        assert!(time.can_ramp);
        assert_eq!(time.current, 0.25);
    }

    #[test]
    fn catalog_reports_missing_plugin() {
        let catalog = JsonPluginCatalog::from_json(CATALOG).unwrap();
        let err = catalog
            .introspect(&PluginBlueprint::new("aufx", "rvb2", "appl", "Reverb"))
            .unwrap_err();
        assert!(matches!(err, PluginError::NotInstalled(_)));
    }

    #[test]
    fn catalog_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = JsonPluginCatalog::load(&path).unwrap();
        assert_eq!(catalog.quick_scan().unwrap().len(), 2);
    }

    #[test]
    fn test_plugins_install_replaces_version() {
        let bp = PluginBlueprint::new("aufx", "dely", "appl", "AUDelay");
        let plugins = TestPlugins::new().with(Plugin::new(bp.clone(), vec![]));
        plugins.install(Plugin::new(
            bp.clone(),
            vec![Parameter::new(3, "Feedback", 0.0, 1.0, 0.2)],
        ));
        assert_eq!(plugins.quick_scan().unwrap().len(), 1);
        assert_eq!(plugins.introspect(&bp).unwrap().parameters.len(), 1);
    }

    #[test]
    fn unresponsive_plugin_times_out() {
        let bp = PluginBlueprint::new("aufx", "dely", "appl", "AUDelay");
        let plugins = TestPlugins::new().with(Plugin::new(bp.clone(), vec![]));
        plugins.set_unresponsive("AUDelay");
        assert!(matches!(
            plugins.introspect(&bp),
            Err(PluginError::Unresponsive { .. })
        ));
    }
}
