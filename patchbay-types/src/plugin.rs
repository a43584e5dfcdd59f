use serde::{Deserialize, Serialize};

/// Identity of an installable plugin: component type/subtype/manufacturer codes plus a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginBlueprint {
    #[serde(rename = "type")]
    pub component_type: String,
    pub subtype: String,
    pub manufacturer: String,
    pub name: String,
}

impl PluginBlueprint {
    pub fn new(
        component_type: impl Into<String>,
        subtype: impl Into<String>,
        manufacturer: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            component_type: component_type.into(),
            subtype: subtype.into(),
            manufacturer: manufacturer.into(),
            name: name.into(),
        }
    }

    pub fn category(&self) -> PluginCategory {
        match self.component_type.as_str() {
            "aumu" => PluginCategory::Instrument,
            "aufx" | "aumf" => PluginCategory::Effect,
            "aumi" => PluginCategory::MidiProcessor,
            _ => PluginCategory::Other,
        }
    }

    /// Whether two blueprints name the same component, ignoring the display name.
    pub fn same_component(&self, other: &PluginBlueprint) -> bool {
        self.component_type == other.component_type
            && self.subtype == other.subtype
            && self.manufacturer == other.manufacturer
    }
}

impl std::fmt::Display for PluginBlueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}/{}/{})",
            self.name, self.component_type, self.subtype, self.manufacturer
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCategory {
    Instrument,
    Effect,
    MidiProcessor,
    Other,
}

/// A plugin parameter as reported by live introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Stable across plugin versions, unlike the parameter's list position.
    pub address: u64,
    #[serde(default)]
    pub identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub unit: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub current: f32,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default)]
    pub can_ramp: bool,
}

impl Parameter {
    pub fn new(address: u64, display_name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            address,
            identifier: String::new(),
            display_name: display_name.into(),
            unit: String::new(),
            min,
            max,
            default,
            current: default,
            writable: true,
            can_ramp: false,
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// A persisted parameter value, keyed by stable address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub address: u64,
    pub value: f32,
}

fn default_true() -> bool {
    true
}
