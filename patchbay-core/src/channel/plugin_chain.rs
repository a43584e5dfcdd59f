//! Ordered plugin instances on one channel, and address-keyed parameter restore.

use patchbay_audio::NodeHandle;
use patchbay_types::{
    ChannelKind, Parameter, ParameterValue, PluginBlueprint, PluginCategory, PluginInstanceId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PluginInstance {
    pub id: PluginInstanceId,
    pub blueprint: PluginBlueprint,
    pub bypassed: bool,
    /// False whenever the native unit could not be instantiated.
    pub installed: bool,
    /// Live parameter set from the last introspection. Empty when not installed.
    pub parameters: Vec<Parameter>,
    pub(crate) unit: Option<NodeHandle>,
    /// Values carried over from a saved document while the plugin is missing.
    pub(crate) saved: Vec<ParameterValue>,
}

impl PluginInstance {
    pub(crate) fn loaded(
        id: PluginInstanceId,
        blueprint: PluginBlueprint,
        unit: NodeHandle,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            id,
            blueprint,
            bypassed: false,
            installed: true,
            parameters,
            unit: Some(unit),
            saved: Vec::new(),
        }
    }

    pub(crate) fn missing(
        id: PluginInstanceId,
        blueprint: PluginBlueprint,
        saved: Vec<ParameterValue>,
    ) -> Self {
        Self {
            id,
            blueprint,
            bypassed: false,
            installed: false,
            parameters: Vec::new(),
            unit: None,
            saved,
        }
    }

    /// Whether audio flows through this plugin's unit.
    pub fn is_active(&self) -> bool {
        self.installed && !self.bypassed && self.unit.is_some()
    }

    pub fn parameter(&self, address: u64) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.address == address)
    }

    /// The values to persist: live values when installed, otherwise whatever
    /// was loaded so a later save does not lose them.
    pub fn saved_values(&self) -> Vec<ParameterValue> {
        if self.installed {
            self.parameters
                .iter()
                .map(|p| ParameterValue {
                    address: p.address,
                    value: p.current,
                })
                .collect()
        } else {
            self.saved.clone()
        }
    }
}

/// Apply `saved` to `live` by address. Positions are ignored: live parameters
/// without a saved value keep their defaults, saved values without a live
/// parameter are dropped. Returns the values applied.
pub fn restore_parameters(live: &mut [Parameter], saved: &[ParameterValue]) -> Vec<ParameterValue> {
    let mut applied = Vec::new();
    for param in live.iter_mut() {
        let Some(value) = saved.iter().find(|v| v.address == param.address) else {
            continue;
        };
        if !param.writable || !param.contains(value.value) {
            log::debug!(
                target: "persistence",
                "skipping saved value {} for parameter {} ({})",
                value.value,
                param.address,
                param.display_name
            );
            continue;
        }
        param.current = value.value;
        applied.push(*value);
    }
    applied
}

/// Whether a plugin of `category` may sit at `slot` on a channel of `kind`.
pub(crate) fn check_slot(
    kind: ChannelKind,
    category: PluginCategory,
    slot: usize,
) -> Result<(), &'static str> {
    match (kind, category) {
        (ChannelKind::Playback, _) => Err("playback channels have no plugin chain"),
        (ChannelKind::MidiInput, PluginCategory::Instrument) if slot == 0 => Ok(()),
        (ChannelKind::MidiInput, PluginCategory::Instrument) => Err("an instrument must be at slot 0"),
        (_, PluginCategory::Instrument) => Err("only MIDI input channels host instruments"),
        (ChannelKind::MidiInput, PluginCategory::MidiProcessor) => Ok(()),
        (_, PluginCategory::MidiProcessor) => Err("only MIDI input channels host MIDI processors"),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginChain {
    instances: Vec<PluginInstance>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginInstance> {
        self.instances.iter()
    }

    pub fn get(&self, id: PluginInstanceId) -> Option<&PluginInstance> {
        self.instances.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: PluginInstanceId) -> Option<&mut PluginInstance> {
        self.instances.iter_mut().find(|p| p.id == id)
    }

    pub fn position(&self, id: PluginInstanceId) -> Option<usize> {
        self.instances.iter().position(|p| p.id == id)
    }

    /// Units audio currently flows through, in chain order.
    pub fn active_units(&self) -> Vec<NodeHandle> {
        self.instances
            .iter()
            .filter(|p| p.is_active())
            .filter_map(|p| p.unit)
            .collect()
    }

    /// Check that inserting `category` at `position` keeps every slot valid.
    pub(crate) fn check_insert(
        &self,
        kind: ChannelKind,
        category: PluginCategory,
        position: usize,
    ) -> Result<(), &'static str> {
        let mut order: Vec<PluginCategory> = self
            .instances
            .iter()
            .map(|p| p.blueprint.category())
            .collect();
        order.insert(position, category);
        check_order(kind, &order)
    }

    /// Check that moving `id` to `position` keeps every slot valid.
    pub(crate) fn check_move(
        &self,
        kind: ChannelKind,
        id: PluginInstanceId,
        position: usize,
    ) -> Result<(), &'static str> {
        let Some(from) = self.position(id) else {
            return Ok(());
        };
        let mut order: Vec<PluginCategory> = self
            .instances
            .iter()
            .map(|p| p.blueprint.category())
            .collect();
        let moved = order.remove(from);
        order.insert(position, moved);
        check_order(kind, &order)
    }

    pub(crate) fn insert(&mut self, position: usize, instance: PluginInstance) {
        let position = position.min(self.instances.len());
        self.instances.insert(position, instance);
    }

    pub(crate) fn push(&mut self, instance: PluginInstance) {
        self.instances.push(instance);
    }

    pub(crate) fn remove(&mut self, id: PluginInstanceId) -> Option<PluginInstance> {
        let index = self.position(id)?;
        Some(self.instances.remove(index))
    }

    pub(crate) fn move_to(&mut self, id: PluginInstanceId, position: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let instance = self.instances.remove(from);
        let position = position.min(self.instances.len());
        self.instances.insert(position, instance);
        true
    }

    pub(crate) fn drain(&mut self) -> Vec<PluginInstance> {
        std::mem::take(&mut self.instances)
    }

    /// The installed instrument at slot 0, if any.
    pub fn instrument(&self) -> Option<&PluginInstance> {
        self.instances
            .first()
            .filter(|p| p.installed && p.blueprint.category() == PluginCategory::Instrument)
    }
}

fn check_order(kind: ChannelKind, order: &[PluginCategory]) -> Result<(), &'static str> {
    order
        .iter()
        .enumerate()
        .try_for_each(|(slot, category)| check_slot(kind, *category, slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay() -> PluginBlueprint {
        PluginBlueprint::new("aufx", "dely", "appl", "AUDelay")
    }

    fn synth() -> PluginBlueprint {
        PluginBlueprint::new("aumu", "dls ", "appl", "DLSMusicDevice")
    }

    #[test]
    fn restore_matches_by_address_not_position() {
        // Saved against v1: [7, 12]. v2 reorders to [12, 3, 7].
        let saved = vec![
            ParameterValue { address: 7, value: 0.42 },
            ParameterValue { address: 12, value: 0.9 },
        ];
        let mut live = vec![
            Parameter::new(12, "Mix", 0.0, 1.0, 0.5),
            Parameter::new(3, "Feedback", 0.0, 1.0, 0.2),
            Parameter::new(7, "Time", 0.0, 1.0, 0.1),
        ];

        let applied = restore_parameters(&mut live, &saved);

        assert_eq!(applied.len(), 2);
        assert_eq!(live[0].current, 0.9);
        assert_eq!(live[1].current, 0.2);
        assert_eq!(live[2].current, 0.42);
    }

    #[test]
    fn restore_drops_unknown_and_invalid_values() {
        let saved = vec![
            ParameterValue { address: 99, value: 0.5 },
            ParameterValue { address: 1, value: 7.0 },
        ];
        let mut live = vec![Parameter::new(1, "Gain", 0.0, 1.0, 0.3)];
        assert!(restore_parameters(&mut live, &saved).is_empty());
        assert_eq!(live[0].current, 0.3);
    }

    #[test]
    fn read_only_parameters_are_not_restored() {
        let mut param = Parameter::new(1, "Meter", 0.0, 1.0, 0.0);
        param.writable = false;
        let mut live = vec![param];
        let saved = vec![ParameterValue { address: 1, value: 0.5 }];
        assert!(restore_parameters(&mut live, &saved).is_empty());
    }

    #[test]
    fn missing_plugin_keeps_saved_values() {
        let saved = vec![ParameterValue { address: 4, value: 0.25 }];
        let instance = PluginInstance::missing(PluginInstanceId::new(1), delay(), saved.clone());
        assert!(!instance.is_active());
        assert_eq!(instance.saved_values(), saved);
    }

    #[test]
    fn instruments_only_at_slot_zero_of_midi_channels() {
        let chain = PluginChain::new();
        assert!(chain
            .check_insert(ChannelKind::MidiInput, PluginCategory::Instrument, 0)
            .is_ok());
        assert!(chain
            .check_insert(ChannelKind::AudioInput, PluginCategory::Instrument, 0)
            .is_err());
        assert!(chain
            .check_insert(ChannelKind::Playback, PluginCategory::Effect, 0)
            .is_err());

        let mut chain = PluginChain::new();
        chain.push(PluginInstance::missing(PluginInstanceId::new(1), synth(), vec![]));
        // An effect in front would push the instrument off slot 0.
        assert!(chain
            .check_insert(ChannelKind::MidiInput, PluginCategory::Effect, 0)
            .is_err());
        assert!(chain
            .check_insert(ChannelKind::MidiInput, PluginCategory::Effect, 1)
            .is_ok());
    }

    #[test]
    fn move_reorders_and_active_units_skip_bypassed() {
        let mut chain = PluginChain::new();
        let a = PluginInstanceId::new(1);
        let b = PluginInstanceId::new(2);
        chain.push(PluginInstance::loaded(a, delay(), NodeHandle::new(10), vec![]));
        chain.push(PluginInstance::loaded(b, delay(), NodeHandle::new(11), vec![]));

        assert!(chain.move_to(b, 0));
        assert_eq!(chain.position(b), Some(0));
        assert_eq!(chain.active_units(), vec![NodeHandle::new(11), NodeHandle::new(10)]);

        chain.get_mut(b).unwrap().bypassed = true;
        assert_eq!(chain.active_units(), vec![NodeHandle::new(10)]);
    }
}
