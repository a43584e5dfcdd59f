//! Shared native input nodes and bus allocation.

use std::collections::BTreeMap;

use patchbay_audio::{AudioFormat, NativeEngine, NativeResult, NodeHandle};
use patchbay_types::ChannelId;

use crate::channel::release_logged;

/// Lowest bus number not in `used`.
pub(crate) fn lowest_free_bus(used: impl IntoIterator<Item = u32>) -> u32 {
    let mut used: Vec<u32> = used.into_iter().collect();
    used.sort_unstable();
    used.dedup();
    let mut bus = 0;
    for u in used {
        if u == bus {
            bus += 1;
        } else if u > bus {
            break;
        }
    }
    bus
}

#[derive(Debug, Clone, PartialEq)]
struct SharedInput {
    node: NodeHandle,
    /// Output bus on `node` feeding each user.
    users: BTreeMap<ChannelId, u32>,
}

/// One native input node per `device:bus` key, shared by every AudioInput
/// channel bound to it and released with its last user.
#[derive(Debug, Default)]
pub struct InputNodeCache {
    entries: BTreeMap<String, SharedInput>,
}

impl InputNodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `key`, creating it on first use and fed from the hardware
    /// input's `hardware_bus`. Returns the node and the output bus reserved for `channel`.
    pub(crate) fn acquire(
        &mut self,
        native: &dyn NativeEngine,
        key: &str,
        hardware_bus: u32,
        channel: ChannelId,
        format: AudioFormat,
    ) -> NativeResult<(NodeHandle, u32)> {
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(bus) = entry.users.get(&channel) {
                return Ok((entry.node, *bus));
            }
            let bus = lowest_free_bus(entry.users.values().copied());
            entry.users.insert(channel, bus);
            return Ok((entry.node, bus));
        }

        let node = native.create_mixer_node()?;
        let hardware = native.input_node()?;
        if let Err(e) = native.connect(hardware, hardware_bus, node, 0, Some(format)) {
            release_logged(native, node);
            return Err(e);
        }
        log::debug!(target: "engine", "created shared input node {} for {}", node, key);
        let mut users = BTreeMap::new();
        users.insert(channel, 0);
        self.entries.insert(key.to_string(), SharedInput { node, users });
        Ok((node, 0))
    }

    /// Drop `channel`'s use of `key`, releasing the node when nobody uses it.
    pub(crate) fn release(&mut self, native: &dyn NativeEngine, key: &str, channel: ChannelId) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.users.remove(&channel);
        if entry.users.is_empty() {
            if let Some(entry) = self.entries.remove(key) {
                release_logged(native, entry.node);
                log::debug!(target: "engine", "released shared input node for {}", key);
            }
        }
    }

    pub fn node(&self, key: &str) -> Option<NodeHandle> {
        self.entries.get(key).map(|e| e.node)
    }

    pub fn users(&self, key: &str) -> Vec<ChannelId> {
        self.entries
            .get(key)
            .map(|e| e.users.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every key with its node and user count.
    pub fn entries(&self) -> Vec<(String, NodeHandle, usize)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.node, e.users.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_audio::{NativeOp, TestEngine};

    fn format() -> AudioFormat {
        AudioFormat::stereo(48_000.0)
    }

    #[test]
    fn lowest_free_bus_fills_gaps() {
        assert_eq!(lowest_free_bus(Vec::new()), 0);
        assert_eq!(lowest_free_bus([0, 1, 2]), 3);
        assert_eq!(lowest_free_bus([2, 0, 3]), 1);
        assert_eq!(lowest_free_bus([1, 1]), 0);
    }

    #[test]
    fn same_key_shares_one_node() {
        let engine = TestEngine::new();
        let mut cache = InputNodeCache::new();
        let a = ChannelId::new(1);
        let b = ChannelId::new(2);

        let (node_a, bus_a) = cache.acquire(&engine, "usb:0", 0, a, format()).unwrap();
        let (node_b, bus_b) = cache.acquire(&engine, "usb:0", 0, b, format()).unwrap();

        assert_eq!(node_a, node_b);
        assert_ne!(bus_a, bus_b);
        assert_eq!(cache.len(), 1);
        assert_eq!(engine.count(|op| matches!(op, NativeOp::CreateMixer(_))), 1);
        assert_eq!(engine.feeding(node_a, 0), Some(TestEngine::INPUT_NODE));
    }

    #[test]
    fn last_user_releases_the_node() {
        let engine = TestEngine::new();
        let mut cache = InputNodeCache::new();
        let (node, _) = cache
            .acquire(&engine, "usb:1", 1, ChannelId::new(1), format())
            .unwrap();
        cache
            .acquire(&engine, "usb:1", 1, ChannelId::new(2), format())
            .unwrap();

        cache.release(&engine, "usb:1", ChannelId::new(1));
        assert_eq!(cache.node("usb:1"), Some(node));

        cache.release(&engine, "usb:1", ChannelId::new(2));
        assert!(cache.is_empty());
        assert!(engine.find(|op| *op == NativeOp::ReleaseNode(node)).is_some());
    }
}
