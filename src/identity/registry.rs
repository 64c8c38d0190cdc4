use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChannelNode, DeviceNode, IdentityChange};
use crate::errors::{AppError, AppResult};

/// Store the engine writes device and channel identity records into
pub trait DeviceRegistry: Send + Sync {
    fn upsert_device(&self, device: &DeviceNode) -> AppResult<()>;

    fn remove_device(&self, id: &str) -> AppResult<()>;

    fn upsert_channel(&self, channel: &ChannelNode) -> AppResult<()>;

    /// Update a channel's display name, its identity is unchanged
    fn rename_channel(&self, id: Uuid, label: &str) -> AppResult<()>;
}

pub fn apply_changes(registry: &dyn DeviceRegistry, changes: &[IdentityChange]) -> AppResult<()> {
    for change in changes {
        match change {
            IdentityChange::DeviceRegistered(device) | IdentityChange::DeviceUpdated(device) => {
                registry.upsert_device(device)?
            }
            IdentityChange::DeviceReplaced { previous, device } => {
                registry.upsert_device(device)?;
                registry.remove_device(previous)?
            }
            IdentityChange::ChannelReparented(channel) => registry.upsert_channel(channel)?,
            IdentityChange::ChannelAdded(channel) => {
                info!("Registered channel {} ({}) as {}", channel.index, channel.label, channel.id);
                registry.upsert_channel(channel)?
            }
            IdentityChange::ChannelRenamed { id, to, .. } => registry.rename_channel(*id, to)?,
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: BTreeMap<String, DeviceNode>,
    channels: BTreeMap<Uuid, ChannelNode>,
}

/// Process-local registry, used when no external store is attached
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn devices(&self) -> Vec<DeviceNode> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.devices.values().cloned().collect()
    }

    /// Channels ordered by index
    pub fn channels(&self) -> Vec<ChannelNode> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut channels: Vec<_> = state.channels.values().cloned().collect();
        channels.sort_by_key(|c| c.index);
        channels
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn upsert_device(&self, device: &DeviceNode) -> AppResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    fn remove_device(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.devices.remove(id);
        Ok(())
    }

    fn upsert_channel(&self, channel: &ChannelNode) -> AppResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    fn rename_channel(&self, id: Uuid, label: &str) -> AppResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let channel = state
            .channels
            .get_mut(&id)
            .ok_or_else(|| AppError::internal(format!("Rename of unregistered channel {id}")))?;
        debug!("Registry rename {} '{}' -> '{}'", id, channel.label, label);
        channel.label = label.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(index: u8, label: &str) -> ChannelNode {
        ChannelNode {
            id: super::super::channel_identity("host", index),
            index,
            label: label.to_string(),
            via_device: "host".to_string(),
        }
    }

    #[test]
    fn test_rename_unknown_channel_fails() {
        let registry = InMemoryRegistry::default();
        assert!(registry.rename_channel(Uuid::nil(), "Nope").is_err());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let registry = InMemoryRegistry::default();
        registry.upsert_channel(&channel(2, "Dryer")).unwrap();
        registry.upsert_channel(&channel(2, "Dryer")).unwrap();
        registry.upsert_channel(&channel(0, "Main")).unwrap();
        let labels: Vec<_> = registry.channels().into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["Main", "Dryer"]);
    }

    #[test]
    fn test_replaced_device_is_removed() {
        let registry = InMemoryRegistry::default();
        let device = |id: &str| DeviceNode {
            id: id.to_string(),
            name: "EnergyMe - Home".to_string(),
            manufacturer: None,
            model: None,
            firmware_version: None,
        };
        let mut moved = channel(0, "Main");
        apply_changes(
            &registry,
            &[IdentityChange::DeviceRegistered(device("host")), IdentityChange::ChannelAdded(moved.clone())],
        )
        .unwrap();

        moved.via_device = "a1b2c3".to_string();
        apply_changes(
            &registry,
            &[
                IdentityChange::DeviceReplaced {
                    previous: "host".to_string(),
                    device: device("a1b2c3"),
                },
                IdentityChange::ChannelReparented(moved),
            ],
        )
        .unwrap();

        let ids: Vec<_> = registry.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a1b2c3"]);
        assert_eq!(registry.channels()[0].via_device, "a1b2c3");
    }
}
