//! Stable device and channel identity
//!
//! Identity is a two-level tree: one root device node per configured
//! connection, and one node per channel that refers back to the root by id.
//! Identifiers never depend on display labels, so a channel renamed on the
//! device keeps its identity and only its display name changes.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod registry;

pub use registry::{DeviceRegistry, InMemoryRegistry};

use crate::errors::AppResult;
use crate::models::{ChannelRecord, DeviceInfo};

/// Namespace for all channel identifiers generated by this engine
const CHANNEL_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d7_5b80_a1e2_7c4d_0e9f_3b61);

/// Durable identity of the device: its id when it reports one, otherwise the
/// configured connection key
pub fn resolve_identity(info: Option<&DeviceInfo>, fallback_key: &str) -> String {
    info.and_then(reported_device_id)
        .map_or_else(|| fallback_key.to_string(), str::to_string)
}

fn reported_device_id(info: &DeviceInfo) -> Option<&str> {
    info.device_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Generate a deterministic UUID from ordered inputs.
///
/// Name-based (v5), so the same inputs produce the same id on every build and
/// platform.
///
/// ```rust
/// use energyme_sync::identity::generate_deterministic_uuid;
///
/// let a = generate_deterministic_uuid(&[&"192.168.1.76", &3]);
/// let b = generate_deterministic_uuid(&[&"192.168.1.76", &3]);
/// assert_eq!(a, b);
/// ```
pub fn generate_deterministic_uuid(inputs: &[&dyn std::fmt::Display]) -> Uuid {
    let name = inputs
        .iter()
        .map(|input| input.to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}");
    Uuid::new_v5(&CHANNEL_NAMESPACE, name.as_bytes())
}

/// Identity of one channel of a configured connection
pub fn channel_identity(connection_key: &str, channel_index: u8) -> Uuid {
    generate_deterministic_uuid(&[&connection_key, &"channel", &channel_index])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceNode {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelNode {
    pub id: Uuid,
    pub index: u8,
    /// Display name only
    pub label: String,
    /// Id of the root device this channel is reached through
    pub via_device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum IdentityChange {
    DeviceRegistered(DeviceNode),
    DeviceUpdated(DeviceNode),
    /// A provisional fallback root gave way to the reported device id
    DeviceReplaced {
        previous: String,
        device: DeviceNode,
    },
    ChannelAdded(ChannelNode),
    /// Channel moved under a new root, its own id is unchanged
    ChannelReparented(ChannelNode),
    ChannelRenamed {
        id: Uuid,
        index: u8,
        from: String,
        to: String,
    },
}

/// Identity state for one configured connection
#[derive(Debug, Clone, Serialize)]
pub struct IdentityModel {
    connection_key: String,
    root: Option<DeviceNode>,
    /// Root pinned from the connection key before any device id was seen
    provisional_root: bool,
    channels: BTreeMap<u8, ChannelNode>,
}

impl IdentityModel {
    pub fn new<S: Into<String>>(connection_key: S) -> Self {
        Self {
            connection_key: connection_key.into(),
            root: None,
            provisional_root: false,
            channels: BTreeMap::new(),
        }
    }

    pub fn connection_key(&self) -> &str {
        &self.connection_key
    }

    pub fn root(&self) -> Option<&DeviceNode> {
        self.root.as_ref()
    }

    pub fn channel(&self, index: u8) -> Option<&ChannelNode> {
        self.channels.get(&index)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelNode> {
        self.channels.values()
    }

    /// Bind device info to the root node.
    ///
    /// The root id is pinned by the first reported device id. A root pinned
    /// from the connection key fallback is replaced once an id is reported,
    /// and its channels move under the new root. After that, calls only
    /// refresh descriptive attributes and a different reported id is ignored.
    pub fn bind_device(&mut self, info: &DeviceInfo) -> Vec<IdentityChange> {
        let reported = reported_device_id(info).map(str::to_string);
        let node = DeviceNode {
            id: reported.clone().unwrap_or_else(|| self.connection_key.clone()),
            name: info
                .product_name
                .clone()
                .unwrap_or_else(|| format!("EnergyMe {}", self.connection_key)),
            manufacturer: info.manufacturer.clone(),
            model: info.chip_model.clone(),
            firmware_version: info.firmware_version.clone(),
        };

        let Some(root) = &self.root else {
            info!("Pinned device identity {}", node.id);
            self.provisional_root = reported.is_none();
            self.root = Some(node.clone());
            return vec![IdentityChange::DeviceRegistered(node)];
        };

        if self.provisional_root && reported.is_some() {
            return self.replace_root(node);
        }

        if reported.is_some() && node.id != root.id {
            warn!(
                "Device reported identity {} but {} is pinned for this connection, keeping {}",
                node.id, root.id, root.id
            );
        }
        let updated = DeviceNode {
            id: root.id.clone(),
            ..node
        };
        if updated == *root {
            return Vec::new();
        }
        self.root = Some(updated.clone());
        vec![IdentityChange::DeviceUpdated(updated)]
    }

    fn replace_root(&mut self, node: DeviceNode) -> Vec<IdentityChange> {
        let previous = self.root.as_ref().map(|r| r.id.clone()).unwrap_or_default();
        info!("Device identity {} replaces fallback {}", node.id, previous);
        let mut changes = vec![IdentityChange::DeviceReplaced {
            previous,
            device: node.clone(),
        }];
        for channel in self.channels.values_mut() {
            channel.via_device = node.id.clone();
            changes.push(IdentityChange::ChannelReparented(channel.clone()));
        }
        self.provisional_root = false;
        self.root = Some(node);
        changes
    }

    /// Root id, pinning the connection key fallback if no device info was
    /// ever bound
    fn ensure_root(&mut self, changes: &mut Vec<IdentityChange>) -> String {
        if let Some(root) = &self.root {
            return root.id.clone();
        }
        let node = DeviceNode {
            id: resolve_identity(None, &self.connection_key),
            name: format!("EnergyMe {}", self.connection_key),
            manufacturer: None,
            model: None,
            firmware_version: None,
        };
        info!("Pinned fallback device identity {}", node.id);
        let id = node.id.clone();
        self.provisional_root = true;
        self.root = Some(node.clone());
        changes.push(IdentityChange::DeviceRegistered(node));
        id
    }

    /// Register new channels and propagate label changes
    pub fn reconcile_channels(&mut self, records: &[ChannelRecord]) -> Vec<IdentityChange> {
        let mut changes = Vec::new();
        let root_id = self.ensure_root(&mut changes);

        for record in records {
            match self.channels.get_mut(&record.channel_index) {
                Some(node) if node.label != record.label => {
                    debug!(
                        "Channel {} renamed '{}' -> '{}'",
                        record.channel_index, node.label, record.label
                    );
                    changes.push(IdentityChange::ChannelRenamed {
                        id: node.id,
                        index: node.index,
                        from: std::mem::replace(&mut node.label, record.label.clone()),
                        to: record.label.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    let node = ChannelNode {
                        id: channel_identity(&self.connection_key, record.channel_index),
                        index: record.channel_index,
                        label: record.label.clone(),
                        via_device: root_id.clone(),
                    };
                    self.channels.insert(node.index, node.clone());
                    changes.push(IdentityChange::ChannelAdded(node));
                }
            }
        }
        changes
    }
}

/// Identity model shared by both pipelines, mirrored into a registry
pub struct IdentityTracker {
    model: Mutex<IdentityModel>,
    registry: Arc<dyn DeviceRegistry>,
}

impl IdentityTracker {
    pub fn new(model: IdentityModel, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            model: Mutex::new(model),
            registry,
        }
    }

    /// Current identity state
    pub fn snapshot(&self) -> IdentityModel {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn observe_device(&self, info: &DeviceInfo) -> AppResult<()> {
        self.transact(|model| model.bind_device(info))
    }

    pub fn observe_channels(&self, records: &[ChannelRecord]) -> AppResult<()> {
        self.transact(|model| model.reconcile_channels(records))
    }

    /// Work out changes on a copy of the model and keep the copy only once the
    /// registry accepted them, so a failed write is retried on the next poll
    fn transact<F>(&self, reconcile: F) -> AppResult<()>
    where
        F: FnOnce(&mut IdentityModel) -> Vec<IdentityChange>,
    {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = model.clone();
        let changes = reconcile(&mut next);
        if changes.is_empty() {
            return Ok(());
        }
        registry::apply_changes(self.registry.as_ref(), &changes)?;
        *model = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u8, label: &str) -> ChannelRecord {
        ChannelRecord {
            channel_index: index,
            active: true,
            label: label.to_string(),
            metrics: BTreeMap::new(),
        }
    }

    fn info_with_id(id: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            device_id: id.map(str::to_string),
            product_name: Some("EnergyMe - Home".to_string()),
            ..DeviceInfo::default()
        }
    }

    #[test]
    fn test_resolve_identity_prefers_device_id() {
        let info = info_with_id(Some("a1b2c3"));
        assert_eq!(resolve_identity(Some(&info), "192.168.1.76"), "a1b2c3");
        assert_eq!(resolve_identity(None, "192.168.1.76"), "192.168.1.76");
        let blank = info_with_id(Some("  "));
        assert_eq!(resolve_identity(Some(&blank), "192.168.1.76"), "192.168.1.76");
    }

    #[test]
    fn test_channel_identity_is_deterministic_and_distinct() {
        let a = channel_identity("192.168.1.76", 0);
        assert_eq!(a, channel_identity("192.168.1.76", 0));
        assert_ne!(a, channel_identity("192.168.1.76", 1));
        assert_ne!(a, channel_identity("192.168.1.77", 0));
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn test_root_identity_is_pinned() {
        let mut model = IdentityModel::new("192.168.1.76");
        assert!(matches!(
            model.bind_device(&info_with_id(Some("a1b2c3"))).as_slice(),
            [IdentityChange::DeviceRegistered(_)]
        ));
        model.bind_device(&info_with_id(Some("ffffff")));
        assert_eq!(model.root().map(|r| r.id.as_str()), Some("a1b2c3"));
        assert!(model.bind_device(&info_with_id(Some("a1b2c3"))).is_empty());
    }

    #[test]
    fn test_fallback_root_when_no_device_id() {
        let mut model = IdentityModel::new("energyme.local");
        model.bind_device(&info_with_id(None));
        assert_eq!(model.root().map(|r| r.id.as_str()), Some("energyme.local"));
        assert!(model.bind_device(&info_with_id(None)).is_empty());
    }

    #[test]
    fn test_reported_id_replaces_fallback_root() {
        let mut model = IdentityModel::new("192.168.1.76");
        model.reconcile_channels(&[record(0, "Main"), record(1, "Solar")]);
        let before = model.channel(1).cloned().unwrap();
        assert_eq!(before.via_device, "192.168.1.76");

        let changes = model.bind_device(&info_with_id(Some("a1b2c3")));
        assert!(matches!(
            &changes[0],
            IdentityChange::DeviceReplaced { previous, device } if previous == "192.168.1.76" && device.id == "a1b2c3"
        ));
        assert_eq!(changes.len(), 3);
        let after = model.channel(1).unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.via_device, "a1b2c3");

        // pinned for good now
        model.bind_device(&info_with_id(Some("ffffff")));
        assert_eq!(model.root().map(|r| r.id.as_str()), Some("a1b2c3"));
    }

    #[test]
    fn test_rename_keeps_identity() {
        let mut model = IdentityModel::new("192.168.1.76");
        model.bind_device(&info_with_id(Some("a1b2c3")));

        let added = model.reconcile_channels(&[record(0, "Main"), record(3, "Oven")]);
        assert_eq!(added.len(), 2);
        let original = model.channel(0).cloned().unwrap();
        assert_eq!(original.via_device, "a1b2c3");

        let changes = model.reconcile_channels(&[record(0, "Kitchen"), record(3, "Oven")]);
        assert_eq!(
            changes,
            vec![IdentityChange::ChannelRenamed {
                id: original.id,
                index: 0,
                from: "Main".to_string(),
                to: "Kitchen".to_string(),
            }]
        );
        let renamed = model.channel(0).unwrap();
        assert_eq!(renamed.id, original.id);
        assert_eq!(renamed.label, "Kitchen");
    }

    #[test]
    fn test_reconcile_before_bind_pins_fallback() {
        let mut model = IdentityModel::new("192.168.1.76");
        let changes = model.reconcile_channels(&[record(1, "Solar")]);
        assert!(matches!(changes[0], IdentityChange::DeviceRegistered(_)));
        assert_eq!(model.channel(1).unwrap().via_device, "192.168.1.76");
    }

    #[test]
    fn test_tracker_writes_to_registry() {
        let registry = Arc::new(InMemoryRegistry::default());
        let tracker = IdentityTracker::new(IdentityModel::new("192.168.1.76"), registry.clone());
        tracker.observe_device(&info_with_id(Some("a1b2c3"))).unwrap();
        tracker.observe_channels(&[record(0, "Main")]).unwrap();
        tracker.observe_channels(&[record(0, "Kitchen")]).unwrap();

        assert_eq!(registry.devices().len(), 1);
        let channels = registry.channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].label, "Kitchen");
        assert_eq!(channels[0].id, channel_identity("192.168.1.76", 0));
    }

    /// Registry that rejects the next rename it receives
    #[derive(Default)]
    struct FlakyRegistry {
        inner: InMemoryRegistry,
        fail_next_rename: std::sync::atomic::AtomicBool,
    }

    impl DeviceRegistry for FlakyRegistry {
        fn upsert_device(&self, device: &DeviceNode) -> AppResult<()> {
            self.inner.upsert_device(device)
        }

        fn remove_device(&self, id: &str) -> AppResult<()> {
            self.inner.remove_device(id)
        }

        fn upsert_channel(&self, channel: &ChannelNode) -> AppResult<()> {
            self.inner.upsert_channel(channel)
        }

        fn rename_channel(&self, id: Uuid, label: &str) -> AppResult<()> {
            if self.fail_next_rename.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::errors::AppError::internal("registry unavailable"));
            }
            self.inner.rename_channel(id, label)
        }
    }

    #[test]
    fn test_failed_registry_write_is_retried() {
        let registry = Arc::new(FlakyRegistry::default());
        let tracker = IdentityTracker::new(IdentityModel::new("192.168.1.76"), registry.clone());
        tracker.observe_channels(&[record(0, "Kitchen")]).unwrap();

        registry.fail_next_rename.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(tracker.observe_channels(&[record(0, "Pantry")]).is_err());
        assert_eq!(tracker.snapshot().channel(0).unwrap().label, "Kitchen");
        assert_eq!(registry.inner.channels()[0].label, "Kitchen");

        tracker.observe_channels(&[record(0, "Pantry")]).unwrap();
        assert_eq!(tracker.snapshot().channel(0).unwrap().label, "Pantry");
        assert_eq!(registry.inner.channels()[0].label, "Pantry");
    }
}
