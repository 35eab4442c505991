use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::device::{DeviceBackend, SimulatedDevice, SimulationProfile};
use crate::error::{RegistrationError, UnknownDeviceError};
use crate::model::{DeviceId, DeviceKind};

/// Everything needed to register a device.
#[derive(Clone)]
pub struct DeviceDescriptor {
    pub label: String,
    pub kind: DeviceKind,
    pub backend: Arc<dyn DeviceBackend>,
}

impl DeviceDescriptor {
    pub fn new(label: impl Into<String>, kind: DeviceKind, backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            label: label.into(),
            kind,
            backend,
        }
    }

    /// Descriptor backed by a [`SimulatedDevice`] with the given profile.
    pub fn simulated(label: impl Into<String>, kind: DeviceKind, profile: SimulationProfile) -> Self {
        let label = label.into();
        let backend = SimulatedDevice::new(kind, label.clone(), profile);
        Self::new(label, kind, Arc::new(backend))
    }

    fn validate(&self) -> Result<(), RegistrationError> {
        if self.label.trim().is_empty() {
            return Err(RegistrationError::EmptyLabel);
        }
        let actual = self.backend.kind();
        if actual != self.kind {
            return Err(RegistrationError::KindMismatch {
                label: self.label.clone(),
                declared: self.kind,
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A registered device. Immutable once stored.
pub struct Device {
    pub id: DeviceId,
    pub label: String,
    pub kind: DeviceKind,
    pub backend: Arc<dyn DeviceBackend>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Default)]
struct Slots {
    devices: BTreeMap<DeviceId, Arc<Device>>,
    next_id: u64,
}

/// Registry of known devices, shared by reference between the dispatcher
/// and whoever registers devices.
///
/// Setup latency runs outside the lock; only the id assignment and insert
/// happen under it, so concurrent registrations of different devices
/// overlap and each device becomes visible before its id is returned.
#[derive(Default)]
pub struct DeviceRegistry {
    slots: RwLock<Slots>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, descriptor: DeviceDescriptor) -> Result<DeviceId, RegistrationError> {
        descriptor.validate()?;

        debug!("Setting up device '{}' ({})", descriptor.label, descriptor.kind);
        if let Err(e) = descriptor.backend.setup().await {
            warn!("Setup of device '{}' failed: {:#}", descriptor.label, e);
            return Err(RegistrationError::Setup {
                label: descriptor.label,
                reason: format!("{e:#}"),
            });
        }

        let mut slots = self.slots.write().await;
        let id = DeviceId(slots.next_id);
        slots.next_id += 1;
        slots.devices.insert(
            id,
            Arc::new(Device {
                id,
                label: descriptor.label,
                kind: descriptor.kind,
                backend: descriptor.backend,
            }),
        );
        drop(slots);

        info!("Registered device {}", id);
        Ok(id)
    }

    pub async fn lookup(&self, id: DeviceId) -> Result<Arc<Device>, UnknownDeviceError> {
        self.slots
            .read()
            .await
            .devices
            .get(&id)
            .cloned()
            .ok_or(UnknownDeviceError(id))
    }

    /// All registered devices in id order.
    pub async fn devices(&self) -> Vec<Arc<Device>> {
        self.slots.read().await.devices.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Phase;

    fn light(label: &str) -> DeviceDescriptor {
        DeviceDescriptor::simulated(label, DeviceKind::HueLight, SimulationProfile::uniform(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_lookup() {
        let registry = DeviceRegistry::new();
        let id = registry.register(light("lamp")).await.unwrap();

        let device = registry.lookup(id).await.unwrap();
        assert_eq!(device.id, id);
        assert_eq!(device.label, "lamp");
        assert_eq!(device.kind, DeviceKind::HueLight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_registration_distinct_ids() {
        let registry = Arc::new(DeviceRegistry::new());
        let start = tokio::time::Instant::now();

        let (a, b) = tokio::join!(registry.register(light("a")), registry.register(light("b")));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        assert_eq!(registry.lookup(a).await.unwrap().label, "a");
        assert_eq!(registry.lookup(b).await.unwrap().label, "b");
        assert_eq!(registry.len().await, 2);
        // setup latencies overlapped
        assert_eq!(start.elapsed(), std::time::Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_are_monotonic() {
        let registry = DeviceRegistry::new();
        let first = registry.register(light("one")).await.unwrap();
        let second = registry.register(light("two")).await.unwrap();
        assert!(second > first);

        let ids: Vec<_> = registry.devices().await.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let registry = DeviceRegistry::new();
        let err = registry.register(light("  ")).await.unwrap_err();
        assert_eq!(err, RegistrationError::EmptyLabel);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let registry = DeviceRegistry::new();
        let mut descriptor = light("lamp");
        descriptor.kind = DeviceKind::SmartToilet;
        let err = registry.register(descriptor).await.unwrap_err();
        assert!(matches!(err, RegistrationError::KindMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_setup_leaves_registry_usable() {
        let registry = DeviceRegistry::new();
        let broken = DeviceDescriptor::simulated(
            "broken",
            DeviceKind::SmartSpeaker,
            SimulationProfile::uniform(5).failing(Phase::Setup),
        );
        let err = registry.register(broken).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Setup { ref label, .. } if label == "broken"));

        let id = registry.register(light("lamp")).await.unwrap();
        assert_eq!(id, DeviceId(0));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown() {
        let registry = DeviceRegistry::new();
        let err = registry.lookup(DeviceId(42)).await.unwrap_err();
        assert_eq!(err, UnknownDeviceError(DeviceId(42)));
    }
}
