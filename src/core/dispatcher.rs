// Command dispatch against registered devices

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::compose::{Node, Outcome, Task};
use crate::error::DispatchError;
use crate::model::{Command, DeviceId};
use crate::registry::{Device, DeviceRegistry};

/// Result of one dispatched command.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub device: DeviceId,
    /// Label of the device, `None` when the id was never registered.
    pub label: Option<String>,
    pub command: Command,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub result: Result<(), DispatchError>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.result.as_ref().err()
    }
}

impl Serialize for DispatchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DispatchOutcome", 7)?;
        s.serialize_field("device", &self.device)?;
        s.serialize_field("label", &self.label)?;
        s.serialize_field("command", &self.command)?;
        s.serialize_field("started_at", &self.started_at)?;
        s.serialize_field("elapsed_ms", &(self.elapsed.as_secs_f64() * 1000.0))?;
        s.serialize_field("error_kind", &self.error().map(DispatchError::kind))?;
        s.serialize_field("error", &self.error().map(ToString::to_string))?;
        s.end()
    }
}

/// Executes single commands through the connect, execute, disconnect
/// lifecycle.
///
/// Failures never escape as `Err`: they come back inside the
/// [`DispatchOutcome`]. The dispatcher does not serialize calls per device.
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, device: DeviceId, command: Command) -> DispatchOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let (label, result) = match self.registry.lookup(device).await {
            Ok(dev) => (Some(dev.label.clone()), Self::drive(&dev, &command).await),
            Err(e) => (None, Err(e.into())),
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(()) => info!("{} on {} done in {:?}", command, device, elapsed),
            Err(e) => warn!("{} on {} failed after {:?}: {}", command, device, elapsed, e),
        }

        DispatchOutcome {
            device,
            label,
            command,
            started_at,
            elapsed,
            result,
        }
    }

    async fn drive(device: &Device, command: &Command) -> Result<(), DispatchError> {
        let id = device.id;

        debug!("Connecting to {} ({})", id, device.label);
        device
            .backend
            .connect()
            .await
            .map_err(|e| DispatchError::Connection {
                device: id,
                reason: format!("{e:#}"),
            })?;

        let executed = if device.kind.accepts(command.kind) {
            device.backend.execute(command).await
        } else {
            Err(anyhow::anyhow!("{} does not support {}", device.kind, command.kind))
        };

        let disconnected = device.backend.disconnect().await;

        if let Err(e) = executed {
            if let Err(cleanup) = disconnected {
                warn!("Disconnect from {} after failed command also failed: {:#}", id, cleanup);
            }
            return Err(DispatchError::Execution {
                device: id,
                reason: format!("{e:#}"),
            });
        }

        disconnected.map_err(|e| DispatchError::Disconnection {
            device: id,
            reason: format!("{e:#}"),
        })
    }

    /// Leaf node dispatching `command` to `device` when executed.
    pub fn leaf(self: &Arc<Self>, device: DeviceId, command: Command) -> Node {
        Node::leaf(DispatchTask {
            dispatcher: self.clone(),
            device,
            command,
        })
    }
}

/// A single dispatch as a [`Task`].
pub struct DispatchTask {
    dispatcher: Arc<Dispatcher>,
    device: DeviceId,
    command: Command,
}

#[async_trait]
impl Task for DispatchTask {
    async fn run(&self) -> Outcome {
        Outcome::Dispatch(
            self.dispatcher
                .dispatch(self.device, self.command.clone())
                .await,
        )
    }
}
