//! Device backends: the per-device I/O the dispatcher drives.
//!
//! The core only depends on [`DeviceBackend`]; [`SimulatedDevice`] is the
//! in-memory implementation used by the CLI and the tests. It sleeps for a
//! configured latency in every phase and fails the phases it is told to.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::model::{Command, DeviceKind};

/// Lifecycle phase of a device interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Connect,
    Execute,
    Disconnect,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Connect => "connect",
            Phase::Execute => "execute",
            Phase::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// Per-kind device behaviour consumed by the registry and the dispatcher.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// The capability tag this backend implements.
    fn kind(&self) -> DeviceKind;

    /// One-time work performed while the device is being registered.
    async fn setup(&self) -> Result<()>;

    async fn connect(&self) -> Result<()>;

    async fn execute(&self, command: &Command) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Latency and failure injection for a [`SimulatedDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationProfile {
    pub setup_ms: u64,
    pub connect_ms: u64,
    pub execute_ms: u64,
    pub disconnect_ms: u64,
    /// Phases that always fail after their latency has elapsed.
    pub fail: Vec<Phase>,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            setup_ms: 500,
            connect_ms: 300,
            execute_ms: 500,
            disconnect_ms: 200,
            fail: Vec::new(),
        }
    }
}

impl SimulationProfile {
    /// A profile where every phase takes the same time.
    pub fn uniform(ms: u64) -> Self {
        Self {
            setup_ms: ms,
            connect_ms: ms,
            execute_ms: ms,
            disconnect_ms: ms,
            fail: Vec::new(),
        }
    }

    /// Typical latencies for a device kind.
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::HueLight => Self {
                setup_ms: 500,
                connect_ms: 200,
                execute_ms: 300,
                disconnect_ms: 100,
                fail: Vec::new(),
            },
            DeviceKind::SmartSpeaker => Self {
                setup_ms: 800,
                connect_ms: 400,
                execute_ms: 600,
                disconnect_ms: 200,
                fail: Vec::new(),
            },
            DeviceKind::SmartToilet => Self {
                setup_ms: 600,
                connect_ms: 300,
                execute_ms: 900,
                disconnect_ms: 150,
                fail: Vec::new(),
            },
        }
    }

    pub fn failing(mut self, phase: Phase) -> Self {
        if !self.fail.contains(&phase) {
            self.fail.push(phase);
        }
        self
    }

    pub fn latency(&self, phase: Phase) -> Duration {
        let ms = match phase {
            Phase::Setup => self.setup_ms,
            Phase::Connect => self.connect_ms,
            Phase::Execute => self.execute_ms,
            Phase::Disconnect => self.disconnect_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn fails(&self, phase: Phase) -> bool {
        self.fail.contains(&phase)
    }
}

/// In-memory device that only sleeps and logs.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    kind: DeviceKind,
    name: String,
    profile: SimulationProfile,
}

impl SimulatedDevice {
    pub fn new(kind: DeviceKind, name: impl Into<String>, profile: SimulationProfile) -> Self {
        Self {
            kind,
            name: name.into(),
            profile,
        }
    }

    async fn simulate(&self, phase: Phase) -> Result<()> {
        tokio::time::sleep(self.profile.latency(phase)).await;
        if self.profile.fails(phase) {
            bail!("{} {} failed (simulated)", self.name, phase);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceBackend for SimulatedDevice {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    async fn setup(&self) -> Result<()> {
        debug!("{}: setting up", self.name);
        self.simulate(Phase::Setup).await
    }

    async fn connect(&self) -> Result<()> {
        debug!("{}: connecting", self.name);
        self.simulate(Phase::Connect).await
    }

    async fn execute(&self, command: &Command) -> Result<()> {
        if command.kind.requires_payload() && command.payload.is_none() {
            bail!("{} requires a payload", command.kind);
        }
        debug!("{}: executing {}", self.name, command);
        self.simulate(Phase::Execute).await
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("{}: disconnecting", self.name);
        self.simulate(Phase::Disconnect).await
    }
}
