//! Register, wake and sleep scripts built from the composition engine.
//!
//! Registration fans out over every device. Waking runs each device's own
//! commands as a sequence while the devices run side by side; sleeping sends
//! every device its shutdown commands in parallel. A configured script
//! replaces either phase with an explicit tree that may order commands
//! across devices.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{DeviceConfig, ProgramConfig, ScriptConfig};
use crate::core::{Dispatcher, Node, Outcome, SequencePolicy, Task, parallel};
use crate::error::RegistrationError;
use crate::model::{Command, DeviceId, DeviceKind};
use crate::registry::{DeviceDescriptor, DeviceRegistry};

/// Registers every descriptor concurrently; results follow input order.
pub async fn register_all(
    registry: &Arc<DeviceRegistry>,
    descriptors: Vec<DeviceDescriptor>,
) -> Vec<Result<DeviceId, RegistrationError>> {
    parallel(descriptors.into_iter().map(|descriptor| {
        let registry = registry.clone();
        async move { registry.register(descriptor).await }
    }))
    .await
}

/// One sequence per device, all devices in parallel.
pub fn wake_phase(dispatcher: &Arc<Dispatcher>, scripts: &[(DeviceId, Vec<Command>)]) -> Node {
    Node::parallel(
        scripts
            .iter()
            .filter(|(_, commands)| !commands.is_empty())
            .map(|(device, commands)| {
                Node::sequence(
                    commands
                        .iter()
                        .map(|command| dispatcher.leaf(*device, command.clone()))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Shutdown commands for every device, in parallel. A device with more than
/// one command runs them in order.
pub fn sleep_phase(dispatcher: &Arc<Dispatcher>, scripts: &[(DeviceId, Vec<Command>)]) -> Node {
    Node::parallel(
        scripts
            .iter()
            .filter_map(|(device, commands)| match commands.as_slice() {
                [] => None,
                [command] => Some(dispatcher.leaf(*device, command.clone())),
                _ => Some(Node::sequence(
                    commands
                        .iter()
                        .map(|command| dispatcher.leaf(*device, command.clone()))
                        .collect(),
                )),
            })
            .collect(),
    )
}

/// Script step aimed at a device whose registration failed.
struct Unregistered {
    label: String,
    command: Command,
}

#[async_trait]
impl Task for Unregistered {
    async fn run(&self) -> Outcome {
        warn!("Skipping {} on '{}': device is not registered", self.command, self.label);
        Outcome::Skipped
    }
}

/// Turns a configured script into a node, resolving labels to registered ids.
pub fn script_phase(
    dispatcher: &Arc<Dispatcher>,
    script: &ScriptConfig,
    ids: &HashMap<String, DeviceId>,
) -> Node {
    match script {
        ScriptConfig::Command { device, command } => match ids.get(device) {
            Some(id) => dispatcher.leaf(*id, command.clone()),
            None => Node::leaf(Unregistered {
                label: device.clone(),
                command: command.clone(),
            }),
        },
        ScriptConfig::Sequence { steps } => Node::sequence(
            steps
                .iter()
                .map(|step| script_phase(dispatcher, step, ids))
                .collect(),
        ),
        ScriptConfig::Parallel { steps } => Node::parallel(
            steps
                .iter()
                .map(|step| script_phase(dispatcher, step, ids))
                .collect(),
        ),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub label: String,
    pub kind: DeviceKind,
    pub device: Option<DeviceId>,
    #[serde(serialize_with = "display_error")]
    pub error: Option<RegistrationError>,
}

fn display_error<S: serde::Serializer>(
    error: &Option<RegistrationError>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.collect_str(e),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramReport {
    pub registrations: Vec<Registration>,
    pub wake: Outcome,
    pub sleep: Outcome,
    #[serde(with = "millis")]
    pub register_elapsed: Duration,
    #[serde(with = "millis")]
    pub wake_elapsed: Duration,
    #[serde(with = "millis")]
    pub sleep_elapsed: Duration,
    #[serde(with = "millis")]
    pub total_elapsed: Duration,
}

impl ProgramReport {
    pub fn is_success(&self) -> bool {
        self.registrations.iter().all(|r| r.error.is_none())
            && self.wake.is_success()
            && self.sleep.is_success()
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}

fn wake_commands(device: &DeviceConfig) -> &Vec<Command> {
    &device.wake
}

fn sleep_commands(device: &DeviceConfig) -> &Vec<Command> {
    &device.sleep
}

/// A program loaded from configuration, ready to run against a fresh registry.
pub struct Program {
    config: ProgramConfig,
    policy: SequencePolicy,
}

impl Program {
    pub fn new(config: ProgramConfig) -> Self {
        Self {
            config,
            policy: SequencePolicy::FailSoft,
        }
    }

    pub fn with_policy(mut self, policy: SequencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    fn phase(
        &self,
        dispatcher: &Arc<Dispatcher>,
        registrations: &[Registration],
        script: Option<&ScriptConfig>,
        select: fn(&DeviceConfig) -> &Vec<Command>,
        per_device: fn(&Arc<Dispatcher>, &[(DeviceId, Vec<Command>)]) -> Node,
    ) -> Node {
        let node = match script {
            Some(script) => {
                let ids: HashMap<_, _> = registrations
                    .iter()
                    .filter_map(|r| r.device.map(|id| (r.label.clone(), id)))
                    .collect();
                script_phase(dispatcher, script, &ids)
            }
            None => per_device(dispatcher, &self.scripts(registrations, select)),
        };
        node.with_policy(self.policy)
    }

    fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.config
            .devices
            .iter()
            .map(|d| DeviceDescriptor::simulated(d.label(), d.kind, d.profile()))
            .collect()
    }

    /// Registers every configured device concurrently.
    pub async fn register(&self, registry: &Arc<DeviceRegistry>) -> Vec<Registration> {
        let results = register_all(registry, self.descriptors()).await;

        self.config
            .devices
            .iter()
            .zip(results)
            .map(|(cfg, result)| match result {
                Ok(id) => Registration {
                    label: cfg.label(),
                    kind: cfg.kind,
                    device: Some(id),
                    error: None,
                },
                Err(e) => {
                    warn!("Could not register '{}': {}", cfg.label(), e);
                    Registration {
                        label: cfg.label(),
                        kind: cfg.kind,
                        device: None,
                        error: Some(e),
                    }
                }
            })
            .collect()
    }

    /// Device scripts for registered devices only.
    fn scripts<F>(&self, registrations: &[Registration], select: F) -> Vec<(DeviceId, Vec<Command>)>
    where
        F: Fn(&DeviceConfig) -> &Vec<Command>,
    {
        self.config
            .devices
            .iter()
            .zip(registrations)
            .filter_map(|(cfg, reg)| reg.device.map(|id| (id, select(cfg).clone())))
            .collect()
    }

    pub async fn run(&self) -> ProgramReport {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let total = Instant::now();

        info!("Registering {} devices", self.config.devices.len());
        let start = Instant::now();
        let registrations = self.register(&registry).await;
        let register_elapsed = start.elapsed();

        info!("Waking devices");
        let start = Instant::now();
        let wake = self
            .phase(
                &dispatcher,
                &registrations,
                self.config.wake_script.as_ref(),
                wake_commands,
                wake_phase,
            )
            .execute()
            .await;
        let wake_elapsed = start.elapsed();

        info!("Putting devices to sleep");
        let start = Instant::now();
        let sleep = self
            .phase(
                &dispatcher,
                &registrations,
                self.config.sleep_script.as_ref(),
                sleep_commands,
                sleep_phase,
            )
            .execute()
            .await;
        let sleep_elapsed = start.elapsed();

        let total_elapsed = total.elapsed();
        info!("Program finished in {:?}", total_elapsed);

        ProgramReport {
            registrations,
            wake,
            sleep,
            register_elapsed,
            wake_elapsed,
            sleep_elapsed,
            total_elapsed,
        }
    }
}
