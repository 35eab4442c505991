use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf};
use tracing::{debug, info};

use crate::device::SimulationProfile;
use crate::model::{Command, DeviceKind};

/// Program file: the devices to register and the commands of each phase.
///
/// A phase either comes from the devices' own `wake` / `sleep` lists (each
/// device in order, devices side by side) or, when `wake_script` /
/// `sleep_script` is set, from that explicit tree, which can order commands
/// across devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub devices: Vec<DeviceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_script: Option<ScriptConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_script: Option<ScriptConfig>,
}

/// Composition tree over devices referenced by label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptConfig {
    Command { device: String, command: Command },
    Sequence { steps: Vec<ScriptConfig> },
    Parallel { steps: Vec<ScriptConfig> },
}

impl ScriptConfig {
    pub fn command(device: impl Into<String>, command: Command) -> Self {
        ScriptConfig::Command {
            device: device.into(),
            command,
        }
    }

    pub fn sequence(steps: Vec<ScriptConfig>) -> Self {
        ScriptConfig::Sequence { steps }
    }

    pub fn parallel(steps: Vec<ScriptConfig>) -> Self {
        ScriptConfig::Parallel { steps }
    }

    fn for_each_device<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            ScriptConfig::Command { device, .. } => f(device),
            ScriptConfig::Sequence { steps } | ScriptConfig::Parallel { steps } => {
                for step in steps {
                    step.for_each_device(f);
                }
            }
        }
    }

    fn expand(self) -> Self {
        match self {
            ScriptConfig::Command { device, mut command } => {
                if let Some(payload) = command.payload.as_mut() {
                    *payload = expand_env_vars(payload);
                }
                ScriptConfig::Command {
                    device: expand_env_vars(&device),
                    command,
                }
            }
            ScriptConfig::Sequence { steps } => {
                ScriptConfig::Sequence { steps: steps.into_iter().map(Self::expand).collect() }
            }
            ScriptConfig::Parallel { steps } => {
                ScriptConfig::Parallel { steps: steps.into_iter().map(Self::expand).collect() }
            }
        }
    }
}

impl ProgramConfig {
    /// Labels must be unique and every script must name configured devices.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut labels = std::collections::HashSet::new();
        for device in &self.devices {
            let label = device.label();
            if !labels.insert(label.clone()) {
                anyhow::bail!("Duplicate device label `{}`", label);
            }
        }

        let mut unknown = None;
        for script in self.wake_script.iter().chain(self.sleep_script.iter()) {
            script.for_each_device(&mut |device| {
                if !labels.contains(device) && unknown.is_none() {
                    unknown = Some(device.to_string());
                }
            });
        }
        if let Some(device) = unknown {
            anyhow::bail!("Script refers to unknown device `{}`", device);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display label; falls back to the kind's default label.
    #[serde(default)]
    pub label: Option<String>,
    pub kind: DeviceKind,
    /// Latency and failure injection; falls back to the kind's typical profile.
    #[serde(default)]
    pub simulation: Option<SimulationProfile>,
    /// Commands run in order when the program wakes the device.
    #[serde(default)]
    pub wake: Vec<Command>,
    /// Commands run when the program puts the device to sleep.
    #[serde(default)]
    pub sleep: Vec<Command>,
}

impl DeviceConfig {
    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.kind.default_label().to_string())
    }

    pub fn profile(&self) -> SimulationProfile {
        self.simulation
            .clone()
            .unwrap_or_else(|| SimulationProfile::for_kind(self.kind))
    }
}

impl Default for ProgramConfig {
    /// Switch on light and speaker in parallel, then play a song. On sleep,
    /// switch both off in parallel, then flush and clean the toilet.
    fn default() -> Self {
        let light = DeviceKind::HueLight.default_label();
        let speaker = DeviceKind::SmartSpeaker.default_label();
        let toilet = DeviceKind::SmartToilet.default_label();

        let device = |kind| DeviceConfig {
            label: None,
            kind,
            simulation: None,
            wake: Vec::new(),
            sleep: Vec::new(),
        };

        Self {
            devices: vec![
                device(DeviceKind::HueLight),
                device(DeviceKind::SmartSpeaker),
                device(DeviceKind::SmartToilet),
            ],
            wake_script: Some(ScriptConfig::sequence(vec![
                ScriptConfig::parallel(vec![
                    ScriptConfig::command(light, Command::switch_on()),
                    ScriptConfig::command(speaker, Command::switch_on()),
                ]),
                ScriptConfig::command(
                    speaker,
                    Command::play_song("Rick Astley - Never Gonna Give You Up"),
                ),
            ])),
            sleep_script: Some(ScriptConfig::sequence(vec![
                ScriptConfig::parallel(vec![
                    ScriptConfig::command(light, Command::switch_off()),
                    ScriptConfig::command(speaker, Command::switch_off()),
                ]),
                ScriptConfig::sequence(vec![
                    ScriptConfig::command(toilet, Command::flush()),
                    ScriptConfig::command(toilet, Command::clean()),
                ]),
            ])),
        }
    }
}

/// Finds a program file: `IOT_CONFIG`, then the XDG config dir, then
/// `./program.json`. `None` means the built-in program should be used.
pub fn resolve_program_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("IOT_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("iot-orchestrator").join("program.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("program.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Replaces `${NAME}` with the value of the environment variable `NAME`.
/// Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

fn expand_device(cfg: DeviceConfig) -> DeviceConfig {
    let mut cfg = cfg;

    if let Some(label) = cfg.label.as_mut() {
        *label = expand_env_vars(label);
    }
    for command in cfg.wake.iter_mut().chain(cfg.sleep.iter_mut()) {
        if let Some(payload) = command.payload.as_mut() {
            *payload = expand_env_vars(payload);
        }
    }

    cfg
}

pub fn parse_program(raw: &str) -> anyhow::Result<ProgramConfig> {
    let cfg: ProgramConfig = serde_json::from_str(raw)?;
    let cfg = ProgramConfig {
        devices: cfg.devices.into_iter().map(expand_device).collect(),
        wake_script: cfg.wake_script.map(ScriptConfig::expand),
        sleep_script: cfg.sleep_script.map(ScriptConfig::expand),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Loads the program from `path`, or from the resolved location when no path
/// is given, or falls back to the built-in program.
pub fn load_program(path: Option<&Path>) -> anyhow::Result<ProgramConfig> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => resolve_program_path(),
    };

    let Some(path) = path else {
        debug!("No program file found, using the built-in program");
        return Ok(ProgramConfig::default());
    };

    info!("Loading program from {}", path.display());
    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    parse_program(&raw)
}
