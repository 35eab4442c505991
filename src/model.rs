use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle for a registered device.
///
/// Identifiers are handed out by the registry in strictly increasing order
/// and are never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

/// Capability tag of a device: decides which commands it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    HueLight,
    SmartSpeaker,
    SmartToilet,
}

impl DeviceKind {
    pub fn accepts(&self, command: CommandKind) -> bool {
        use CommandKind::*;
        match self {
            DeviceKind::HueLight => matches!(command, SwitchOn | SwitchOff | ChangeColor),
            DeviceKind::SmartSpeaker => matches!(command, SwitchOn | SwitchOff | PlaySong),
            DeviceKind::SmartToilet => matches!(command, Flush | Clean),
        }
    }

    /// Default display label used when a program does not name the device.
    pub fn default_label(&self) -> &'static str {
        match self {
            DeviceKind::HueLight => "Hue Light",
            DeviceKind::SmartSpeaker => "Smart Speaker",
            DeviceKind::SmartToilet => "Smart Toilet",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::HueLight => "hue_light",
            DeviceKind::SmartSpeaker => "smart_speaker",
            DeviceKind::SmartToilet => "smart_toilet",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SwitchOn,
    SwitchOff,
    ChangeColor,
    PlaySong,
    Flush,
    Clean,
}

impl CommandKind {
    /// Whether the command is meaningless without a payload.
    pub fn requires_payload(&self) -> bool {
        matches!(self, CommandKind::ChangeColor | CommandKind::PlaySong)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::SwitchOn => "switch_on",
            CommandKind::SwitchOff => "switch_off",
            CommandKind::ChangeColor => "change_color",
            CommandKind::PlaySong => "play_song",
            CommandKind::Flush => "flush",
            CommandKind::Clean => "clean",
        };
        f.write_str(name)
    }
}

/// A single request against one device. Value object, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, payload: None }
    }

    pub fn with_payload(kind: CommandKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: Some(payload.into()),
        }
    }

    pub fn switch_on() -> Self {
        Self::new(CommandKind::SwitchOn)
    }

    pub fn switch_off() -> Self {
        Self::new(CommandKind::SwitchOff)
    }

    pub fn play_song(title: impl Into<String>) -> Self {
        Self::with_payload(CommandKind::PlaySong, title)
    }

    pub fn change_color(color: impl Into<String>) -> Self {
        Self::with_payload(CommandKind::ChangeColor, color)
    }

    pub fn flush() -> Self {
        Self::new(CommandKind::Flush)
    }

    pub fn clean() -> Self {
        Self::new(CommandKind::Clean)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{}({})", self.kind, payload),
            None => write!(f, "{}", self.kind),
        }
    }
}
