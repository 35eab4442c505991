// Core modules
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod model;
pub mod program;
pub mod registry;

// Re-export key types and functions
pub use config::{DeviceConfig, ProgramConfig, ScriptConfig, load_program};
pub use crate::core::{
    DispatchOutcome, Dispatcher, Node, Outcome, SequencePolicy, Task, parallel, sequence,
};
pub use device::{DeviceBackend, Phase, SimulatedDevice, SimulationProfile};
pub use error::{DispatchError, ErrorKind, RegistrationError, UnknownDeviceError};
pub use model::{Command, CommandKind, DeviceId, DeviceKind};
pub use program::{
    Program, ProgramReport, Registration, register_all, script_phase, sleep_phase, wake_phase,
};
pub use registry::{Device, DeviceDescriptor, DeviceRegistry};
