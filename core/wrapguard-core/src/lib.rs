//! Shared domain types, configuration, and error taxonomy for the
//! wrapguard safety/production supervisor. Every other crate in the
//! workspace depends on this one; it depends on nothing else in the
//! workspace.

pub mod addresses;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod frame;
pub mod machine;
pub mod modbus_types;
pub mod roi;
pub mod views;

pub use addresses::PulseCoil;
pub use config::WrapguardConfig;
pub use detection::{DetectionResult, Keypoint, ObbPolygon, ObbStickyState};
pub use error::CoreError;
pub use events::{Event, EventKind, RollSession};
pub use frame::Frame;
pub use machine::MachineId;
pub use modbus_types::{DiSnapshot, DoCommand, DoSnapshot, IoSnapshot, IoType, ModbusStats};
pub use roi::{RoiNorm, RoiPixels};
pub use views::MachineStatusSnapshot;
