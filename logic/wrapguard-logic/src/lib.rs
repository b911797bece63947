//! Safety policy, signal-lamp mirroring, and production roll lifecycle for
//! one machine (§4.4). Consumes DetectionResult/DI, drives DO commands and
//! the EventSink.

pub mod capture;
pub mod error;
pub mod production;
pub mod pulse;
pub mod safety;
pub mod stage;

pub use error::LogicError;
pub use production::{ProductionEvent, ProductionState, RollPhase};
pub use safety::{SafetyAction, SafetyState};
pub use stage::LogicStage;
