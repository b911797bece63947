//! RTSP ingestion: one `CameraStage` per machine, each owning a connection
//! and publishing decoded frames into a single-slot `FrameSlot`.

pub mod error;
pub mod frame_slot;
pub mod rtsp;
pub mod source;
pub mod stage;

pub use error::CameraError;
pub use frame_slot::{FrameSlot, FrameSlotReader};
pub use rtsp::RtspSource;
pub use source::FrameSource;
pub use stage::{resize_to, CameraStage};
