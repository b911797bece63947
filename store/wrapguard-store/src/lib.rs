//! Durable event persistence for `LogicStage`: an append-only `events` table
//! and the crash-recovery query for an unfinished roll (§4.4.5, §6.3).

pub mod error;
pub mod sink;

pub use error::StoreError;
pub use sink::{EventSink, FakeEventSink, SqliteEventSink};
