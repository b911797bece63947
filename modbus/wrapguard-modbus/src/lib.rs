//! Modbus/TCP connection supervision: one worker per device (machine A DO,
//! machine B DO, shared DI bank), each owning its own socket and retry
//! policy, publishing `IoSnapshot`s and draining queued `DoCommand`s.

pub mod error;
pub mod transport;
pub mod worker;

pub use error::ModbusError;
pub use transport::{ModbusConnector, ModbusTransport, TcpConnector, TcpTransport};
pub use worker::ModbusWorker;
