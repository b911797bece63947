use std::net::SocketAddr;
use std::time::Duration;

use tokio_modbus::client::{tcp, Context as ModbusContext};
use tokio_modbus::prelude::*;
use tokio_modbus::slave::Slave;

use crate::error::ModbusError;

/// Everything `ModbusWorker` needs from a transport, factored out so tests
/// can drive the worker's reconnect/backoff/retry logic against an
/// in-memory fake instead of a real TCP device.
pub trait ModbusTransport: Send {
    fn read_holding_registers(
        &mut self,
        addr: u16,
        count: u16,
    ) -> impl std::future::Future<Output = Result<Vec<u16>, ModbusError>> + Send;

    fn write_single_register(
        &mut self,
        addr: u16,
        value: u16,
    ) -> impl std::future::Future<Output = Result<(), ModbusError>> + Send;
}

/// Connects a fresh transport. Implemented for the real TCP backend; tests
/// supply a closure-based fake.
pub trait ModbusConnector: Send + Sync {
    type Transport: ModbusTransport;

    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Transport, ModbusError>> + Send;
}

/// Real Modbus/TCP transport, backed by `tokio-modbus`.
pub struct TcpTransport {
    ctx: ModbusContext,
}

impl ModbusTransport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.ctx
            .read_holding_registers(addr, count)
            .await
            .map_err(|e| ModbusError::Read(e.to_string()))?
            .map_err(|e| ModbusError::Read(format!("{e:?}")))
    }

    async fn write_single_register(&mut self, addr: u16, value: u16) -> Result<(), ModbusError> {
        self.ctx
            .write_single_register(addr, value)
            .await
            .map_err(|e| ModbusError::Write(e.to_string()))?
            .map_err(|e| ModbusError::Write(format!("{e:?}")))
    }
}

/// Connects to a Modbus/TCP device at `host:port` as the given unit id.
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

impl ModbusConnector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> Result<TcpTransport, ModbusError> {
        let addr: SocketAddr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| ModbusError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            })?
            .next()
            .ok_or_else(|| ModbusError::Connect {
                host: self.host.clone(),
                port: self.port,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
            })?;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, Slave(self.unit_id)))
            .await
            .map_err(|_| ModbusError::Connect {
                host: self.host.clone(),
                port: self.port,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| ModbusError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            })?;

        Ok(TcpTransport { ctx })
    }
}
