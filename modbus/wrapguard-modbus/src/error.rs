/// Errors a `ModbusWorker` can encounter. The `Transient` variants drive
/// reconnection per §4.5/§7 ("Transient I/O ... local retry then
/// reopen/reconnect. Not surfaced as Events unless the state transitions
/// connected↔disconnected").
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("modbus read error: {0}")]
    Read(String),

    #[error("modbus write error: {0}")]
    Write(String),

    #[error("modbus connection lost: {0}")]
    ConnectionLost(String),
}

impl ModbusError {
    /// Every variant here is transient by construction — a `ModbusWorker`
    /// never produces a variant that isn't meant to trigger reconnection.
    pub fn is_transient(&self) -> bool {
        true
    }
}
