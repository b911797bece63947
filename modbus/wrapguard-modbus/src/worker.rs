use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wrapguard_core::{DoCommand, IoSnapshot, IoType, ModbusStats};

use crate::error::ModbusError;
use crate::transport::{ModbusConnector, ModbusTransport};

const READ_CYCLE: Duration = Duration::from_millis(100);
const RETRY_SLEEP: Duration = Duration::from_millis(50);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Owns one TCP connection to one Modbus/TCP device: periodically reads a
/// contiguous discrete range, drains queued writes before each read, and
/// supervises the connection with exponential backoff (§4.5).
pub struct ModbusWorker<C: ModbusConnector> {
    pub io_type: IoType,
    pub addr_start: u16,
    pub addr_end: u16,
    connector: C,
    command_rx: mpsc::Receiver<DoCommand>,
    snapshot_tx: mpsc::Sender<IoSnapshot>,
    stats: ModbusStats,
    last_values: BTreeMap<u16, bool>,
    last_error: Option<String>,
}

impl<C: ModbusConnector> ModbusWorker<C> {
    pub fn new(
        io_type: IoType,
        addr_start: u16,
        addr_end: u16,
        connector: C,
        command_rx: mpsc::Receiver<DoCommand>,
        snapshot_tx: mpsc::Sender<IoSnapshot>,
    ) -> Self {
        ModbusWorker {
            io_type,
            addr_start,
            addr_end,
            connector,
            command_rx,
            snapshot_tx,
            stats: ModbusStats::default(),
            last_values: BTreeMap::new(),
            last_error: None,
        }
    }

    pub fn stats(&self) -> ModbusStats {
        self.stats
    }

    /// Runs until `cancel` fires. Never returns early on I/O failure — only
    /// cooperative cancellation ends the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(io_type = %self.io_type, "modbus worker starting");

        let mut transport = match self.connect_with_backoff(&cancel).await {
            Some(t) => t,
            None => {
                info!(io_type = %self.io_type, "modbus worker stopped before connecting");
                return;
            }
        };

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(&mut transport).await {
                Ok(()) => {
                    tokio::select! {
                        _ = sleep(READ_CYCLE) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(io_type = %self.io_type, error = %e, "modbus communication error, reconnecting");
                    self.last_error = Some(e.to_string());
                    self.publish_disconnected(e.to_string()).await;

                    transport = match self.connect_with_backoff(&cancel).await {
                        Some(t) => t,
                        None => break,
                    };
                    self.last_error = None;
                    info!(io_type = %self.io_type, "reconnected, resuming operations");
                }
            }
        }

        info!(
            io_type = %self.io_type,
            read_success = self.stats.read_success,
            read_fail = self.stats.read_fail,
            "modbus worker stopped"
        );
    }

    /// One read-write cycle: drain writes, then read the range.
    async fn run_cycle(&mut self, transport: &mut C::Transport) -> Result<(), ModbusError> {
        self.process_write_commands(transport).await?;
        self.read_range(transport).await?;
        self.publish_connected().await;
        Ok(())
    }

    async fn process_write_commands(
        &mut self,
        transport: &mut C::Transport,
    ) -> Result<(), ModbusError> {
        while let Ok(cmd) = self.command_rx.try_recv() {
            self.write_with_retry(transport, cmd).await?;
        }
        Ok(())
    }

    async fn write_with_retry(
        &mut self,
        transport: &mut C::Transport,
        cmd: DoCommand,
    ) -> Result<(), ModbusError> {
        let value = if cmd.value { 1 } else { 0 };
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match transport.write_single_register(cmd.addr, value).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.stats.write_fail += u64::from(attempt);
                    }
                    self.stats.write_success += 1;
                    debug!(addr = cmd.addr, value = cmd.value, "wrote coil");
                    return Ok(());
                }
                Err(e) => {
                    warn!(addr = cmd.addr, attempt, error = %e, "write attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(RETRY_SLEEP).await;
                    }
                }
            }
        }
        self.stats.write_fail += u64::from(MAX_ATTEMPTS);
        Err(ModbusError::ConnectionLost(format!(
            "write to addr {} failed after {} attempts: {}",
            cmd.addr,
            MAX_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn read_range(&mut self, transport: &mut C::Transport) -> Result<(), ModbusError> {
        let count = self.addr_end - self.addr_start + 1;
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match transport
                .read_holding_registers(self.addr_start, count)
                .await
            {
                Ok(registers) => {
                    if attempt > 0 {
                        self.stats.read_fail += u64::from(attempt);
                    }
                    self.stats.read_success += 1;
                    self.last_error = None;
                    self.last_values = registers
                        .into_iter()
                        .enumerate()
                        .map(|(i, reg)| (self.addr_start + i as u16, reg != 0))
                        .collect();
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(RETRY_SLEEP).await;
                    }
                }
            }
        }
        self.stats.read_fail += u64::from(MAX_ATTEMPTS);
        let msg = format!(
            "read failed after {} attempts: {}",
            MAX_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        );
        self.last_error = Some(msg.clone());
        error!(io_type = %self.io_type, %msg, "modbus read failed");
        Err(ModbusError::ConnectionLost(msg))
    }

    async fn connect_with_backoff(&self, cancel: &CancellationToken) -> Option<C::Transport> {
        info!(io_type = %self.io_type, "attempting modbus connection");
        if let Ok(t) = self.connector.connect().await {
            info!(io_type = %self.io_type, "connected");
            return Some(t);
        }

        warn!(io_type = %self.io_type, "initial connection failed, entering backoff");
        self.publish_disconnected("initial connection failed".into())
            .await;

        let mut backoff = INITIAL_BACKOFF;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(backoff) => {}
            }

            match self.connector.connect().await {
                Ok(t) => {
                    info!(io_type = %self.io_type, "reconnected");
                    return Some(t);
                }
                Err(e) => {
                    warn!(io_type = %self.io_type, backoff_secs = backoff.as_secs(), error = %e, "still retrying");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn publish_connected(&self) {
        let snapshot = IoSnapshot {
            io_type: self.io_type,
            connected: true,
            values: self.last_values.clone(),
            ts: Utc::now(),
            err_text: self.last_error.clone(),
        };
        let _ = self.snapshot_tx.try_send(snapshot);
    }

    async fn publish_disconnected(&self, err_text: String) {
        let snapshot = IoSnapshot::disconnected(self.io_type, Utc::now(), err_text);
        let _ = self.snapshot_tx.try_send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ModbusTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wrapguard_core::MachineId;

    #[derive(Clone)]
    struct FlakyTransport {
        fail_reads_remaining: Arc<AtomicUsize>,
        registers: Arc<std::sync::Mutex<BTreeMap<u16, u16>>>,
        writes_seen: Arc<std::sync::Mutex<Vec<(u16, u16)>>>,
    }

    impl ModbusTransport for FlakyTransport {
        async fn read_holding_registers(
            &mut self,
            addr: u16,
            count: u16,
        ) -> Result<Vec<u16>, ModbusError> {
            if self.fail_reads_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_reads_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ModbusError::Read("injected failure".into()));
            }
            let regs = self.registers.lock().unwrap();
            Ok((addr..addr + count).map(|a| *regs.get(&a).unwrap_or(&0)).collect())
        }

        async fn write_single_register(&mut self, addr: u16, value: u16) -> Result<(), ModbusError> {
            self.registers.lock().unwrap().insert(addr, value);
            self.writes_seen.lock().unwrap().push((addr, value));
            Ok(())
        }
    }

    struct FlakyConnector {
        transport: FlakyTransport,
    }

    impl ModbusConnector for FlakyConnector {
        type Transport = FlakyTransport;

        async fn connect(&self) -> Result<FlakyTransport, ModbusError> {
            Ok(self.transport.clone())
        }
    }

    fn make_worker(
        transport: FlakyTransport,
    ) -> (
        ModbusWorker<FlakyConnector>,
        mpsc::Sender<DoCommand>,
        mpsc::Receiver<IoSnapshot>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (snap_tx, snap_rx) = mpsc::channel(16);
        let worker = ModbusWorker::new(
            IoType::Do(MachineId::A),
            0,
            3,
            FlakyConnector { transport },
            cmd_rx,
            snap_tx,
        );
        (worker, cmd_tx, snap_rx)
    }

    #[tokio::test]
    async fn read_retries_within_attempt_budget_then_succeeds() {
        let transport = FlakyTransport {
            fail_reads_remaining: Arc::new(AtomicUsize::new(2)),
            registers: Arc::new(std::sync::Mutex::new(BTreeMap::new())),
            writes_seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let (mut worker, _cmd_tx, _snap_rx) = make_worker(transport.clone());
        let mut t = transport;
        worker.read_range(&mut t).await.unwrap();
        assert_eq!(worker.stats().read_success, 1);
        assert_eq!(worker.stats().read_fail, 2);
    }

    #[tokio::test]
    async fn read_fails_after_exhausting_retries() {
        let transport = FlakyTransport {
            fail_reads_remaining: Arc::new(AtomicUsize::new(10)),
            registers: Arc::new(std::sync::Mutex::new(BTreeMap::new())),
            writes_seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let (mut worker, _cmd_tx, _snap_rx) = make_worker(transport.clone());
        let mut t = transport;
        let err = worker.read_range(&mut t).await.unwrap_err();
        assert!(matches!(err, ModbusError::ConnectionLost(_)));
        assert_eq!(worker.stats().read_fail, 3);
    }

    #[tokio::test]
    async fn writes_are_applied_before_the_next_read_snapshot() {
        let transport = FlakyTransport {
            fail_reads_remaining: Arc::new(AtomicUsize::new(0)),
            registers: Arc::new(std::sync::Mutex::new(BTreeMap::new())),
            writes_seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        let (mut worker, cmd_tx, _snap_rx) = make_worker(transport.clone());
        cmd_tx
            .send(DoCommand { addr: 1, value: true })
            .await
            .unwrap();
        let mut t = transport.clone();
        worker.run_cycle(&mut t).await.unwrap();
        assert_eq!(worker.last_values.get(&1), Some(&true));
        assert_eq!(transport.writes_seen.lock().unwrap().as_slice(), &[(1, 1)]);
    }
}
