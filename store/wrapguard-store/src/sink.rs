use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, warn};

use wrapguard_core::events::{Event, EventKind, RollSession};
use wrapguard_core::MachineId;

use crate::error::StoreError;

/// Durable sink for the append-only lifecycle/safety events `LogicStage`
/// produces, plus the one query it needs on startup: whether a roll was left
/// open by a crash (§4.4.5). Mirrors the `events` table of the externally
/// owned event store; the shift/production-log surface is out of scope here.
pub trait EventSink: Send + Sync {
    fn record(&self, event: Event) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn find_open_roll(
        &self,
        machine_id: MachineId,
    ) -> impl std::future::Future<Output = Result<Option<RollSession>, StoreError>> + Send;
}

/// `rusqlite`-backed `EventSink`. `rusqlite::Connection` is synchronous and
/// not `Sync`, so every operation is dispatched to a blocking thread with
/// the connection held behind a mutex for the worker's lifetime.
#[derive(Clone)]
pub struct SqliteEventSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventSink {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::migrate(&conn)?;
        debug!(path = %path.display(), "event store opened");
        Ok(SqliteEventSink {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                machine_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                data TEXT,
                timestamp REAL NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_events_machine_time
            ON events(machine_id, timestamp DESC);",
        )
        .map_err(StoreError::Migrate)
    }
}

impl EventSink for SqliteEventSink {
    async fn record(&self, event: Event) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let data = serde_json::to_string(&Value::Object(event.payload.clone()))
                .map_err(StoreError::Payload)?;
            let guard = conn.lock().expect("event store mutex poisoned");
            guard
                .execute(
                    "INSERT INTO events (machine_id, event_type, data, timestamp) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        event.machine_id.to_string(),
                        event.kind.to_string(),
                        data,
                        event.ts.timestamp() as f64 + event.ts.timestamp_subsec_nanos() as f64 / 1e9,
                    ],
                )
                .map_err(StoreError::Record)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::WorkerPanic(e.to_string()))?
    }

    async fn find_open_roll(&self, machine_id: MachineId) -> Result<Option<RollSession>, StoreError> {
        let conn = self.conn.clone();
        let machine = machine_id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("event store mutex poisoned");

            // Most recent ROLL_STARTED for this machine.
            let started: Option<(i64, f64)> = guard
                .query_row(
                    "SELECT id, timestamp FROM events
                     WHERE machine_id = ?1 AND event_type = ?2
                     ORDER BY id DESC LIMIT 1",
                    params![machine, EventKind::RollStarted.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(StoreError::Query)?;

            let Some((started_id, started_ts)) = started else {
                return Ok(None);
            };

            // If a ROLL_FINISHED exists after it, the roll already closed.
            let finished_after: Option<i64> = guard
                .query_row(
                    "SELECT id FROM events
                     WHERE machine_id = ?1 AND event_type = ?2 AND id > ?3
                     ORDER BY id ASC LIMIT 1",
                    params![machine, EventKind::RollFinished.to_string(), started_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::Query)?;

            if finished_after.is_some() {
                return Ok(None);
            }

            let start_ts = timestamp_to_utc(started_ts);
            Ok(Some(RollSession {
                log_id: started_id,
                start_ts,
            }))
        })
        .await
        .map_err(|e| StoreError::WorkerPanic(e.to_string()))?
    }
}

fn timestamp_to_utc(ts: f64) -> DateTime<Utc> {
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
}

/// In-memory `EventSink` for `LogicStage` unit tests. Records every event it
/// receives so tests can assert on emission order and payload contents.
#[derive(Clone, Default)]
pub struct FakeEventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("fake sink mutex poisoned").clone()
    }
}

impl EventSink for FakeEventSink {
    async fn record(&self, event: Event) -> Result<(), StoreError> {
        self.events.lock().expect("fake sink mutex poisoned").push(event);
        Ok(())
    }

    async fn find_open_roll(&self, machine_id: MachineId) -> Result<Option<RollSession>, StoreError> {
        let events = self.events.lock().expect("fake sink mutex poisoned");
        let mut started: Option<(i64, DateTime<Utc>)> = None;
        for (idx, event) in events.iter().enumerate() {
            if event.machine_id != machine_id {
                continue;
            }
            match event.kind {
                EventKind::RollStarted => started = Some((idx as i64, event.ts)),
                EventKind::RollFinished => {
                    if let Some((started_idx, _)) = started {
                        if idx as i64 > started_idx {
                            started = None;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(started.map(|(log_id, start_ts)| RollSession { log_id, start_ts }))
    }
}

impl std::fmt::Debug for FakeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEventSink")
            .field("event_count", &self.events.lock().map(|e| e.len()).unwrap_or(0))
            .finish()
    }
}
