/// Errors an `EventSink` implementation can return. Every variant here is
/// surfaced to the caller, never swallowed — §7 treats the event store as a
/// durability boundary, not a best-effort log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open event store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to apply event store schema: {0}")]
    Migrate(#[source] rusqlite::Error),

    #[error("failed to record event: {0}")]
    Record(#[source] rusqlite::Error),

    #[error("failed to query event store: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("event payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("event store worker task panicked: {0}")]
    WorkerPanic(String),
}
