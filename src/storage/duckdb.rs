use super::traits::{EventQuery, SortOrder, Storage, StorageError};
use crate::monitor::event::ErrorEvent;
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        // Cannot check elsewhere; assume the holder is alive.
        let _ = pid;
        true
    }
}

/// Extract the PID from a DuckDB lock error: "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "removed stale database file");
        }
    }
    Ok(())
}

const EVENT_COLUMNS: &str = "content_hash, epoch_us(detected_at), agent, service, user_name, source_ref, \
     routine, routine_description, message, log_timestamp, line_number, raw_block";

pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Opens (or creates) the database file, recovering from a lock left
    /// behind by a process that no longer runs.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(e) => {
                let error_msg = e.to_string();
                if !error_msg.contains("Could not set lock") {
                    return Err(e.into());
                }
                tracing::warn!(error = %error_msg, "database lock detected");

                let Some(pid) = extract_pid_from_lock_error(&error_msg) else {
                    return Err(e.into());
                };
                if is_process_running(pid) {
                    tracing::error!(pid, "lock holder is still running, cannot open database");
                    return Err(e.into());
                }

                tracing::warn!(pid, "lock holder is gone, removing stale lock files");
                remove_lock_files(path)?;
                Connection::open(path)?
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard: MutexGuard<'_, Connection> =
                conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&*guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("task join error: {}", e)))?
    }
}

fn row_to_event(row: &duckdb::Row<'_>) -> duckdb::Result<ErrorEvent> {
    let detected_us: i64 = row.get(1)?;
    let detected_at = DateTime::from_timestamp_micros(detected_us).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            1,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })?;
    let line_number: Option<i64> = row.get(10)?;

    Ok(ErrorEvent {
        content_hash: row.get(0)?,
        detected_at,
        agent: row.get(2)?,
        service: row.get(3)?,
        user: row.get(4)?,
        source_ref: row.get(5)?,
        routine: row.get(6)?,
        routine_description: row.get(7)?,
        message: row.get(8)?,
        log_timestamp: row.get(9)?,
        line_number: line_number.and_then(|n| u32::try_from(n).ok()),
        raw_block: row.get(11)?,
    })
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("CREATE SEQUENCE IF NOT EXISTS error_events_seq", [])?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS error_events (
                    seq BIGINT NOT NULL DEFAULT nextval('error_events_seq'),
                    content_hash VARCHAR PRIMARY KEY,
                    detected_at TIMESTAMPTZ NOT NULL,
                    agent VARCHAR NOT NULL,
                    service VARCHAR NOT NULL,
                    user_name VARCHAR NOT NULL,
                    source_ref VARCHAR NOT NULL,
                    routine VARCHAR NOT NULL,
                    routine_description VARCHAR NOT NULL,
                    message VARCHAR NOT NULL,
                    log_timestamp VARCHAR NOT NULL,
                    line_number BIGINT,
                    raw_block VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_error_events_service ON error_events(service)",
                [],
            )?;

            Ok(())
        })
        .await
    }

    async fn insert_event(&self, event: &ErrorEvent) -> Result<bool, StorageError> {
        let mut event = event.clone();
        event.ensure_hash();

        self.with_conn(move |conn| {
            // The primary key decides: a conflicting row affects nothing.
            let inserted = conn.execute(
                "INSERT INTO error_events (content_hash, detected_at, agent, service, user_name,
                     source_ref, routine, routine_description, message, log_timestamp,
                     line_number, raw_block)
                 VALUES (?, to_timestamp(? / 1000000.0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (content_hash) DO NOTHING",
                duckdb::params![
                    event.content_hash,
                    event.detected_at.timestamp_micros(),
                    event.agent,
                    event.service,
                    event.user,
                    event.source_ref,
                    event.routine,
                    event.routine_description,
                    event.message,
                    event.log_timestamp,
                    event.line_number.map(i64::from),
                    event.raw_block,
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn load_hashes(&self) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT content_hash FROM error_events")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut hashes = Vec::new();
            for row in rows {
                hashes.push(row?);
            }
            Ok(hashes)
        })
        .await
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<ErrorEvent>, StorageError> {
        let query = query.clone();

        self.with_conn(move |conn| {
            let mut filters = Vec::new();
            let mut params: Vec<String> = Vec::new();
            if let Some(service) = query.service {
                filters.push("service = ?");
                params.push(service);
            }
            if let Some(agent) = query.agent {
                filters.push("agent = ?");
                params.push(agent);
            }

            let where_clause = if filters.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", filters.join(" AND "))
            };
            let direction = match query.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };

            let sql = format!(
                "SELECT {} FROM error_events {} ORDER BY seq {} LIMIT {} OFFSET {}",
                EVENT_COLUMNS, where_clause, direction, query.limit, query.offset
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), row_to_event)?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
    }

    async fn count_events(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM error_events", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
