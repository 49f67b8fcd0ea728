//! SQLite-backed event store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use farmhand_sched::EncodedGraph;
use farmhand_sched::monitoring::wire::{EventBody, EventResponse, ProcessState};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::dto::{
    ArrayDescriptor, EventRecord, ProcessDescriptor, ProcessSummary, TaskDescriptor, TaskSummary,
};
use crate::error::{StoreError, StoreResult};
use crate::model::{self, Declaration, NewEvent, NewTask, ProcessTarget};
use crate::store::EventStore;

/// SQLite event store.
///
/// Every operation runs under the connection mutex, and every event is
/// appended inside one transaction together with the lookup or creation of
/// its process.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

/// A process row resolved for an event or a lookup.
struct ResolvedProcess {
    id: Option<i64>,
    state: ProcessState,
    exit_code: Option<i32>,
    array: Option<ArrayRow>,
}

#[derive(Clone, Copy)]
struct ArrayRow {
    id: i64,
    fault_tolerance: Option<u32>,
}

impl SqliteEventStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create an in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn init_schema_sync(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL UNIQUE,
                type_label TEXT,
                config TEXT NOT NULL,
                dep_graph TEXT,
                tags TEXT NOT NULL,
                comment TEXT,
                username TEXT,
                email TEXT,
                created_at TEXT NOT NULL,
                host TEXT
            );

            CREATE TABLE IF NOT EXISTS arrays (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                name TEXT NOT NULL,
                job_count INTEGER NOT NULL,
                fault_tolerance INTEGER,
                UNIQUE (task_id, name)
            );

            CREATE TABLE IF NOT EXISTS processes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                array_id INTEGER REFERENCES arrays(id),
                name TEXT NOT NULL,
                job_number INTEGER,
                state TEXT NOT NULL,
                exit_code INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_processes_standalone
                ON processes(task_id, name) WHERE array_id IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_processes_member
                ON processes(array_id, job_number) WHERE array_id IS NOT NULL;

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                process_id INTEGER NOT NULL REFERENCES processes(id),
                kind TEXT NOT NULL,
                time TEXT NOT NULL,
                host TEXT,
                exit_code INTEGER,
                current INTEGER,
                upper INTEGER,
                payload TEXT,
                received_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_process ON events(process_id);
            "#,
        )?;
        Ok(())
    }
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {text:?}: {e}")))
}

fn parse_state(text: &str) -> StoreResult<ProcessState> {
    match text {
        "unstarted" => Ok(ProcessState::Unstarted),
        "active" => Ok(ProcessState::Active),
        "terminated" => Ok(ProcessState::Terminated),
        other => Err(StoreError::Database(format!("bad process state {other:?}"))),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(text: Option<String>) -> StoreResult<Option<T>> {
    text.map(|t| serde_json::from_str(&t)).transpose().map_err(StoreError::from)
}

fn u32_column(value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Database(format!("value {value} out of range")))
}

fn task_id(tx: &Connection, label: &str) -> StoreResult<i64> {
    tx.query_row("SELECT id FROM tasks WHERE label = ?1", params![label], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("task {label}")))
}

/// Find the process addressed by `target`; `id` is `None` when it has no
/// row yet.
fn resolve(conn: &Connection, task_id: i64, label: &str, target: &ProcessTarget) -> StoreResult<ResolvedProcess> {
    match target {
        ProcessTarget::Standalone(name) => {
            let is_array: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM arrays WHERE task_id = ?1 AND name = ?2)",
                params![task_id, name],
                |row| row.get(0),
            )?;
            if is_array {
                return Err(StoreError::Invalid(format!(
                    "{name} is an array in task {label}; address its members by job number"
                )));
            }
            let row: Option<(i64, String, Option<i32>)> = conn
                .query_row(
                    "SELECT id, state, exit_code FROM processes
                     WHERE task_id = ?1 AND array_id IS NULL AND name = ?2",
                    params![task_id, name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match row {
                Some((id, state, exit_code)) => Ok(ResolvedProcess {
                    id: Some(id),
                    state: parse_state(&state)?,
                    exit_code,
                    array: None,
                }),
                None => Ok(ResolvedProcess {
                    id: None,
                    state: ProcessState::Unstarted,
                    exit_code: None,
                    array: None,
                }),
            }
        }
        ProcessTarget::ArrayMember { array, job } => {
            let row: Option<(i64, i64, Option<i64>)> = conn
                .query_row(
                    "SELECT id, job_count, fault_tolerance FROM arrays
                     WHERE task_id = ?1 AND name = ?2",
                    params![task_id, array],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let (array_id, job_count, fault_tolerance) = row.ok_or_else(|| {
                StoreError::NotFound(format!("array {array} is not declared by task {label}"))
            })?;
            if *job < 1 || i64::from(*job) > job_count {
                return Err(StoreError::Invalid(format!(
                    "job {job} is outside 1..={job_count} of array {array}"
                )));
            }
            let array_row = ArrayRow {
                id: array_id,
                fault_tolerance: fault_tolerance.map(u32_column).transpose()?,
            };
            let member: Option<(i64, String, Option<i32>)> = conn
                .query_row(
                    "SELECT id, state, exit_code FROM processes
                     WHERE array_id = ?1 AND job_number = ?2",
                    params![array_id, job],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match member {
                Some((id, state, exit_code)) => Ok(ResolvedProcess {
                    id: Some(id),
                    state: parse_state(&state)?,
                    exit_code,
                    array: Some(array_row),
                }),
                None => Ok(ResolvedProcess {
                    id: None,
                    state: ProcessState::Unstarted,
                    exit_code: None,
                    array: Some(array_row),
                }),
            }
        }
    }
}

fn insert_process(
    tx: &Transaction<'_>,
    task_id: i64,
    target: &ProcessTarget,
    array: Option<ArrayRow>,
) -> StoreResult<i64> {
    match target {
        ProcessTarget::Standalone(name) => {
            tx.execute(
                "INSERT INTO processes (task_id, array_id, name, job_number, state)
                 VALUES (?1, NULL, ?2, NULL, 'unstarted')",
                params![task_id, name],
            )?;
        }
        ProcessTarget::ArrayMember { array: name, job } => {
            tx.execute(
                "INSERT INTO processes (task_id, array_id, name, job_number, state)
                 VALUES (?1, ?2, ?3, ?4, 'unstarted')",
                params![task_id, array.map(|a| a.id), name, job],
            )?;
        }
    }
    Ok(tx.last_insert_rowid())
}

/// Members of an array that terminated with a non-zero exit code.
fn failed_members(conn: &Connection, array_id: i64) -> StoreResult<u32> {
    let failed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM processes
         WHERE array_id = ?1 AND state = 'terminated'
           AND exit_code IS NOT NULL AND exit_code != 0",
        params![array_id],
        |row| row.get(0),
    )?;
    u32_column(failed)
}

fn load_events(conn: &Connection, process_id: i64) -> StoreResult<Vec<EventRecord>> {
    type Row = (
        i64,
        String,
        String,
        Option<String>,
        Option<i32>,
        Option<i64>,
        Option<i64>,
        Option<String>,
        String,
    );

    let mut stmt = conn.prepare(
        "SELECT id, kind, time, host, exit_code, current, upper, payload, received_at
         FROM events WHERE process_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![process_id], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (seq, kind, time, host, exit_code, current, upper, payload, received_at): Row = row?;
        let body = match kind.as_str() {
            "started" => EventBody::Started,
            "beat" => EventBody::Beat { current, upper },
            "terminated" => EventBody::Terminated { exit_code },
            other => return Err(StoreError::Database(format!("bad event kind {other:?}"))),
        };
        events.push(EventRecord {
            seq,
            body,
            payload: parse_json(payload)?,
            time: parse_timestamp(&time)?,
            host,
            received_at: parse_timestamp(&received_at)?,
        });
    }
    Ok(events)
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn create_task(&self, task: NewTask) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM tasks WHERE label = ?1)",
            params![task.label],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Conflict(format!("task {} already exists", task.label)));
        }

        let dep_graph = task.dep_graph.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            r#"
            INSERT INTO tasks (label, type_label, config, dep_graph, tags, comment, username, email, created_at, host)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                task.label,
                task.type_label,
                serde_json::to_string(&task.config)?,
                dep_graph,
                serde_json::to_string(&task.tags)?,
                task.comment,
                task.username,
                task.email,
                timestamp(&task.created_at),
                task.host,
            ],
        )?;
        let task_id = tx.last_insert_rowid();

        for (name, declaration) in &task.declarations {
            match declaration {
                Declaration::Single => {
                    insert_process(&tx, task_id, &ProcessTarget::Standalone(name.clone()), None)?;
                }
                Declaration::Array {
                    job_count,
                    fault_tolerance,
                } => {
                    tx.execute(
                        "INSERT INTO arrays (task_id, name, job_count, fault_tolerance)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![task_id, name, job_count, fault_tolerance],
                    )?;
                }
            }
        }

        tx.commit()?;
        tracing::info!(label = %task.label, processes = task.declarations.len(), "Created task");
        Ok(())
    }

    async fn list_tasks(&self) -> StoreResult<Vec<TaskSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.label, t.type_label, t.created_at, t.tags,
                   (SELECT COUNT(*) FROM processes p WHERE p.task_id = t.id AND p.array_id IS NULL)
                   + COALESCE((SELECT SUM(a.job_count) FROM arrays a WHERE a.task_id = t.id), 0)
            FROM tasks t
            ORDER BY t.id DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            let (label, type_label, created_at, tags, process_count) = row?;
            tasks.push(TaskSummary {
                label,
                type_label,
                created_at: parse_timestamp(&created_at)?,
                tags: serde_json::from_str(&tags)?,
                process_count: u64::try_from(process_count).unwrap_or_default(),
            });
        }
        Ok(tasks)
    }

    async fn get_task(&self, label: &str) -> StoreResult<Option<TaskDescriptor>> {
        type TaskRow = (
            i64,
            Option<String>,
            String,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
        );

        let conn = self.lock()?;
        let row: Option<TaskRow> = conn
            .query_row(
                "SELECT id, type_label, config, dep_graph, tags, comment, username, email, created_at, host
                 FROM tasks WHERE label = ?1",
                params![label],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, type_label, config, dep_graph, tags, comment, username, email, created_at, host)) =
            row
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT p.name, p.state, p.exit_code, (SELECT COUNT(*) FROM events e WHERE e.process_id = p.id)
             FROM processes p WHERE p.task_id = ?1 AND p.array_id IS NULL ORDER BY p.name",
        )?;
        let mut processes = Vec::new();
        for row in stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i32>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })? {
            let (name, state, exit_code, event_count) = row?;
            processes.push(ProcessSummary {
                name,
                state: parse_state(&state)?,
                exit_code,
                event_count: u64::try_from(event_count).unwrap_or_default(),
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT a.name, a.job_count, a.fault_tolerance,
                   COALESCE(SUM(p.state = 'active'), 0),
                   COALESCE(SUM(p.state = 'terminated' AND (p.exit_code IS NULL OR p.exit_code = 0)), 0),
                   COALESCE(SUM(p.state = 'terminated' AND p.exit_code IS NOT NULL AND p.exit_code != 0), 0)
            FROM arrays a LEFT JOIN processes p ON p.array_id = a.id
            WHERE a.task_id = ?1
            GROUP BY a.id
            ORDER BY a.name
            "#,
        )?;
        let mut arrays = Vec::new();
        for row in stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })? {
            let (name, job_count, fault_tolerance, active, succeeded, failed) = row?;
            let job_count = u32_column(job_count)?;
            let (active, succeeded, failed) =
                (u32_column(active)?, u32_column(succeeded)?, u32_column(failed)?);
            arrays.push(ArrayDescriptor {
                name,
                job_count,
                fault_tolerance: fault_tolerance.map(u32_column).transpose()?,
                unstarted: job_count.saturating_sub(active + succeeded + failed),
                active,
                succeeded,
                failed,
            });
        }

        Ok(Some(TaskDescriptor {
            label: label.to_string(),
            type_label,
            config: serde_json::from_str(&config)?,
            dep_graph: parse_json::<EncodedGraph>(dep_graph)?,
            tags: serde_json::from_str(&tags)?,
            comment,
            username,
            email,
            created_at: parse_timestamp(&created_at)?,
            host,
            processes,
            arrays,
        }))
    }

    async fn record_event(
        &self,
        label: &str,
        target: &ProcessTarget,
        event: NewEvent,
    ) -> StoreResult<EventResponse> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let task_id = task_id(&tx, label)?;
        let resolved = resolve(&tx, task_id, label, target)?;
        let process_id = match resolved.id {
            Some(id) => id,
            None => insert_process(&tx, task_id, target, resolved.array)?,
        };
        let prior_events: i64 = tx.query_row(
            "SELECT COUNT(*) FROM events WHERE process_id = ?1",
            params![process_id],
            |row| row.get(0),
        )?;

        let (exit_code, current, upper) = match event.body {
            EventBody::Started => (None, None, None),
            EventBody::Beat { current, upper } => (None, current, upper),
            EventBody::Terminated { exit_code } => (exit_code, None, None),
        };
        let payload = event.payload.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            r#"
            INSERT INTO events (process_id, kind, time, host, exit_code, current, upper, payload, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                process_id,
                event.body.kind(),
                timestamp(&event.time),
                event.host,
                exit_code,
                current,
                upper,
                payload,
                timestamp(&Utc::now()),
            ],
        )?;

        let state = model::next_state(resolved.state, &event.body);
        if state != resolved.state {
            let exit_code = if state == ProcessState::Terminated {
                exit_code
            } else {
                resolved.exit_code
            };
            tx.execute(
                "UPDATE processes SET state = ?1, exit_code = ?2 WHERE id = ?3",
                params![state.name(), exit_code, process_id],
            )?;
        }

        let failed = resolved
            .array
            .map(|array| failed_members(&tx, array.id))
            .transpose()?;
        let keep_going = model::keep_going(
            resolved.state,
            failed,
            resolved.array.and_then(|a| a.fault_tolerance),
        );

        tx.commit()?;
        tracing::debug!(
            task = label,
            process = %target,
            kind = event.body.kind(),
            %state,
            keep_going,
            "Recorded event"
        );

        Ok(EventResponse {
            created: prior_events == 0,
            state,
            keep_going,
        })
    }

    async fn get_process(
        &self,
        label: &str,
        target: &ProcessTarget,
    ) -> StoreResult<ProcessDescriptor> {
        let conn = self.lock()?;
        let task_id = task_id(&conn, label)?;
        let resolved = resolve(&conn, task_id, label, target)?;

        let events = match resolved.id {
            Some(id) => load_events(&conn, id)?,
            None if resolved.array.is_some() => Vec::new(),
            None => {
                return Err(StoreError::NotFound(format!(
                    "process {target} in task {label}"
                )));
            }
        };

        Ok(ProcessDescriptor {
            task: label.to_string(),
            signature: target.to_string(),
            state: resolved.state,
            exit_code: resolved.exit_code,
            events,
        })
    }
}
