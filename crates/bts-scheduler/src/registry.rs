use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bts_core::{OsVersion, TaskId};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::BackendKind;
use crate::db::init_db;
use crate::error::{RegistryError, Result};
use crate::types::TaskInfo;

const LAST_OS_VERSION_KEY: &str = "last_os_version";

/// The persisted unit: one row of `scheduled_tasks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTaskRecord {
    pub task_id: TaskId,
    /// Output of [`TaskInfo::encode`].
    pub encoded_task_info: String,
    pub persisted: bool,
    /// Backend holding the OS-level registration.
    pub backend: BackendKind,
    pub scheduled_at_ms: i64,
    /// Fresh for every registration, including two made in the same
    /// millisecond.
    pub registration_id: Uuid,
}

impl ScheduledTaskRecord {
    pub fn new(
        task: &TaskInfo,
        encoded_task_info: String,
        backend: BackendKind,
        scheduled_at_ms: i64,
    ) -> Self {
        Self {
            task_id: task.task_id(),
            encoded_task_info,
            persisted: task.is_persisted(),
            backend,
            scheduled_at_ms,
            registration_id: Uuid::now_v7(),
        }
    }

    pub fn task_info(&self) -> Result<TaskInfo> {
        TaskInfo::decode(&self.encoded_task_info).map_err(|source| RegistryError::Corrupt {
            task_id: self.task_id,
            source,
        })
    }
}

/// Durable store of currently scheduled tasks plus the last observed OS
/// version.
///
/// Wraps a single SQLite connection in a `Mutex`; every operation is one
/// statement or one transaction, so each is atomic for its task id.
pub struct TaskRegistry {
    db: Mutex<Connection>,
}

impl TaskRegistry {
    /// Take ownership of `conn` and create the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Open an existing registry file for inspection only. Neither the schema
    /// is created, and every write fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Insert or replace the record for `record.task_id`.
    #[instrument(skip(self, record), fields(task_id = %record.task_id))]
    pub fn put(&self, record: &ScheduledTaskRecord) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO scheduled_tasks
                (task_id, task_info, persisted, backend, scheduled_at, registration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(task_id) DO UPDATE SET
                task_info = excluded.task_info,
                persisted = excluded.persisted,
                backend = excluded.backend,
                scheduled_at = excluded.scheduled_at,
                registration = excluded.registration",
            rusqlite::params![
                record.task_id.get(),
                record.encoded_task_info,
                record.persisted,
                record.backend.as_str(),
                record.scheduled_at_ms,
                record.registration_id.to_string()
            ],
        )?;
        debug!("task record stored");
        Ok(())
    }

    /// Remove the record for `task_id`. Returns whether a row was deleted;
    /// a missing id is not an error.
    pub fn remove(&self, task_id: TaskId) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM scheduled_tasks WHERE task_id = ?1",
            [task_id.get()],
        )?;
        Ok(n > 0)
    }

    /// Remove the record only if it still belongs to `registration_id`. A
    /// newer registration for the same id is kept.
    pub fn remove_if_registration(&self, task_id: TaskId, registration_id: Uuid) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM scheduled_tasks WHERE task_id = ?1 AND registration = ?2",
            rusqlite::params![task_id.get(), registration_id.to_string()],
        )?;
        Ok(n > 0)
    }

    pub fn get(&self, task_id: TaskId) -> Result<Option<ScheduledTaskRecord>> {
        let db = self.conn()?;
        let record = db
            .query_row(
                "SELECT task_id, task_info, persisted, backend, scheduled_at, registration
                 FROM scheduled_tasks WHERE task_id = ?1",
                [task_id.get()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn contains(&self, task_id: TaskId) -> Result<bool> {
        Ok(self.get(task_id)?.is_some())
    }

    pub fn ids(&self) -> Result<BTreeSet<TaskId>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT task_id FROM scheduled_tasks")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i32>(0).map(TaskId))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    /// All records ordered by task id.
    pub fn records(&self) -> Result<Vec<ScheduledTaskRecord>> {
        let db = self.conn()?;
        select_all(&db)
    }

    /// Snapshot every record and delete them in the same transaction.
    pub fn take_all(&self) -> Result<Vec<ScheduledTaskRecord>> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let records = select_all(&tx)?;
        tx.execute("DELETE FROM scheduled_tasks", [])?;
        tx.commit()?;
        Ok(records)
    }

    /// Snapshot and delete the records a previous process did not mark
    /// persisted. Their OS registrations are still live.
    pub fn take_transient(&self) -> Result<Vec<ScheduledTaskRecord>> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let records = select_where(&tx, "persisted = 0")?;
        tx.execute("DELETE FROM scheduled_tasks WHERE persisted = 0", [])?;
        tx.commit()?;
        Ok(records)
    }

    pub fn clear(&self) -> Result<usize> {
        let db = self.conn()?;
        Ok(db.execute("DELETE FROM scheduled_tasks", [])?)
    }

    pub fn last_os_version(&self) -> Result<Option<OsVersion>> {
        let db = self.conn()?;
        let value: Option<String> = db
            .query_row(
                "SELECT value FROM scheduler_state WHERE key = ?1",
                [LAST_OS_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        // A value that no longer parses is treated as never observed.
        Ok(value.and_then(|v| v.parse().ok()).map(OsVersion))
    }

    pub fn set_last_os_version(&self, version: OsVersion) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO scheduler_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![LAST_OS_VERSION_KEY, version.0.to_string()],
        )?;
        Ok(())
    }
}

fn select_all(db: &Connection) -> Result<Vec<ScheduledTaskRecord>> {
    select_where(db, "1")
}

fn select_where(db: &Connection, filter: &str) -> Result<Vec<ScheduledTaskRecord>> {
    let mut stmt = db.prepare(&format!(
        "SELECT task_id, task_info, persisted, backend, scheduled_at, registration
         FROM scheduled_tasks WHERE {filter} ORDER BY task_id"
    ))?;
    let records = stmt
        .query_map([], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTaskRecord> {
    let backend: String = row.get(3)?;
    let registration: String = row.get(5)?;
    Ok(ScheduledTaskRecord {
        task_id: TaskId(row.get(0)?),
        encoded_task_info: row.get(1)?,
        persisted: row.get(2)?,
        backend: backend
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        scheduled_at_ms: row.get(4)?,
        registration_id: Uuid::parse_str(&registration)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimingInfo;

    fn record(id: i32, persisted: bool, at: i64) -> ScheduledTaskRecord {
        let task = TaskInfo::builder(id, TimingInfo::one_off(60_000))
            .persisted(persisted)
            .build()
            .expect("valid task");
        let encoded = task.encode().expect("encode");
        ScheduledTaskRecord::new(&task, encoded, BackendKind::ModernJob, at)
    }

    #[test]
    fn put_replaces_existing_record() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        registry.put(&record(1, true, 100)).expect("put");
        let mut newer = record(1, true, 200);
        newer.backend = BackendKind::LegacyDeferred;
        registry.put(&newer).expect("put");

        let ids = registry.ids().expect("ids");
        assert_eq!(ids.len(), 1);
        let stored = registry.get(TaskId(1)).expect("get").expect("present");
        assert_eq!(stored, newer);
    }

    #[test]
    fn remove_missing_is_noop() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        assert!(!registry.remove(TaskId(9)).expect("remove"));
    }

    #[test]
    fn compare_and_remove_keeps_newer_registration() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        // Same millisecond: only the registration id tells them apart.
        let first = record(5, true, 100);
        let second = record(5, true, 100);
        assert_ne!(first.registration_id, second.registration_id);
        registry.put(&first).expect("put");
        registry.put(&second).expect("put");

        assert!(!registry
            .remove_if_registration(TaskId(5), first.registration_id)
            .expect("cas"));
        assert!(registry.contains(TaskId(5)).expect("contains"));
        assert!(registry
            .remove_if_registration(TaskId(5), second.registration_id)
            .expect("cas"));
        assert!(!registry.contains(TaskId(5)).expect("contains"));
    }

    #[test]
    fn take_all_snapshots_and_empties() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        registry.put(&record(3, true, 1)).expect("put");
        registry.put(&record(1, false, 1)).expect("put");

        let taken = registry.take_all().expect("take_all");
        let ids: Vec<_> = taken.iter().map(|r| r.task_id).collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(3)]);
        assert!(registry.ids().expect("ids").is_empty());
    }

    #[test]
    fn take_transient_leaves_persisted_records() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        registry.put(&record(1, true, 1)).expect("put");
        registry.put(&record(2, false, 1)).expect("put");
        registry.put(&record(4, false, 1)).expect("put");

        let taken: Vec<_> = registry
            .take_transient()
            .expect("take")
            .into_iter()
            .map(|r| r.task_id)
            .collect();
        assert_eq!(taken, vec![TaskId(2), TaskId(4)]);
        let left: Vec<_> = registry.ids().expect("ids").into_iter().collect();
        assert_eq!(left, vec![TaskId(1)]);
    }

    #[test]
    fn os_version_is_upserted() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        assert_eq!(registry.last_os_version().expect("read"), None);
        registry.set_last_os_version(OsVersion(22)).expect("write");
        registry.set_last_os_version(OsVersion(23)).expect("write");
        assert_eq!(registry.last_os_version().expect("read"), Some(OsVersion(23)));
    }

    #[test]
    fn unknown_backend_column_is_an_error() {
        let registry = TaskRegistry::open_in_memory().expect("open");
        registry.put(&record(6, true, 1)).expect("put");
        registry
            .conn()
            .expect("conn")
            .execute("UPDATE scheduled_tasks SET backend = 'pager'", [])
            .expect("update");
        assert!(registry.get(TaskId(6)).is_err());
    }

    #[test]
    fn reopening_keeps_every_record() {
        let dir = std::env::temp_dir().join(format!("bts-registry-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("tasks.db");

        let transient = record(2, false, 10);
        {
            let registry = TaskRegistry::open(&path).expect("open");
            registry.put(&record(1, true, 10)).expect("put");
            registry.put(&transient).expect("put");
            registry.set_last_os_version(OsVersion(21)).expect("write");
        }

        let inspector = TaskRegistry::open_read_only(&path).expect("open read-only");
        assert_eq!(inspector.ids().expect("ids").len(), 2);
        assert!(inspector.put(&record(3, true, 10)).is_err());
        drop(inspector);

        let registry = TaskRegistry::open(&path).expect("reopen");
        assert_eq!(registry.ids().expect("ids").len(), 2);
        assert_eq!(registry.last_os_version().expect("read"), Some(OsVersion(21)));
        assert_eq!(registry.get(TaskId(2)).expect("get"), Some(transient));

        drop(registry);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
