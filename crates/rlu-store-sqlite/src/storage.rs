use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rlu_core::{ResourceConfig, ResourceId, ResourceRecord, ResourceStatus, StackRef, StoreError};
use rlu_store::{RecordStore, RecordUpdate};

/// SQLite-backed record store. A single connection behind a mutex, so every
/// read is consistent.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_to_str(s: ResourceStatus) -> &'static str {
        s.as_str()
    }

    fn str_to_status(s: &str) -> Result<ResourceStatus> {
        match s {
            "Stopped" => Ok(ResourceStatus::Stopped),
            "Starting" => Ok(ResourceStatus::Starting),
            "InService" => Ok(ResourceStatus::InService),
            "Updating" => Ok(ResourceStatus::Updating),
            "Stopping" => Ok(ResourceStatus::Stopping),
            other => Err(anyhow!("unknown status {other:?} in resources table")),
        }
    }

    /// Inserts or replaces a record. Only provisioning and fixtures call this;
    /// the update workflow goes through [`RecordStore::update`].
    pub fn put(&self, record: &ResourceRecord) -> Result<()> {
        let config_json = serde_json::to_string(&record.config)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO resources(id, status, stack_ref, config_json, last_modified) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.as_str(),
                Self::status_to_str(record.status),
                record.stack_ref.as_ref().map(|s| s.as_str()),
                config_json,
                record.last_modified,
            ],
        )?;
        Ok(())
    }

    fn load(conn: &Connection, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        let row = conn
            .query_row(
                "SELECT status, stack_ref, config_json, last_modified FROM resources WHERE id = ?1",
                params![id.as_str()],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, stack_ref, config_json, last_modified)) = row else {
            return Ok(None);
        };
        let config: ResourceConfig =
            serde_json::from_str(&config_json).with_context(|| format!("decode config of {id}"))?;
        Ok(Some(ResourceRecord {
            id: id.clone(),
            status: Self::str_to_status(&status)?,
            stack_ref: stack_ref.map(StackRef::from_str),
            config,
            last_modified,
        }))
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: &ResourceId, _consistent: bool) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(Self::load(&self.conn(), id)?)
    }

    fn update(&self, id: &ResourceId, update: &RecordUpdate) -> Result<(), StoreError> {
        let config_json = update.config.as_ref().map(serde_json::to_string).transpose().map_err(anyhow::Error::from)?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE resources
                 SET status = COALESCE(?2, status),
                     config_json = COALESCE(?3, config_json),
                     last_modified = ?4
                 WHERE id = ?1 AND (?5 IS NULL OR status = ?5)",
                params![
                    id.as_str(),
                    update.status.map(Self::status_to_str),
                    config_json,
                    update.last_modified,
                    update.expected_status.map(Self::status_to_str),
                ],
            )
            .map_err(anyhow::Error::from)?;
        if changed == 1 {
            return Ok(());
        }

        let exists: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM resources WHERE id = ?1)", params![id.as_str()], |r| r.get(0))
            .map_err(anyhow::Error::from)?;
        match (exists, update.expected_status) {
            (false, _) => Err(StoreError::NotFound(id.clone())),
            (true, Some(expected)) => Err(StoreError::ConditionFailed { resource_id: id.clone(), expected }),
            (true, None) => Err(StoreError::Backend(anyhow!("update of {id} changed no rows"))),
        }
    }
}
