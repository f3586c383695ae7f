use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::errors::StorageError;
use crate::interfaces::BuildStatusStore;
use crate::{IndexBuildStatus, IndexType, Timestamp};

use super::{SELECT_STATUS_SQL, UPSERT_STATUS_SQL, open_db, open_db_in_memory};

/// Raw row: (index_type, status, last_build, op_start, total, processed, last_modified).
type StatusRow = (
    String,
    String,
    Option<Timestamp>,
    Option<Timestamp>,
    i64,
    i64,
    Option<Timestamp>,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_status(raw: StatusRow) -> Result<IndexBuildStatus, StorageError> {
    let (index_type, status, last_build, op_start, total, processed, last_modified) = raw;
    let parsed_type: IndexType = index_type
        .parse()
        .map_err(|e: String| StorageError::corrupt(&index_type, e))?;
    let parsed_status = status
        .parse()
        .map_err(|e: String| StorageError::corrupt(&index_type, e))?;
    Ok(IndexBuildStatus {
        index_type: parsed_type,
        status: parsed_status,
        last_build_date: last_build,
        operation_start_date: op_start,
        total_records: total.max(0) as u64,
        processed_records: processed.max(0) as u64,
        last_modified_date: last_modified,
    })
}

/// Build-status persistence backed by one SQLite connection.
pub struct SqliteBuildStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteBuildStatusStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Every stored build status, ordered by index type.
    pub fn list(&self) -> Result<Vec<IndexBuildStatus>, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(&format!("{SELECT_STATUS_SQL} ORDER BY index_type"))?;
        let rows = stmt.query_map([], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_status(row?)?);
        }
        Ok(out)
    }
}

impl BuildStatusStore for SqliteBuildStatusStore {
    fn get(&self, index_type: IndexType) -> Result<Option<IndexBuildStatus>, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = conn
            .query_row(
                &format!("{SELECT_STATUS_SQL} WHERE index_type = ?1"),
                [index_type.as_str()],
                read_row,
            )
            .optional()?;
        raw.map(into_status).transpose()
    }

    fn save_or_update(&self, status: &IndexBuildStatus) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            UPSERT_STATUS_SQL,
            (
                status.index_type.as_str(),
                status.status.as_str(),
                status.last_build_date,
                status.operation_start_date,
                status.total_records as i64,
                status.processed_records as i64,
                status.last_modified_date,
            ),
        )?;
        Ok(())
    }
}
