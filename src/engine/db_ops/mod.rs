//! Database operations: schema, open, and the SQLite build-status store.

mod connection;
mod status_store;

pub use connection::{open_db, open_db_in_memory};
pub use status_store::SqliteBuildStatusStore;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit).
/// Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA busy_timeout = 5000;
        "#;

/// Upsert of a full build-status row.
pub(crate) const UPSERT_STATUS_SQL: &str = r#"
INSERT OR REPLACE INTO build_status
    (index_type, status, last_build_date, operation_start_date,
     total_records, processed_records, last_modified_date)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

pub(crate) const SELECT_STATUS_SQL: &str = r#"
SELECT index_type, status, last_build_date, operation_start_date,
       total_records, processed_records, last_modified_date
FROM build_status
"#;

/// Schema for the build-status table (one row per index type).
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS build_status (
    index_type TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    last_build_date INTEGER,
    operation_start_date INTEGER,
    total_records INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    last_modified_date INTEGER
);
"#;
