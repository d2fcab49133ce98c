pub mod error;
pub mod migrate;
pub mod provision;
pub mod schema;

pub use error::{DbError, MigrationError, MigrationFailure, ProvisionError};
pub use migrate::{DEFAULT_FALLBACK_OWNER_ID, Migration, MigrationPhase, MigrationReport, MigrationState};
pub use schema::Table;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::provision::Provisioner;

pub struct Database {
    conn: Mutex<Connection>,
    provisioner: Provisioner,
}

impl Database {
    /// Open (or create) the database file and provision every table.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::with_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let provisioner = Provisioner::new();
        provisioner.ensure_all(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            provisioner,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DbError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| DbError::LockPoisoned(e.to_string()))?;
        f(&mut conn)
    }

    /// Row-level handlers call this before touching `table`. Free after the
    /// first call in a process.
    pub fn ensure_table(&self, table: Table) -> Result<(), DbError> {
        if self.provisioner.is_provisioned(table) {
            return Ok(());
        }
        self.with_conn(|conn| Ok(self.provisioner.ensure_table(conn, table)?))
    }

    /// Rebuild `walls` with an integer `created_by`. Holds the connection for
    /// the whole run, so no row work interleaves with the swap.
    pub fn migrate_wall_owner(&self, fallback_owner_id: i64) -> Result<MigrationReport, DbError> {
        let mut migration = Migration::wall_owner(fallback_owner_id);
        let result = self.with_conn_mut(|conn| Ok(migration.run(conn)?));

        // Shape may have changed underneath the cached mark.
        self.provisioner.forget(Table::Walls);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_provisions_every_table() {
        let path = std::env::temp_dir().join(format!("pinwall-{}.db", uuid::Uuid::new_v4()));
        let db = Database::open(&path).unwrap();

        let mode: String = db
            .with_conn(|conn| Ok(conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        for table in Table::ALL {
            let exists = db
                .with_conn(|conn| Ok(schema::table_exists(conn, table.name())?))
                .unwrap();
            assert!(exists, "{} missing", table);
        }

        drop(db);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn reopening_keeps_rows() {
        let path = std::env::temp_dir().join(format!("pinwall-{}.db", uuid::Uuid::new_v4()));
        {
            let db = Database::open(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (username, password) VALUES ('alice', 'hash')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);

        drop(db);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn migration_on_fresh_database_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let report = db.migrate_wall_owner(DEFAULT_FALLBACK_OWNER_ID).unwrap();
        assert!(report.already_migrated);

        // Forgotten after the migration, re-provisioned on next use.
        db.ensure_table(Table::Walls).unwrap();
    }

    #[test]
    fn migration_errors_surface_as_db_errors() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages; DROP TABLE walls;")?;
            Ok(())
        })
        .unwrap();

        let err = db.migrate_wall_owner(1).unwrap_err();
        match err {
            DbError::Migration(e) => assert_eq!(e.phase, MigrationPhase::Inspecting),
            other => panic!("unexpected error: {other}"),
        }

        // The provisioner forgot walls, so the next handler recreates it.
        db.ensure_table(Table::Walls).unwrap();
        let exists = db
            .with_conn(|conn| Ok(schema::table_exists(conn, "walls")?))
            .unwrap();
        assert!(exists);
    }
}
