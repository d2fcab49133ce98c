use std::collections::HashSet;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::schema::{self, Table, TableSpec, desired_shape};

/// Brings tables up to their desired shape without touching rows.
///
/// Remembers which tables it has already handled in this process, so
/// handlers can call `ensure_table` on every request and only the first call
/// reaches the database.
#[derive(Debug, Default)]
pub struct Provisioner {
    provisioned: Mutex<HashSet<Table>>,
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `table` exists with every column the code expects. Tables
    /// it holds foreign keys into are provisioned first.
    pub fn ensure_table(&self, conn: &Connection, table: Table) -> Result<(), ProvisionError> {
        if self.is_provisioned(table) {
            return Ok(());
        }

        for &parent in table.references() {
            self.ensure_table(conn, parent)?;
        }
        provision(conn, &desired_shape(table))?;
        self.set().insert(table);
        Ok(())
    }

    /// Provision every managed table in dependency order.
    pub fn ensure_all(&self, conn: &Connection) -> Result<(), ProvisionError> {
        for table in Table::ALL {
            self.ensure_table(conn, table)?;
        }
        Ok(())
    }

    /// Drop the cached "already provisioned" mark, e.g. after the table was
    /// rebuilt underneath us.
    pub fn forget(&self, table: Table) {
        self.set().remove(&table);
    }

    pub fn is_provisioned(&self, table: Table) -> bool {
        self.set().contains(&table)
    }

    fn set(&self) -> std::sync::MutexGuard<'_, HashSet<Table>> {
        // A plain set of marks cannot be left half-updated.
        self.provisioned.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Issue the conditional DDL for one table: create, backfill, then indexes
/// and triggers (which may depend on backfilled columns).
pub fn provision(conn: &Connection, spec: &TableSpec) -> Result<(), ProvisionError> {
    let table = spec.table;
    let wrap = |source| ProvisionError { table, source };

    conn.execute_batch(&spec.create_sql()).map_err(wrap)?;
    let added = add_missing_columns(conn, spec)?;
    ensure_attached(conn, spec)?;

    if added.is_empty() {
        debug!("Table {} ready", table);
    } else {
        info!("Table {} ready, added columns: {}", table, added.join(", "));
    }
    Ok(())
}

/// Add every backfill column the live table lacks. Returns the columns added.
pub fn add_missing_columns(
    conn: &Connection,
    spec: &TableSpec,
) -> Result<Vec<&'static str>, ProvisionError> {
    let table = spec.table;
    let wrap = |source| ProvisionError { table, source };
    let mut added = Vec::new();

    for column in spec.backfill_columns() {
        if schema::currently_has_column(conn, table.name(), column.name).map_err(wrap)? {
            continue;
        }

        if let Err(e) = conn.execute_batch(&spec.add_column_sql(column)) {
            // Another connection may have added it between probe and ALTER.
            if schema::currently_has_column(conn, table.name(), column.name).map_err(wrap)? {
                debug!("Column {}.{} appeared concurrently", table, column.name);
                continue;
            }
            return Err(wrap(e));
        }
        added.push(column.name);
    }

    Ok(added)
}

pub fn ensure_attached(conn: &Connection, spec: &TableSpec) -> Result<(), ProvisionError> {
    let table = spec.table;
    for index in &spec.indexes {
        conn.execute_batch(&index.sql)
            .map_err(|source| ProvisionError { table, source })?;
    }
    for trigger in &spec.triggers {
        conn.execute_batch(&trigger.sql)
            .map_err(|source| ProvisionError { table, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::attached_objects;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn table_sql(conn: &Connection, table: &str) -> String {
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn ensure_all_creates_every_table() {
        let conn = open();
        let provisioner = Provisioner::new();
        provisioner.ensure_all(&conn).unwrap();

        for table in Table::ALL {
            assert!(schema::table_exists(&conn, table.name()).unwrap());
            assert!(provisioner.is_provisioned(table));
        }
        let objects = attached_objects(&conn, "walls").unwrap();
        assert_eq!(objects.len(), 4);
    }

    #[test]
    fn provisioning_twice_changes_nothing() {
        let conn = open();
        provision(&conn, &desired_shape(Table::Users)).unwrap();
        provision(&conn, &desired_shape(Table::Messages)).unwrap();
        provision(&conn, &desired_shape(Table::Walls)).unwrap();
        conn.execute(
            "INSERT INTO messages (nickname, content, type) VALUES ('ann', 'hello', 'common')",
            [],
        )
        .unwrap();

        let before: Vec<String> = Table::ALL
            .iter()
            .filter(|t| schema::table_exists(&conn, t.name()).unwrap())
            .map(|t| table_sql(&conn, t.name()))
            .collect();
        let attached_before = attached_objects(&conn, "messages").unwrap();

        // Bypass the cache so the DDL really runs again.
        provision(&conn, &desired_shape(Table::Messages)).unwrap();
        provision(&conn, &desired_shape(Table::Walls)).unwrap();

        let after: Vec<String> = Table::ALL
            .iter()
            .filter(|t| schema::table_exists(&conn, t.name()).unwrap())
            .map(|t| table_sql(&conn, t.name()))
            .collect();
        assert_eq!(before, after);
        assert_eq!(attached_before, attached_objects(&conn, "messages").unwrap());

        let (count, content): (i64, String) = conn
            .query_row("SELECT COUNT(*), MAX(content) FROM messages", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(content, "hello");
    }

    #[test]
    fn backfills_columns_on_an_old_table() {
        let conn = open();
        conn.execute_batch(
            "CREATE TABLE messages (
                id SERIAL PRIMARY KEY,
                nickname TEXT NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'general',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO messages (id, nickname, content) VALUES (1, 'bo', 'first');",
        )
        .unwrap();
        provision(&conn, &desired_shape(Table::Walls)).unwrap();

        let added = add_missing_columns(&conn, &desired_shape(Table::Messages)).unwrap();
        assert_eq!(added, vec!["towho", "wall_id", "lat", "lng", "address", "likes_count"]);

        let likes: i64 = conn
            .query_row("SELECT likes_count FROM messages WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(likes, 0);

        // Second pass finds nothing to do.
        assert!(add_missing_columns(&conn, &desired_shape(Table::Messages)).unwrap().is_empty());
    }

    #[test]
    fn cached_tables_skip_the_database() {
        let conn = open();
        let provisioner = Provisioner::new();
        provisioner.ensure_table(&conn, Table::Users).unwrap();

        conn.execute_batch("DROP TABLE users").unwrap();
        provisioner.ensure_table(&conn, Table::Users).unwrap();
        assert!(!schema::table_exists(&conn, "users").unwrap());

        provisioner.forget(Table::Users);
        provisioner.ensure_table(&conn, Table::Users).unwrap();
        assert!(schema::table_exists(&conn, "users").unwrap());
    }

    #[test]
    fn referenced_tables_come_first() {
        let conn = open();
        let provisioner = Provisioner::new();
        provisioner.ensure_table(&conn, Table::Comments).unwrap();

        for table in [Table::Walls, Table::Messages, Table::Comments] {
            assert!(schema::table_exists(&conn, table.name()).unwrap(), "{} missing", table);
            assert!(provisioner.is_provisioned(table));
        }
        assert!(!schema::table_exists(&conn, "users").unwrap());
        assert!(!provisioner.is_provisioned(Table::Likes));
    }

    #[test]
    fn concurrent_connections_backfill_once() {
        let path = std::env::temp_dir().join(format!("pinwall-{}.db", uuid::Uuid::new_v4()));
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    nickname TEXT NOT NULL,
                    content TEXT NOT NULL,
                    type TEXT NOT NULL DEFAULT 'general',
                    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                );
                INSERT INTO messages (nickname, content) VALUES ('bo', 'first');",
            )
            .unwrap();
            provision(&conn, &desired_shape(Table::Walls)).unwrap();
        }

        let workers = 8;
        let barrier = std::sync::Barrier::new(workers);
        let results: Vec<Result<(), ProvisionError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let conn = Connection::open(&path).unwrap();
                        conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
                        barrier.wait();
                        provision(&conn, &desired_shape(Table::Messages))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in &results {
            assert!(result.is_ok(), "{:?}", result);
        }

        let conn = Connection::open(&path).unwrap();
        let columns = schema::live_columns(&conn, "messages").unwrap();
        for expected in desired_shape(Table::Messages).column_names() {
            let seen = columns.iter().filter(|c| c.as_str() == expected).count();
            assert_eq!(seen, 1, "{} appears {} times", expected, seen);
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failure_names_the_table() {
        let conn = open();
        // A view squatting on the name cannot be indexed.
        conn.execute_batch("CREATE VIEW likes AS SELECT 1 AS id").unwrap();

        let err = Provisioner::new().ensure_table(&conn, Table::Likes).unwrap_err();
        assert_eq!(err.table, Table::Likes);
        assert!(err.to_string().contains("likes"));
    }
}
