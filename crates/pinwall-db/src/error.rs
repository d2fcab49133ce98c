use thiserror::Error;

use crate::migrate::MigrationPhase;
use crate::schema::Table;

/// A DDL statement issued while provisioning `table` failed. The
/// statements are all conditional, so the table is left in a usable (if
/// incomplete) shape; the caller aborts its request.
#[derive(Debug, Error)]
#[error("provisioning table '{table}' failed: {source}")]
pub struct ProvisionError {
    pub table: Table,
    #[source]
    pub source: rusqlite::Error,
}

#[derive(Debug, Error)]
pub enum MigrationFailure {
    #[error("table '{0}' does not exist")]
    TableMissing(String),

    #[error("table '{table}' has columns the new shape would drop: {}", .columns.join(", "))]
    UnknownColumns { table: String, columns: Vec<String> },

    #[error("copied {copied} rows but the live table has {expected}")]
    RowCountMismatch { expected: i64, copied: i64 },

    #[error("{0} foreign key violations after swapping tables")]
    ForeignKeyViolations(i64),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

/// A structural migration stopped in `phase`. Everything ran in one
/// transaction that has been rolled back, so the live table is still the
/// source of truth; `reached_swap` says whether the drop/rename had started.
#[derive(Debug, Error)]
#[error("migration failed while {phase}: {kind}")]
pub struct MigrationError {
    pub phase: MigrationPhase,
    pub reached_swap: bool,
    #[source]
    pub kind: MigrationFailure,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}
