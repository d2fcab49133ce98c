//! Structural migration of the wall owner column.
//!
//! SQLite cannot change a column's type in place, so the table is rebuilt:
//! copy every row into a scratch table with the new shape, check the copy,
//! drop the original and rename the scratch table into its place, then put
//! back the indexes and triggers the drop took with it. All of it runs in
//! one transaction with foreign key enforcement switched off, so a failure
//! at any step leaves the original table as it was.

use std::fmt;

use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::error::{MigrationError, MigrationFailure};
use crate::provision;
use crate::schema::{self, ColumnRetype, Table, TableSpec, WALL_OWNER_RETYPE, desired_shape};

/// Owner id given to walls whose legacy owner cannot be read as a number.
pub const DEFAULT_FALLBACK_OWNER_ID: i64 = 1;

const SCRATCH_SUFFIX: &str = "_migrating";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Inspecting,
    Copying,
    Validating,
    Swapping,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inspecting => "inspecting the live table",
            Self::Copying => "copying rows",
            Self::Validating => "validating the copy",
            Self::Swapping => "swapping tables",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    Running(MigrationPhase),
    Done,
    Failed(MigrationPhase),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: Table,
    pub column: &'static str,
    /// The column already had its new type; nothing was copied.
    pub already_migrated: bool,
    pub rows_copied: i64,
    /// Rows whose old value was not a whole number in i64 range and got the
    /// fallback id.
    pub rows_defaulted: i64,
    pub fallback_owner_id: i64,
}

impl MigrationReport {
    pub fn summary(&self) -> String {
        if self.already_migrated {
            return format!(
                "{}.{} is already INTEGER, nothing to migrate",
                self.table, self.column
            );
        }
        format!(
            "{}.{} migrated to INTEGER: {} rows copied, {} set to fallback owner {}",
            self.table, self.column, self.rows_copied, self.rows_defaulted, self.fallback_owner_id
        )
    }
}

/// One run of the column retype. Create a fresh value per run; `state()`
/// reports how far it got.
#[derive(Debug)]
pub struct Migration {
    spec: TableSpec,
    retype: ColumnRetype,
    fallback_owner_id: i64,
    state: MigrationState,
}

impl Migration {
    /// `walls.created_by`: account UUID text to integer user id.
    pub fn wall_owner(fallback_owner_id: i64) -> Self {
        Self {
            spec: desired_shape(Table::Walls),
            retype: WALL_OWNER_RETYPE,
            fallback_owner_id,
            state: MigrationState::NotStarted,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn run(&mut self, conn: &mut Connection) -> Result<MigrationReport, MigrationError> {
        match self.execute(conn) {
            Ok(report) => {
                self.state = MigrationState::Done;
                info!("{}", report.summary());
                Ok(report)
            }
            Err(kind) => {
                let phase = match self.state {
                    MigrationState::Running(phase) => phase,
                    _ => MigrationPhase::Inspecting,
                };
                self.state = MigrationState::Failed(phase);
                error!("Migration of {} failed while {}: {}", self.spec.table, phase, kind);
                Err(MigrationError {
                    phase,
                    reached_swap: phase == MigrationPhase::Swapping,
                    kind,
                })
            }
        }
    }

    fn enter(&mut self, phase: MigrationPhase) {
        info!("Migration of {}: {}", self.spec.table, phase);
        self.state = MigrationState::Running(phase);
    }

    fn execute(&mut self, conn: &mut Connection) -> Result<MigrationReport, MigrationFailure> {
        self.enter(MigrationPhase::Inspecting);
        let table = self.spec.table.name();

        if !schema::table_exists(conn, table)? {
            return Err(MigrationFailure::TableMissing(table.to_string()));
        }

        let current = schema::column_type(conn, table, self.retype.column)?.unwrap_or_default();
        if current.eq_ignore_ascii_case(self.retype.to) {
            return Ok(MigrationReport {
                table: self.spec.table,
                column: self.retype.column,
                already_migrated: true,
                rows_copied: 0,
                rows_defaulted: 0,
                fallback_owner_id: self.fallback_owner_id,
            });
        }

        let unknown: Vec<String> = schema::live_columns(conn, table)?
            .into_iter()
            .filter(|c| self.spec.column(c).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(MigrationFailure::UnknownColumns {
                table: table.to_string(),
                columns: unknown,
            });
        }

        // Must be toggled outside a transaction. With enforcement on, the
        // DROP would cascade into tables referencing this one.
        let enforced: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        if enforced {
            conn.pragma_update(None, "foreign_keys", false)?;
        }

        let outcome = self.rebuild(conn);

        if enforced {
            if let Err(e) = conn.pragma_update(None, "foreign_keys", true) {
                warn!("Could not re-enable foreign keys after migration: {}", e);
            }
        }
        outcome
    }

    fn rebuild(&mut self, conn: &mut Connection) -> Result<MigrationReport, MigrationFailure> {
        let table = self.spec.table.name();
        let scratch = format!("{}{}", table, SCRATCH_SUFFIX);
        let column = self.retype.column;
        let tx = conn.transaction()?;

        self.enter(MigrationPhase::Copying);
        // Left behind by a run that died outside our transaction.
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", scratch))?;
        provision::add_missing_columns(&tx, &self.spec)?;
        let attached = schema::attached_objects(&tx, table)?;
        let violations_before = foreign_key_violations(&tx)?;

        tx.execute_batch(&self.spec.create_sql_named(&scratch))?;

        let digits = fits_integer(column);
        let columns = self.spec.column_names();
        let select: Vec<String> = columns
            .iter()
            .map(|&c| {
                if c == column {
                    format!("CASE WHEN {} THEN CAST({} AS INTEGER) ELSE ?1 END", digits, c)
                } else {
                    c.to_string()
                }
            })
            .collect();
        let copied = tx.execute(
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                scratch,
                columns.join(", "),
                select.join(", "),
                table
            ),
            [self.fallback_owner_id],
        )? as i64;

        self.enter(MigrationPhase::Validating);
        let expected = row_count(&tx, table)?;
        let in_scratch = row_count(&tx, &scratch)?;
        if expected != in_scratch || expected != copied {
            return Err(MigrationFailure::RowCountMismatch {
                expected,
                copied: in_scratch,
            });
        }
        let defaulted: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE NOT COALESCE({}, 0)", table, digits),
            [],
            |row| row.get(0),
        )?;
        if defaulted > 0 {
            warn!(
                "{} rows in {} have a non-numeric {} and will be owned by {}",
                defaulted, table, column, self.fallback_owner_id
            );
        }

        self.enter(MigrationPhase::Swapping);
        tx.execute_batch(&format!(
            "DROP TABLE {table};\nALTER TABLE {scratch} RENAME TO {table};",
            table = table,
            scratch = scratch
        ))?;
        for object in &attached {
            tx.execute_batch(&object.sql)?;
        }
        provision::ensure_attached(&tx, &self.spec)?;

        let violations_after = foreign_key_violations(&tx)?;
        if violations_after > violations_before {
            return Err(MigrationFailure::ForeignKeyViolations(
                violations_after - violations_before,
            ));
        }
        tx.commit()?;

        Ok(MigrationReport {
            table: self.spec.table,
            column,
            already_migrated: false,
            rows_copied: copied,
            rows_defaulted: defaulted,
            fallback_owner_id: self.fallback_owner_id,
        })
    }
}

/// SQL condition that holds when `column` is all ASCII digits and the number
/// fits in a signed 64-bit integer. CAST clamps anything larger to i64::MAX,
/// so those values must take the fallback path instead.
fn fits_integer(column: &str) -> String {
    format!(
        "({c} GLOB '[0-9]*' AND {c} NOT GLOB '*[^0-9]*' \
         AND (length(ltrim({c}, '0')) < 19 \
         OR (length(ltrim({c}, '0')) = 19 AND ltrim({c}, '0') <= '{max}')))",
        c = column,
        max = i64::MAX
    )
}

fn row_count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
}

fn foreign_key_violations(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| row.get(0))
}
