//! Desired shape of every table the service owns.
//!
//! Nothing in here touches the database except the read-only probes at the
//! bottom, which look at `pragma_table_info` and `sqlite_master`.

use std::fmt;

use rusqlite::{Connection, OptionalExtension};

use pinwall_types::models::{AccountType, MessageKind, WallStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Users,
    Walls,
    Messages,
    Comments,
    Likes,
}

impl Table {
    /// Every managed table, referenced tables before the tables that point at them.
    pub const ALL: [Table; 5] = [
        Self::Users,
        Self::Walls,
        Self::Messages,
        Self::Comments,
        Self::Likes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Walls => "walls",
            Self::Messages => "messages",
            Self::Comments => "comments",
            Self::Likes => "likes",
        }
    }

    /// Tables this one holds foreign keys into. These must be provisioned first.
    pub fn references(self) -> &'static [Table] {
        match self {
            Self::Users | Self::Walls => &[],
            Self::Messages => &[Self::Walls],
            Self::Comments | Self::Likes => &[Self::Messages],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Everything after the column name in the CREATE TABLE body.
    pub definition: String,
    /// Added later in the schema's life; may be missing on old databases and
    /// gets added with ALTER TABLE ... ADD COLUMN.
    pub backfill: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub name: &'static str,
    pub sql: String,
}

/// A column whose declared type changed between schema revisions and needs
/// the structural migrator to move existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRetype {
    pub column: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

/// Owner ids used to be account UUIDs; users now have integer ids.
pub const WALL_OWNER_RETYPE: ColumnRetype = ColumnRetype {
    column: "created_by",
    from: "TEXT",
    to: "INTEGER",
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: Table,
    pub columns: Vec<ColumnSpec>,
    /// Table-level constraints (composite UNIQUE and the like).
    pub constraints: Vec<String>,
    pub indexes: Vec<IndexSpec>,
    pub triggers: Vec<TriggerSpec>,
    pub retype: Option<ColumnRetype>,
}

impl TableSpec {
    pub fn create_sql(&self) -> String {
        self.create_sql_named(self.table.name())
    }

    /// CREATE TABLE statement for this shape under another name. The
    /// migrator builds its scratch table with this.
    pub fn create_sql_named(&self, name: &str) -> String {
        let mut body: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.definition))
            .collect();
        body.extend(self.constraints.iter().cloned());

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            name,
            body.join(",\n    ")
        )
    }

    pub fn add_column_sql(&self, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table.name(),
            column.name,
            column.definition
        )
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn backfill_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.backfill)
    }

    /// Shape of the table before its pending retype, if it has one.
    pub fn legacy(&self) -> Option<TableSpec> {
        let retype = self.retype?;
        let current = self.column(retype.column)?;
        let definition = current.definition.replacen(retype.to, retype.from, 1);

        let mut legacy = self.clone();
        legacy.retype = None;
        for column in &mut legacy.columns {
            if column.name == retype.column {
                column.definition = definition.clone();
            }
        }
        Some(legacy)
    }
}

/// The current desired shape of `table`.
pub fn desired_shape(table: Table) -> TableSpec {
    match table {
        Table::Users => users(),
        Table::Walls => walls(),
        Table::Messages => messages(),
        Table::Comments => comments(),
        Table::Likes => likes(),
    }
}

fn column(name: &'static str, definition: impl Into<String>) -> ColumnSpec {
    ColumnSpec {
        name,
        definition: definition.into(),
        backfill: false,
    }
}

fn backfill(name: &'static str, definition: impl Into<String>) -> ColumnSpec {
    ColumnSpec {
        name,
        definition: definition.into(),
        backfill: true,
    }
}

fn index(name: &'static str, table: Table, columns: &str) -> IndexSpec {
    IndexSpec {
        name,
        sql: format!("CREATE INDEX IF NOT EXISTS {} ON {}({})", name, table.name(), columns),
    }
}

fn sql_in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn users() -> TableSpec {
    let account_types = sql_in_list(AccountType::ALL.map(AccountType::as_str));

    TableSpec {
        table: Table::Users,
        columns: vec![
            column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            column(
                "username",
                "TEXT NOT NULL UNIQUE CHECK (length(username) BETWEEN 3 AND 50)",
            ),
            column("password", "TEXT NOT NULL"),
            backfill(
                "account_type",
                format!(
                    "TEXT NOT NULL DEFAULT 'normal' CHECK (account_type IN ({}))",
                    account_types
                ),
            ),
            backfill("email", "TEXT"),
            backfill("nickname", "TEXT"),
            column("created_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        constraints: vec![],
        indexes: vec![],
        triggers: vec![],
        retype: None,
    }
}

fn walls() -> TableSpec {
    let styles = sql_in_list(WallStyle::ALL.map(WallStyle::as_str));

    TableSpec {
        table: Table::Walls,
        columns: vec![
            column("id", "TEXT PRIMARY KEY NOT NULL"),
            column("name", "TEXT NOT NULL CHECK (length(name) <= 100)"),
            column("description", "TEXT"),
            column(
                "style",
                format!(
                    "TEXT NOT NULL DEFAULT '{}' CHECK (style IN ({}))",
                    WallStyle::default(),
                    styles
                ),
            ),
            column(
                "max_messages",
                "INTEGER NOT NULL DEFAULT 100 CHECK (max_messages > 0)",
            ),
            column("requires_approval", "INTEGER NOT NULL DEFAULT 0"),
            column("created_by", "INTEGER NOT NULL"),
            column("created_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
            column("updated_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
            backfill("is_active", "INTEGER NOT NULL DEFAULT 1"),
            backfill("background_color", "TEXT"),
            backfill("font_family", "TEXT"),
            backfill("is_public", "INTEGER NOT NULL DEFAULT 1"),
            backfill(
                "view_count",
                "INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0)",
            ),
        ],
        constraints: vec![],
        indexes: vec![
            index("idx_walls_created_by", Table::Walls, "created_by"),
            index("idx_walls_created_at", Table::Walls, "created_at"),
            index("idx_walls_is_public", Table::Walls, "is_public"),
        ],
        triggers: vec![TriggerSpec {
            name: "walls_touch_updated_at",
            sql: "CREATE TRIGGER IF NOT EXISTS walls_touch_updated_at
AFTER UPDATE ON walls
FOR EACH ROW WHEN NEW.updated_at IS OLD.updated_at
BEGIN
    UPDATE walls SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
END"
            .to_string(),
        }],
        retype: Some(WALL_OWNER_RETYPE),
    }
}

fn messages() -> TableSpec {
    let kinds = sql_in_list(MessageKind::ALL.map(MessageKind::as_str));

    TableSpec {
        table: Table::Messages,
        columns: vec![
            column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            column("nickname", "TEXT NOT NULL CHECK (length(nickname) <= 50)"),
            column("content", "TEXT NOT NULL CHECK (length(content) <= 1000)"),
            column(
                "type",
                format!(
                    "TEXT NOT NULL DEFAULT '{}' CHECK (type IN ({}))",
                    MessageKind::default(),
                    kinds
                ),
            ),
            backfill("towho", "TEXT"),
            backfill("wall_id", "TEXT REFERENCES walls(id) ON DELETE SET NULL"),
            backfill("lat", "REAL"),
            backfill("lng", "REAL"),
            backfill("address", "TEXT"),
            backfill(
                "likes_count",
                "INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0)",
            ),
            column("created_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        constraints: vec![],
        indexes: vec![
            index("idx_messages_created_at", Table::Messages, "created_at"),
            index("idx_messages_wall", Table::Messages, "wall_id, created_at"),
        ],
        triggers: vec![],
        retype: None,
    }
}

fn comments() -> TableSpec {
    TableSpec {
        table: Table::Comments,
        columns: vec![
            column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            column(
                "message_id",
                "INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE",
            ),
            column("nickname", "TEXT NOT NULL CHECK (length(nickname) <= 50)"),
            column("content", "TEXT NOT NULL"),
            backfill("user_ip", "TEXT"),
            backfill(
                "likes_count",
                "INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0)",
            ),
            column("created_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        constraints: vec![],
        indexes: vec![index(
            "idx_comments_message",
            Table::Comments,
            "message_id, created_at",
        )],
        triggers: vec![],
        retype: None,
    }
}

fn likes() -> TableSpec {
    TableSpec {
        table: Table::Likes,
        columns: vec![
            column("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            column(
                "message_id",
                "INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE",
            ),
            column("user_ip", "TEXT NOT NULL"),
            column("created_at", "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"),
        ],
        // One like per visitor per message
        constraints: vec!["UNIQUE (message_id, user_ip)".to_string()],
        indexes: vec![index("idx_likes_message", Table::Likes, "message_id")],
        triggers: vec![],
        retype: None,
    }
}

// -- Live schema probes --

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

pub fn currently_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Declared type of a live column, `None` when the column (or table) is absent.
pub fn column_type(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT type FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )
    .optional()
}

pub fn live_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// An index or trigger as stored in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
    pub sql: String,
}

/// Explicitly created indexes and triggers attached to `table`. Automatic
/// indexes backing UNIQUE/PRIMARY KEY constraints have no SQL and are skipped;
/// they come back with the table definition.
pub fn attached_objects(conn: &Connection, table: &str) -> rusqlite::Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT type, name, sql FROM sqlite_master
         WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL
         ORDER BY type, name",
    )?;
    let objects = stmt
        .query_map([table], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(objects)
}
