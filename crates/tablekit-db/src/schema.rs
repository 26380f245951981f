//! Schema registry: table shapes declared independently of any entity type.
//!
//! Tables are registered once at startup and materialised with
//! [`SchemaRegistry::create_all`], which creates missing tables and refuses to
//! touch an existing table whose shape does not match.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use rusqlite::Connection;
use tablekit_common::{Error, Result};

use crate::pool::sqlite_error;
use crate::value::Value;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    String { max_length: u32 },
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// String column with a maximum length.
    pub const fn string(max_length: u32) -> Self {
        ColumnType::String { max_length }
    }

    /// Declared SQL type used in DDL and compared against existing tables.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::String { max_length } => format!("VARCHAR({max_length})"),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Timestamp => "DATETIME".to_string(),
        }
    }
}

/// Default applied by the session before an INSERT is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientDefault {
    Value(Value),
    /// The current UTC time at flush.
    Now,
}

impl ClientDefault {
    /// The value to insert.
    pub fn resolve(&self) -> Value {
        match self {
            ClientDefault::Value(v) => v.clone(),
            ClientDefault::Now => Value::Timestamp(chrono::Utc::now()),
        }
    }
}

/// Default applied by SQLite when an INSERT leaves the column out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerDefault {
    /// A quoted string literal.
    Text(String),
    /// A bare literal such as `0`.
    Literal(String),
    CurrentTimestamp,
}

impl ServerDefault {
    pub fn text(s: impl Into<String>) -> Self {
        ServerDefault::Text(s.into())
    }

    pub fn literal(s: impl Into<String>) -> Self {
        ServerDefault::Literal(s.into())
    }

    fn sql(&self) -> String {
        match self {
            ServerDefault::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ServerDefault::Literal(s) => s.clone(),
            ServerDefault::CurrentTimestamp => "(CURRENT_TIMESTAMP)".to_string(),
        }
    }
}

/// Foreign key target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// A column declaration.
///
/// Columns are nullable unless [`ColumnSpec::not_null`] is called, like the
/// SQL default.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<ClientDefault>,
    pub server_default: Option<ServerDefault>,
    pub foreign_key: Option<ForeignKey>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            nullable: true,
            unique: false,
            default: None,
            server_default: None,
            foreign_key: None,
        }
    }

    /// Integer surrogate key; SQLite assigns it on insert.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            nullable: false,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Client-side default value.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ClientDefault::Value(value.into()));
        self
    }

    /// Client-side default of the current time.
    pub fn default_now(mut self) -> Self {
        self.default = Some(ClientDefault::Now);
        self
    }

    pub fn server_default(mut self, default: ServerDefault) -> Self {
        self.server_default = Some(default);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// A column an INSERT cannot leave out: non-null, no default of either kind,
    /// and not the generated key.
    pub fn is_required(&self) -> bool {
        !self.nullable
            && !self.primary_key
            && self.default.is_none()
            && self.server_default.is_none()
    }

    fn ddl(&self) -> String {
        let mut ddl = format!("{} {}", self.name, self.column_type.sql_type());
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
            return ddl;
        }
        if !self.nullable {
            ddl.push_str(" NOT NULL");
        }
        if self.unique {
            ddl.push_str(" UNIQUE");
        }
        if let Some(default) = &self.server_default {
            let _ = write!(ddl, " DEFAULT {}", default.sql());
        }
        if let Some(fk) = &self.foreign_key {
            let _ = write!(ddl, " REFERENCES {} ({})", fk.table, fk.column);
        }
        ddl
    }
}

/// A registered table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    primary_key: usize,
}

/// Shared handle to a registered table.
pub type TableRef = Arc<TableSchema>;

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &ColumnSpec {
        &self.columns[self.primary_key]
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The `CREATE TABLE` statement for this table.
    pub fn create_sql(&self) -> String {
        let body = self
            .columns
            .iter()
            .map(|c| format!("\t{}", c.ddl()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE {} (\n{}\n)", self.name, body)
    }

    /// Compare against the live table's `PRAGMA table_info`.
    fn check_compatible(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn
            .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")
            .map_err(sqlite_error)?;
        let existing = stmt
            .query_map([&self.name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)? > 0,
                ))
            })
            .map_err(sqlite_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sqlite_error)?;

        if existing.len() != self.columns.len() {
            return Err(Error::schema_conflict(
                &self.name,
                format!(
                    "existing table has {} columns, registered shape has {}",
                    existing.len(),
                    self.columns.len()
                ),
            ));
        }

        for (name, declared, not_null, pk) in &existing {
            let Some(spec) = self.column(name) else {
                return Err(Error::schema_conflict(
                    &self.name,
                    format!("existing column '{name}' is not registered"),
                ));
            };
            if !declared.eq_ignore_ascii_case(&spec.column_type.sql_type()) {
                return Err(Error::schema_conflict(
                    &self.name,
                    format!(
                        "column '{name}' is {declared}, registered as {}",
                        spec.column_type.sql_type()
                    ),
                ));
            }
            if *pk != spec.primary_key {
                return Err(Error::schema_conflict(
                    &self.name,
                    format!("column '{name}' primary key flag differs"),
                ));
            }
            // INTEGER PRIMARY KEY reports notnull = 0 even though it can never be NULL.
            if !spec.primary_key && *not_null == spec.nullable {
                return Err(Error::schema_conflict(
                    &self.name,
                    format!("column '{name}' nullability differs"),
                ));
            }
        }

        let unique = self.unique_columns(conn)?;
        for spec in self.columns.iter().filter(|c| !c.primary_key) {
            if spec.unique != unique.contains(&spec.name) {
                return Err(Error::schema_conflict(
                    &self.name,
                    format!("column '{}' uniqueness differs", spec.name),
                ));
            }
        }
        Ok(())
    }

    /// Columns of an existing table covered by a single-column unique index.
    fn unique_columns(&self, conn: &Connection) -> Result<HashSet<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT ii.name FROM pragma_index_list(?1) AS il \
                 JOIN pragma_index_info(il.name) AS ii \
                 WHERE il.\"unique\" = 1 AND il.origin != 'pk' AND il.partial = 0 \
                 AND (SELECT COUNT(*) FROM pragma_index_info(il.name)) = 1",
            )
            .map_err(sqlite_error)?;
        let names = stmt
            .query_map([&self.name], |row| row.get::<_, String>(0))
            .map_err(sqlite_error)?
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(sqlite_error)?;
        Ok(names)
    }
}

/// Registry of table shapes.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableRef>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table and return its handle.
    ///
    /// Fails with [`Error::SchemaConflict`] if the name is taken, a column name
    /// repeats, or the table does not have exactly one integer primary key.
    pub fn register(&mut self, name: &str, columns: Vec<ColumnSpec>) -> Result<TableRef> {
        if self.table(name).is_some() {
            return Err(Error::schema_conflict(name, "table is already registered"));
        }
        if columns.is_empty() {
            return Err(Error::schema_conflict(name, "table has no columns"));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::schema_conflict(
                    name,
                    format!("column '{}' is declared twice", column.name),
                ));
            }
        }

        let keys: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let &[primary_key] = keys.as_slice() else {
            return Err(Error::schema_conflict(
                name,
                format!("expected exactly one primary key, found {}", keys.len()),
            ));
        };
        if columns[primary_key].column_type != ColumnType::Integer {
            return Err(Error::schema_conflict(
                name,
                "primary key must be an integer surrogate key",
            ));
        }

        let table = Arc::new(TableSchema {
            name: name.to_string(),
            columns,
            primary_key,
        });
        self.tables.push(Arc::clone(&table));
        tracing::debug!("Registered table {name}");
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Option<&TableRef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables in registration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter()
    }

    /// Create every registered table that does not exist yet.
    ///
    /// Existing tables are checked for compatibility and left alone. All
    /// creates run in one transaction. Returns the names of the tables created.
    pub fn create_all(&self, conn: &Connection) -> Result<Vec<String>> {
        self.check_foreign_keys()?;

        let tx = conn.unchecked_transaction().map_err(sqlite_error)?;
        let mut created = Vec::new();

        for table in &self.tables {
            let exists: bool = tx
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table.name],
                    |row| row.get(0),
                )
                .map_err(sqlite_error)?;

            if exists {
                table.check_compatible(&tx)?;
                tracing::debug!("Table {} already exists", table.name);
                continue;
            }

            let sql = table.create_sql();
            tracing::info!(target: "tablekit_db::sql", "{sql}");
            tx.execute_batch(&sql).map_err(|e| {
                Error::schema_conflict(&table.name, format!("CREATE TABLE failed: {e}"))
            })?;
            created.push(table.name.clone());
        }

        tx.commit().map_err(sqlite_error)?;
        Ok(created)
    }

    fn check_foreign_keys(&self) -> Result<()> {
        for table in &self.tables {
            for column in &table.columns {
                let Some(fk) = &column.foreign_key else {
                    continue;
                };
                let target = self.table(&fk.table).ok_or_else(|| {
                    Error::schema_conflict(
                        &table.name,
                        format!(
                            "column '{}' references unregistered table '{}'",
                            column.name, fk.table
                        ),
                    )
                })?;
                if target.primary_key().name != fk.column {
                    return Err(Error::schema_conflict(
                        &table.name,
                        format!(
                            "column '{}' must reference {}.{}",
                            column.name,
                            target.name,
                            target.primary_key().name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};

    fn users_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("username", ColumnType::string(32))
                .unique()
                .not_null()
                .default(""),
            ColumnSpec::new("is_staff", ColumnType::Boolean)
                .not_null()
                .default(false)
                .server_default(ServerDefault::literal("0")),
        ]
    }

    #[test]
    fn test_create_sql() {
        let mut registry = SchemaRegistry::new();
        let users = registry.register("users", users_columns()).unwrap();
        assert_eq!(
            users.create_sql(),
            "CREATE TABLE users (\n\
             \tid INTEGER PRIMARY KEY,\n\
             \tusername VARCHAR(32) NOT NULL UNIQUE,\n\
             \tis_staff BOOLEAN NOT NULL DEFAULT 0\n\
             )"
        );
        assert_eq!(users.primary_key().name, "id");
    }

    #[test]
    fn test_server_default_quoting() {
        let col = ColumnSpec::new("title", ColumnType::string(90))
            .server_default(ServerDefault::text("it's"));
        assert_eq!(col.ddl(), "title VARCHAR(90) DEFAULT 'it''s'");
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = SchemaRegistry::new();
        registry.register("users", users_columns()).unwrap();
        let err = registry.register("users", users_columns()).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_requires_single_integer_key() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(
                "no_key",
                vec![ColumnSpec::new("name", ColumnType::string(10))],
            )
            .unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));

        let mut text_key = ColumnSpec::new("code", ColumnType::string(8));
        text_key.primary_key = true;
        let err = registry.register("coded", vec![text_key]).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_duplicate_column() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(
                "t",
                vec![
                    ColumnSpec::primary_key("id"),
                    ColumnSpec::new("id", ColumnType::Integer),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn test_create_all_is_idempotent() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let mut registry = SchemaRegistry::new();
        registry.register("users", users_columns()).unwrap();

        assert_eq!(registry.create_all(&conn).unwrap(), vec!["users".to_string()]);
        assert!(registry.create_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_server_default_applies() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let mut registry = SchemaRegistry::new();
        registry.register("users", users_columns()).unwrap();
        registry.create_all(&conn).unwrap();

        conn.execute("INSERT INTO users (username) VALUES ('mark')", [])
            .unwrap();
        let staff: bool = conn
            .query_row("SELECT is_staff FROM users", [], |row| row.get(0))
            .unwrap();
        assert!(!staff);
    }

    #[test]
    fn test_incompatible_existing_table() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)")
            .unwrap();

        let mut registry = SchemaRegistry::new();
        registry.register("users", users_columns()).unwrap();
        let err = registry.create_all(&conn).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref table, .. } if table == "users"));
    }

    #[test]
    fn test_existing_table_missing_unique_constraint() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                username VARCHAR(32) NOT NULL,
                is_staff BOOLEAN NOT NULL DEFAULT 0
            )",
        )
        .unwrap();

        let mut registry = SchemaRegistry::new();
        registry.register("users", users_columns()).unwrap();
        let err = registry.create_all(&conn).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaConflict { ref reason, .. } if reason.contains("'username' uniqueness")
        ));

        conn.execute_batch("CREATE UNIQUE INDEX users_username ON users (username)")
            .unwrap();
        assert!(registry.create_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_key_must_target_registered_key() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "posts",
                vec![
                    ColumnSpec::primary_key("id"),
                    ColumnSpec::new("user_id", ColumnType::Integer)
                        .not_null()
                        .references("users", "id"),
                ],
            )
            .unwrap();

        let err = registry.create_all(&conn).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref table, .. } if table == "posts"));

        registry.register("users", users_columns()).unwrap();
        assert_eq!(registry.create_all(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_required_columns() {
        let cols = users_columns();
        assert!(!cols[0].is_required());
        assert!(!cols[1].is_required());
        let title = ColumnSpec::new("title", ColumnType::string(90)).not_null();
        assert!(title.is_required());
    }
}
