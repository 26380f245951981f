//! Lesson one: declare a table by hand and create it.

use anyhow::Result;
use tablekit_db::schema::{ColumnSpec, ColumnType, ServerDefault};

use super::{LessonOptions, SchemaReport};

pub const DATABASE_FILE: &str = "example-01.db";

/// The `users` table shared by lessons one and two.
pub fn users_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::primary_key("id"),
        ColumnSpec::new("username", ColumnType::string(32))
            .unique()
            .not_null()
            .default(""),
        // SQLite stores booleans as integers, so the server default is 0
        ColumnSpec::new("is_staff", ColumnType::Boolean)
            .not_null()
            .default(false)
            .server_default(ServerDefault::literal("0")),
    ]
}

pub fn run(options: &LessonOptions) -> Result<SchemaReport> {
    let mut engine = options.open()?;
    engine.register_table("users", users_columns())?;

    let created = engine.create_all()?;
    tracing::info!("Lesson 1: created {} table(s)", created.len());

    Ok(SchemaReport::new(&engine, &options.url, created))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_users_table() {
        let report = run(&LessonOptions::memory()).unwrap();
        assert_eq!(report.created, vec!["users"]);
        assert_eq!(report.tables.len(), 1);

        let sql = &report.tables[0].sql;
        assert!(sql.starts_with("CREATE TABLE users ("));
        assert!(sql.contains("username VARCHAR(32) NOT NULL UNIQUE"));
        assert!(sql.contains("is_staff BOOLEAN NOT NULL DEFAULT 0"));
    }
}
