//! Guided lessons, one per step from a bare table to related models.
//!
//! - `table` - a table declared by hand and created
//! - `classic` - a plain struct bound to a pre-registered table
//! - `declarative` - a struct that declares its own table
//! - `relations` - users, profiles and posts with sessions and queries

pub mod classic;
pub mod declarative;
pub mod relations;
pub mod table;

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use tablekit_db::Engine;

use crate::config::Config;

/// How a lesson connects to its database.
#[derive(Debug, Clone)]
pub struct LessonOptions {
    pub url: String,
    pub pool_size: u32,
    pub echo: bool,
}

impl LessonOptions {
    /// Options for a lesson whose default database file is `file_name`.
    pub fn from_config(config: &Config, file_name: &str) -> Self {
        Self {
            url: config.database_url(file_name),
            pool_size: config.database.pool_size,
            echo: config.database.echo,
        }
    }

    /// A throwaway in-memory database.
    pub fn memory() -> Self {
        Self {
            url: "sqlite://".to_string(),
            pool_size: tablekit_db::pool::DEFAULT_POOL_SIZE,
            echo: false,
        }
    }

    pub fn open(&self) -> Result<Engine> {
        let engine = Engine::open(&self.url, self.pool_size)
            .with_context(|| format!("Failed to open database {}", self.url))?;
        tracing::debug!("Opened {} (echo: {})", self.url, self.echo);
        Ok(engine.with_echo(self.echo))
    }
}

/// Tables a lesson materialised.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub database: String,
    /// Tables created by this run; existing tables are left alone.
    pub created: Vec<String>,
    pub tables: Vec<TableDdl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDdl {
    pub name: String,
    pub sql: String,
}

impl SchemaReport {
    pub(crate) fn new(engine: &Engine, database: &str, created: Vec<String>) -> Self {
        let tables = engine
            .registry()
            .tables()
            .map(|table| TableDdl {
                name: table.name.clone(),
                sql: table.create_sql(),
            })
            .collect();
        Self {
            database: database.to_string(),
            created,
            tables,
        }
    }
}

impl fmt::Display for SchemaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database: {}", self.database)?;
        if self.created.is_empty() {
            writeln!(f, "All tables already exist")?;
        } else {
            writeln!(f, "Created: {}", self.created.join(", "))?;
        }
        for table in &self.tables {
            writeln!(f)?;
            writeln!(f, "{}", table.sql)?;
        }
        Ok(())
    }
}

/// A schema report plus the entity bound to it.
#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    #[serde(flatten)]
    pub schema: SchemaReport,
    pub entity: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl MappingReport {
    pub(crate) fn new<E: tablekit_db::Entity>(
        engine: &Engine,
        database: &str,
        created: Vec<String>,
    ) -> Result<Self> {
        let mapping = engine.mapper().mapping::<E>()?;
        Ok(Self {
            schema: SchemaReport::new(engine, database, created),
            entity: mapping.entity.to_string(),
            table: mapping.table.name.clone(),
            columns: mapping.columns.iter().map(|c| c.to_string()).collect(),
        })
    }
}

impl fmt::Display for MappingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema)?;
        writeln!(f)?;
        writeln!(
            f,
            "Mapped {} -> {} ({})",
            self.entity,
            self.table,
            self.columns.join(", ")
        )
    }
}
