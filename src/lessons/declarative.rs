//! Lesson three: a struct that declares its own table.

use anyhow::Result;
use serde::Serialize;
use tablekit_db::schema::{ColumnSpec, ColumnType, ServerDefault};
use tablekit_db::value::{Row, Value};
use tablekit_db::{Declarative, Entity};

use super::{LessonOptions, MappingReport};

pub const DATABASE_FILE: &str = "example-03.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeclarativeUser {
    pub id: Option<i64>,
    pub username: String,
    pub is_staff: bool,
}

impl Entity for DeclarativeUser {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "username", "is_staff"];

    fn key(&self) -> Option<i64> {
        self.id
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", self.username.as_str().into()),
            ("is_staff", self.is_staff.into()),
        ]
    }

    fn from_row(row: &Row) -> tablekit_common::Result<Self> {
        Ok(Self {
            id: Some(row.get_i64("id")?),
            username: row.get_string("username")?,
            is_staff: row.get_bool("is_staff")?,
        })
    }
}

impl Declarative for DeclarativeUser {
    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("username", ColumnType::string(32))
                .unique()
                .not_null()
                .default("")
                .server_default(ServerDefault::text("")),
            ColumnSpec::new("is_staff", ColumnType::Boolean)
                .not_null()
                .default(false)
                .server_default(ServerDefault::literal("0")),
        ]
    }
}

pub fn run(options: &LessonOptions) -> Result<MappingReport> {
    let mut engine = options.open()?;
    engine.register_entity::<DeclarativeUser>()?;

    let created = engine.create_all()?;
    tracing::info!("Lesson 3: {} declared its own table", DeclarativeUser::NAME);

    MappingReport::new::<DeclarativeUser>(&engine, &options.url, created)
}
