//! Lesson two: bind a plain struct to a table registered separately.

use anyhow::Result;
use serde::Serialize;
use tablekit_db::value::{Row, Value};
use tablekit_db::Entity;

use super::{table, LessonOptions, MappingReport};

pub const DATABASE_FILE: &str = "example-02.db";

/// A user that knows nothing about tables; the mapping lives in the `Entity` impl.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassicUser {
    pub id: Option<i64>,
    pub username: String,
    pub is_staff: bool,
}

impl ClassicUser {
    pub fn new(id: Option<i64>, username: impl Into<String>, is_staff: bool) -> Self {
        Self {
            id,
            username: username.into(),
            is_staff,
        }
    }
}

impl Entity for ClassicUser {
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

pub fn run(options: &LessonOptions) -> Result<MappingReport> {
    let mut engine = options.open()?;
    engine.register_table("users", table::users_columns())?;
    engine.bind::<ClassicUser>()?;

    let created = engine.create_all()?;
    tracing::info!("Lesson 2: bound {} to users", ClassicUser::NAME);

    MappingReport::new::<ClassicUser>(&engine, &options.url, created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablekit_db::Engine;

    #[test]
    fn test_report_lists_mapping() {
        let report = run(&LessonOptions::memory()).unwrap();
        assert_eq!(report.entity, "User");
        assert_eq!(report.table, "users");
        assert_eq!(report.columns, vec!["id", "username", "is_staff"]);
        assert_eq!(report.schema.created, vec!["users"]);
    }

    #[test]
    fn test_classic_user_round_trip() {
        let mut engine = Engine::memory().unwrap();
        engine.register_table("users", table::users_columns()).unwrap();
        engine.bind::<ClassicUser>().unwrap();
        engine.create_all().unwrap();

        let mut session = engine.session().unwrap();
        let handle = session.add(ClassicUser::new(None, "admin", true)).unwrap();
        session.commit().unwrap();
        let id = session.get(handle).unwrap().id;
        assert!(id.is_some());

        let loaded = session
            .query::<ClassicUser>()
            .filter_by("username", "admin")
            .one()
            .unwrap();
        assert_eq!(loaded, ClassicUser::new(id, "admin", true));
    }
}
