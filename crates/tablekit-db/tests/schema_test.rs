//! Integration tests for table materialisation against database files.

mod common;

use assert_matches::assert_matches;
use tablekit_common::Error;
use tablekit_db::models::{register_blog, User};
use tablekit_db::schema::{ColumnSpec, ColumnType, ServerDefault};
use tablekit_db::Engine;
use tempfile::tempdir;

fn url(dir: &tempfile::TempDir, file: &str) -> String {
    format!("sqlite:///{}", dir.path().join(file).display())
}

#[test]
fn data_survives_a_new_engine() {
    let dir = tempdir().unwrap();
    let url = url(&dir, "example-04.db");

    {
        let mut engine = Engine::open(&url, 2).unwrap();
        register_blog(&mut engine).unwrap();
        assert_eq!(engine.create_all().unwrap().len(), 3);
        let mut session = engine.session().unwrap();
        session.add(User::new("admin", true)).unwrap();
        session.commit().unwrap();
    }

    let mut engine = Engine::open(&url, 2).unwrap();
    register_blog(&mut engine).unwrap();
    assert!(engine.create_all().unwrap().is_empty());
    let session = engine.session().unwrap();
    let admin = session
        .query::<User>()
        .filter_by("username", "admin")
        .one()
        .unwrap();
    assert!(admin.is_staff);
}

#[test]
fn incompatible_existing_table_is_a_schema_conflict() {
    let dir = tempdir().unwrap();
    let url = url(&dir, "example-01.db");

    let mut first = Engine::open(&url, 1).unwrap();
    first
        .register_table(
            "users",
            vec![
                ColumnSpec::primary_key("id"),
                ColumnSpec::new("username", ColumnType::string(32)).not_null(),
            ],
        )
        .unwrap();
    first.create_all().unwrap();
    drop(first);

    let mut second = Engine::open(&url, 1).unwrap();
    second
        .register_table(
            "users",
            vec![
                ColumnSpec::primary_key("id"),
                ColumnSpec::new("username", ColumnType::string(32)).not_null(),
                ColumnSpec::new("is_staff", ColumnType::Boolean)
                    .not_null()
                    .server_default(ServerDefault::literal("0")),
            ],
        )
        .unwrap();
    let err = second.create_all().unwrap_err();
    assert_matches!(err, Error::SchemaConflict { ref table, .. } if table == "users");
}

#[test]
fn duplicate_registration_is_a_schema_conflict() {
    let mut engine = Engine::memory().unwrap();
    register_blog(&mut engine).unwrap();
    let err = engine
        .register_table("users", vec![ColumnSpec::primary_key("id")])
        .unwrap_err();
    assert_matches!(err, Error::SchemaConflict { .. });
}

#[test]
fn echo_does_not_change_results() {
    let mut engine = Engine::memory().unwrap().with_echo(true);
    register_blog(&mut engine).unwrap();
    engine.create_all().unwrap();

    let mut session = engine.session().unwrap();
    common::seed_users(&mut session);
    assert!(engine.echo());
    assert_eq!(session.query::<User>().count().unwrap(), 2);
}
