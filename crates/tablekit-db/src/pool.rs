//! Connection pool management for SQLite via r2d2.
//!
//! Connection strings follow the `sqlite:///path/to/file.db` convention; a
//! bare path is accepted too, and `sqlite://` or `:memory:` select an
//! in-memory database.

use std::path::PathBuf;
use std::str::FromStr;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tablekit_common::{Error, Result};

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Pragmas applied to every new connection.
///
/// `case_sensitive_like` makes `LIKE` case-sensitive so `ilike` has to ask for
/// case folding explicitly.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA case_sensitive_like = ON;";

/// Where a pool's connections point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// A database file on disk, created on first connect.
    File(PathBuf),
    /// A private in-memory database shared by the pool's connections.
    Memory,
}

impl FromStr for DatabaseUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" => Err(Error::invalid_input("database url is empty")),
            ":memory:" | "sqlite://" | "sqlite:///:memory:" => Ok(Self::Memory),
            _ => {
                if let Some(path) = s.strip_prefix("sqlite:///") {
                    Ok(Self::File(PathBuf::from(path)))
                } else if s.starts_with("sqlite://") {
                    Err(Error::invalid_input(format!(
                        "sqlite urls take no host, use sqlite:///<path>: {s}"
                    )))
                } else if let Some((scheme, _)) = s.split_once("://") {
                    Err(Error::invalid_input(format!(
                        "unsupported database scheme '{scheme}'"
                    )))
                } else {
                    Ok(Self::File(PathBuf::from(s)))
                }
            }
        }
    }
}

/// Initialize a database pool for a connection string.
pub fn init_pool(url: &str, max_size: u32) -> Result<DbPool> {
    match url.parse::<DatabaseUrl>()? {
        DatabaseUrl::Memory => init_memory_pool_sized(max_size),
        DatabaseUrl::File(path) => init_file_pool(&path, max_size),
    }
}

/// Initialize a database pool backed by a file on disk.
///
/// Creates the SQLite file if it does not exist and enables foreign keys and
/// WAL journal mode on every new connection.
pub fn init_file_pool(path: &std::path::Path, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
    });

    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;

    tracing::debug!("Opened database pool at {}", path.display());
    Ok(pool)
}

/// Initialize an in-memory database pool (useful for tests).
///
/// Each call creates a uniquely-named shared-cache in-memory database so
/// that parallel tests do not interfere with each other, while all
/// connections *within* a single pool still share state.
pub fn init_memory_pool() -> Result<DbPool> {
    init_memory_pool_sized(DEFAULT_POOL_SIZE)
}

fn init_memory_pool_sized(max_size: u32) -> Result<DbPool> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:tablekit_mem_{n}?mode=memory&cache=shared");

    let manager =
        SqliteConnectionManager::file(uri).with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create in-memory pool: {e}")))
}

/// Convenience helper to get a connection from the pool.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {e}")))
}

/// Classify a SQLite error into the tablekit taxonomy.
///
/// Constraint failures (unique, not-null, foreign key, check) become
/// [`Error::ConstraintViolation`]; everything else is a database error.
pub(crate) fn sqlite_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::constraint(message.clone().unwrap_or_else(|| err.to_string()))
        }
        _ => Error::database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urls() {
        assert_eq!(
            "sqlite:///example-04.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("example-04.db"))
        );
        assert_eq!(
            "sqlite:////var/lib/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("/var/lib/app.db"))
        );
        assert_eq!(
            "data/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::File(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            ":memory:".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::Memory
        );
        assert_eq!(
            "sqlite://".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::Memory
        );
    }

    #[test]
    fn test_rejects_foreign_schemes() {
        assert!(matches!(
            "postgres://localhost/db".parse::<DatabaseUrl>(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            "sqlite://host/db".parse::<DatabaseUrl>(),
            Err(Error::InvalidInput(_))
        ));
        assert!("".parse::<DatabaseUrl>().is_err());
    }

    #[test]
    fn test_init_memory_pool() {
        let pool = init_memory_pool().unwrap();
        assert_eq!(pool.max_size(), DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_pragmas_applied() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);

        let matched: bool = conn
            .query_row("SELECT 'Flask' LIKE 'flask'", [], |row| row.get(0))
            .unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_memory_pool_shares_state() {
        let pool = init_memory_pool().unwrap();
        {
            let conn = get_conn(&pool).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
                .unwrap();
        }
        let conn = get_conn(&pool).unwrap();
        let x: i64 = conn.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 1);
    }

    #[test]
    fn test_memory_pools_are_isolated() {
        let a = init_memory_pool().unwrap();
        let b = init_memory_pool().unwrap();
        get_conn(&a)
            .unwrap()
            .execute_batch("CREATE TABLE only_in_a (x INTEGER);")
            .unwrap();
        let count: i64 = get_conn(&b)
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'only_in_a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let url = format!("sqlite:///{}", path.display());
        let pool = init_pool(&url, 2).unwrap();
        assert_eq!(pool.max_size(), 2);
        get_conn(&pool).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_constraint_errors_are_classified() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        conn.execute_batch("CREATE TABLE u (name TEXT UNIQUE); INSERT INTO u VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO u VALUES ('a')", [])
            .map_err(sqlite_error)
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        let err = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .map_err(sqlite_error)
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}
