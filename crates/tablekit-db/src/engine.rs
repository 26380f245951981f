//! The engine ties a connection pool to the schema, mapping and relationship
//! registries, and hands out sessions.

use tablekit_common::{Error, Result};

use crate::mapper::{Declarative, Entity, Mapper};
use crate::pool::{self, get_conn, DbPool};
use crate::relationship::{Relationship, RelationshipResolver};
use crate::schema::{ColumnSpec, SchemaRegistry, TableRef};
use crate::session::Session;

pub struct Engine {
    pool: DbPool,
    registry: SchemaRegistry,
    mapper: Mapper,
    relations: RelationshipResolver,
    echo: bool,
}

impl Engine {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            registry: SchemaRegistry::new(),
            mapper: Mapper::new(),
            relations: RelationshipResolver::new(),
            echo: false,
        }
    }

    /// Open an engine for a connection string such as `sqlite:///example-04.db`.
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        Ok(Self::new(pool::init_pool(url, pool_size)?))
    }

    /// An engine over a fresh private in-memory database.
    pub fn memory() -> Result<Self> {
        Ok(Self::new(pool::init_memory_pool()?))
    }

    /// Log every statement at INFO instead of TRACE.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn relations(&self) -> &RelationshipResolver {
        &self.relations
    }

    pub fn register_table(&mut self, name: &str, columns: Vec<ColumnSpec>) -> Result<TableRef> {
        self.registry.register(name, columns)
    }

    /// Bind `E` to its already registered table.
    pub fn bind<E: Entity>(&mut self) -> Result<()> {
        let table = self.registry.table(E::TABLE).cloned().ok_or_else(|| {
            Error::mapping_conflict(E::NAME, format!("table '{}' is not registered", E::TABLE))
        })?;
        self.mapper.bind::<E>(table)?;
        Ok(())
    }

    /// Register the table `E` declares and bind `E` to it.
    pub fn register_entity<E: Declarative>(&mut self) -> Result<()> {
        if self.mapper.is_bound::<E>() {
            return Err(Error::mapping_conflict(
                E::NAME,
                format!("already bound to table '{}'", E::TABLE),
            ));
        }
        let table = self.registry.register(E::TABLE, E::columns())?;
        self.mapper.bind::<E>(table)?;
        Ok(())
    }

    pub fn declare_relationship<O: Entity, T: Entity>(
        &mut self,
        relationship: Relationship<O, T>,
    ) -> Result<()> {
        self.relations.declare(&self.mapper, &relationship)?;
        Ok(())
    }

    /// Create every registered table that does not exist yet.
    /// Returns the names of the tables created.
    pub fn create_all(&self) -> Result<Vec<String>> {
        let conn = get_conn(&self.pool)?;
        self.registry.create_all(&conn)
    }

    /// Start a unit of work on its own connection.
    pub fn session(&self) -> Result<Session<'_>> {
        Ok(Session::new(self, get_conn(&self.pool)?))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tables", &self.registry.tables().count())
            .field("relationships", &self.relations.declared().len())
            .field("echo", &self.echo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn test_bind_requires_registered_table() {
        #[derive(Debug, Clone)]
        struct Note;

        impl Entity for Note {
            const NAME: &'static str = "Note";
            const TABLE: &'static str = "notes";
            const COLUMNS: &'static [&'static str] = &["id"];

            fn key(&self) -> Option<i64> {
                None
            }

            fn to_values(&self) -> Vec<(&'static str, crate::value::Value)> {
                Vec::new()
            }

            fn from_row(_row: &crate::value::Row) -> Result<Self> {
                Ok(Self)
            }
        }

        let mut engine = Engine::memory().unwrap();
        let err = engine.bind::<Note>().unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));

        engine
            .register_table(
                "notes",
                vec![
                    ColumnSpec::primary_key("id"),
                    ColumnSpec::new("body", ColumnType::string(200)),
                ],
            )
            .unwrap();
        engine.bind::<Note>().unwrap();
        assert_eq!(engine.create_all().unwrap(), vec!["notes".to_string()]);
        assert!(engine.create_all().unwrap().is_empty());
    }

    #[test]
    fn test_session_takes_a_pooled_connection() {
        let engine = Engine::memory().unwrap();
        let idle = engine.pool().state().idle_connections;
        let session = engine.session().unwrap();
        assert_eq!(engine.pool().state().idle_connections, idle - 1);
        session.close();
        assert_eq!(engine.pool().state().idle_connections, idle);
    }
}
