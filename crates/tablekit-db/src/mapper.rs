//! Entity mapper: binds plain Rust types to registered tables.
//!
//! An [`Entity`] declares, statically, which columns its fields map to and
//! how to convert between its fields and [`Value`]s. Binding checks that
//! declaration against the table once, at startup, so a bad mapping never
//! surfaces on first use.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;

use tablekit_common::{Error, Result};

use crate::schema::{ColumnSpec, TableRef};
use crate::value::{Row, Value};

/// A type stored as one row of a table.
pub trait Entity: Clone + fmt::Debug + 'static {
    /// Name used in errors and logs, e.g. `"User"`.
    const NAME: &'static str;

    /// Table the entity is stored in.
    const TABLE: &'static str;

    /// Columns the entity's fields map to, primary key included.
    const COLUMNS: &'static [&'static str];

    /// Surrogate key, `None` until the entity has been flushed.
    fn key(&self) -> Option<i64>;

    /// Values for the columns this instance sets. Columns left out get their
    /// client default, then their server default.
    fn to_values(&self) -> Vec<(&'static str, Value)>;

    /// Build an instance from a row holding every column in [`Entity::COLUMNS`].
    fn from_row(row: &Row) -> Result<Self>;

    /// Key column. Binding guarantees it is the first mapped column.
    fn key_column() -> &'static str {
        Self::COLUMNS.first().copied().unwrap_or_default()
    }
}

/// An entity that declares its own table.
pub trait Declarative: Entity {
    fn columns() -> Vec<ColumnSpec>;
}

/// A validated binding between an entity type and its table.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub entity: &'static str,
    pub table: TableRef,
    pub columns: &'static [&'static str],
}

impl Mapping {
    /// Name of the key column.
    pub fn key_column(&self) -> &str {
        &self.table.primary_key().name
    }

    /// Qualified select list, e.g. `users.id, users.username`.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{c}", self.table.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Registry of entity bindings, keyed by type.
#[derive(Debug, Default)]
pub struct Mapper {
    mappings: HashMap<TypeId, Mapping>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `E` to `table`.
    ///
    /// Fails with [`Error::MappingConflict`] when `E` is already bound, the
    /// table is not `E::TABLE`, `E` maps a column the table lacks or repeats
    /// one, `E` does not map the primary key, or the table has a required
    /// column that `E` leaves unmapped.
    pub fn bind<E: Entity>(&mut self, table: TableRef) -> Result<&Mapping> {
        let type_id = TypeId::of::<E>();
        if let Some(existing) = self.mappings.get(&type_id) {
            return Err(Error::mapping_conflict(
                E::NAME,
                format!("already bound to table '{}'", existing.table.name),
            ));
        }
        if table.name != E::TABLE {
            return Err(Error::mapping_conflict(
                E::NAME,
                format!("declares table '{}' but was bound to '{}'", E::TABLE, table.name),
            ));
        }

        let mut seen = HashSet::new();
        for column in E::COLUMNS {
            if !seen.insert(*column) {
                return Err(Error::mapping_conflict(
                    E::NAME,
                    format!("maps column '{column}' twice"),
                ));
            }
            if table.column(column).is_none() {
                return Err(Error::mapping_conflict(
                    E::NAME,
                    format!("maps column '{column}' which '{}' does not have", table.name),
                ));
            }
        }

        let key = &table.primary_key().name;
        if E::COLUMNS.first() != Some(&key.as_str()) {
            return Err(Error::mapping_conflict(
                E::NAME,
                format!("must map primary key '{key}' as its first column"),
            ));
        }

        if let Some(required) = table
            .columns
            .iter()
            .find(|c| c.is_required() && !seen.contains(c.name.as_str()))
        {
            return Err(Error::mapping_conflict(
                E::NAME,
                format!("leaves required column '{}' unmapped", required.name),
            ));
        }

        tracing::debug!("Bound {} ({}) to table {}", E::NAME, type_name::<E>(), table.name);
        let mapping = Mapping {
            entity: E::NAME,
            table,
            columns: E::COLUMNS,
        };
        Ok(self.mappings.entry(type_id).or_insert(mapping))
    }

    /// The binding for `E`.
    pub fn mapping<E: Entity>(&self) -> Result<&Mapping> {
        self.mapping_of(TypeId::of::<E>(), E::NAME)
    }

    pub(crate) fn mapping_of(&self, type_id: TypeId, entity: &str) -> Result<&Mapping> {
        self.mappings
            .get(&type_id)
            .ok_or_else(|| Error::mapping_conflict(entity, "is not mapped to any table"))
    }

    pub fn is_bound<E: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<E>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, SchemaRegistry, ServerDefault};

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: Option<i64>,
        label: String,
    }

    impl Entity for Tag {
        const NAME: &'static str = "Tag";
        const TABLE: &'static str = "tags";
        const COLUMNS: &'static [&'static str] = &["id", "label"];

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn to_values(&self) -> Vec<(&'static str, Value)> {
            vec![("label", self.label.as_str().into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: Some(row.get_i64("id")?),
                label: row.get_string("label")?,
            })
        }
    }

    fn tags_table(extra: Option<ColumnSpec>) -> TableRef {
        let mut columns = vec![
            ColumnSpec::primary_key("id"),
            ColumnSpec::new("label", ColumnType::string(20)).not_null(),
        ];
        columns.extend(extra);
        SchemaRegistry::new().register("tags", columns).unwrap()
    }

    #[test]
    fn test_bind() {
        let mut mapper = Mapper::new();
        let mapping = mapper.bind::<Tag>(tags_table(None)).unwrap();
        assert_eq!(mapping.select_list(), "tags.id, tags.label");
        assert_eq!(mapping.key_column(), "id");
        assert!(mapper.is_bound::<Tag>());
    }

    #[test]
    fn test_bind_twice() {
        let mut mapper = Mapper::new();
        mapper.bind::<Tag>(tags_table(None)).unwrap();
        let err = mapper.bind::<Tag>(tags_table(None)).unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));
    }

    #[test]
    fn test_unmapped_required_column() {
        let extra = ColumnSpec::new("color", ColumnType::string(10)).not_null();
        let err = Mapper::new().bind::<Tag>(tags_table(Some(extra))).unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_unmapped_columns_with_defaults_are_fine() {
        let nullable = ColumnSpec::new("note", ColumnType::string(10));
        Mapper::new().bind::<Tag>(tags_table(Some(nullable))).unwrap();

        let defaulted = ColumnSpec::new("color", ColumnType::string(10))
            .not_null()
            .server_default(ServerDefault::text("red"));
        Mapper::new().bind::<Tag>(tags_table(Some(defaulted))).unwrap();
    }

    #[test]
    fn test_wrong_table() {
        let other = SchemaRegistry::new()
            .register(
                "labels",
                vec![
                    ColumnSpec::primary_key("id"),
                    ColumnSpec::new("label", ColumnType::string(20)),
                ],
            )
            .unwrap();
        let err = Mapper::new().bind::<Tag>(other).unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));
    }

    #[test]
    fn test_unknown_column() {
        let table = SchemaRegistry::new()
            .register("tags", vec![ColumnSpec::primary_key("id")])
            .unwrap();
        let err = Mapper::new().bind::<Tag>(table).unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_key_must_come_first() {
        #[derive(Debug, Clone)]
        struct Backwards;

        impl Entity for Backwards {
            const NAME: &'static str = "Backwards";
            const TABLE: &'static str = "tags";
            const COLUMNS: &'static [&'static str] = &["label", "id"];

            fn key(&self) -> Option<i64> {
                None
            }

            fn to_values(&self) -> Vec<(&'static str, Value)> {
                Vec::new()
            }

            fn from_row(_row: &Row) -> Result<Self> {
                Ok(Self)
            }
        }

        let err = Mapper::new().bind::<Backwards>(tags_table(None)).unwrap_err();
        assert!(err.to_string().contains("primary key"));
        assert_eq!(Tag::key_column(), "id");
    }

    #[test]
    fn test_unbound_lookup() {
        let err = Mapper::new().mapping::<Tag>().unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));
    }
}
