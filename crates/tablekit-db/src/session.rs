//! Unit of work.
//!
//! A [`Session`] owns one pooled connection. Entities added to it are staged
//! in memory and written in a single transaction on [`Session::commit`]. Keys
//! and defaults assigned by the database are read back into the tracked
//! instances only once that transaction has committed.

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use rusqlite::{params_from_iter, Connection};
use tablekit_common::{Error, Result};

use crate::engine::Engine;
use crate::mapper::{Entity, Mapping};
use crate::pool::{sqlite_error, PooledConnection};
use crate::query::{Col, PairQuery, Query};
use crate::relationship::{Cardinality, Navigation, Relationship};
use crate::value::{Row, Value};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing staged.
    Clean,
    /// Entities staged, not yet written.
    Dirty,
    /// Written and committed, keys not yet read back.
    Flushed,
    /// A commit failed; only `rollback` and `close` are allowed.
    Failed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Clean => "clean",
            SessionState::Dirty => "dirty",
            SessionState::Flushed => "flushed",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Typed reference to an entity tracked by a session.
pub struct Handle<E> {
    index: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Handle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Handle<E> {}

impl<E> PartialEq for Handle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<E> Eq for Handle<E> {}

impl<E> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    New,
    Dirty,
    Persistent,
}

trait TrackedEntity {
    fn entity_type(&self) -> TypeId;
    fn name(&self) -> &'static str;
    fn key(&self) -> Option<i64>;
    fn values(&self) -> Vec<(&'static str, Value)>;
    fn reload(&mut self, row: &Row) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> TrackedEntity for E {
    fn entity_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn name(&self) -> &'static str {
        E::NAME
    }

    fn key(&self) -> Option<i64> {
        Entity::key(self)
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        self.to_values()
    }

    fn reload(&mut self, row: &Row) -> Result<()> {
        *self = E::from_row(row)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Tracked {
    entity: Box<dyn TrackedEntity>,
    status: Status,
}

/// Statement bookkeeping shared by every code path that talks to SQLite.
struct Statements<'a> {
    echo: bool,
    count: &'a Cell<u64>,
}

impl Statements<'_> {
    fn log(&self, sql: &str, params: &[Value]) {
        self.count.set(self.count.get() + 1);
        if self.echo {
            tracing::info!(target: "tablekit_db::sql", "{sql} {params:?}");
        } else {
            tracing::trace!(target: "tablekit_db::sql", "{sql} {params:?}");
        }
    }

    fn execute(&self, conn: &Connection, sql: &str, params: &[Value]) -> Result<usize> {
        self.log(sql, params);
        conn.execute(sql, params_from_iter(params.iter()))
            .map_err(sqlite_error)
    }

    /// Read one entity row back by key.
    fn select_by_key(&self, conn: &Connection, mapping: &Mapping, key: i64) -> Result<Row> {
        let table = &mapping.table.name;
        let sql = format!(
            "SELECT {} FROM {table} WHERE {table}.{} = ?1",
            mapping.select_list(),
            mapping.key_column()
        );
        let params = [Value::Integer(key)];
        self.log(&sql, &params);

        let mut stmt = conn.prepare(&sql).map_err(sqlite_error)?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(sqlite_error)?;
        match rows.next().map_err(sqlite_error)? {
            Some(row) => read_entity(row, 0, mapping),
            None => Err(Error::not_found(
                mapping.entity,
                format!("{} = {key}", mapping.key_column()),
            )),
        }
    }

    fn insert(&self, conn: &Connection, mapping: &Mapping, entity: &dyn TrackedEntity) -> Result<i64> {
        let mut values: HashMap<&str, Value> = entity
            .values()
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect();

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for column in &mapping.table.columns {
            let value = match values.remove(column.name.as_str()) {
                Some(value) => value,
                None if column.primary_key => continue,
                None => match (&column.default, &column.server_default) {
                    (Some(default), _) => default.resolve(),
                    (None, Some(_)) => continue,
                    (None, None) => Value::Null,
                },
            };
            columns.push(column.name.as_str());
            params.push(value);
        }

        let table = &mapping.table.name;
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        self.execute(conn, &sql, &params)?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, conn: &Connection, mapping: &Mapping, entity: &dyn TrackedEntity) -> Result<i64> {
        let key = entity
            .key()
            .ok_or_else(|| Error::internal(format!("{} staged as update without a key", entity.name())))?;
        let key_column = mapping.key_column();
        let assignments: Vec<(&str, Value)> = entity
            .values()
            .into_iter()
            .filter(|(column, _)| *column != key_column)
            .collect();
        if assignments.is_empty() {
            return Ok(key);
        }

        let set: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        let mut params: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
        params.push(Value::Integer(key));
        let sql = format!(
            "UPDATE {} SET {} WHERE {key_column} = ?{}",
            mapping.table.name,
            set.join(", "),
            params.len()
        );
        if self.execute(conn, &sql, &params)? == 0 {
            return Err(Error::not_found(entity.name(), format!("{key_column} = {key}")));
        }
        Ok(key)
    }
}

/// Decode the columns of `mapping` starting at `offset` in a result row.
fn read_entity(row: &rusqlite::Row<'_>, offset: usize, mapping: &Mapping) -> Result<Row> {
    let mut out = Row::new();
    for (i, name) in mapping.columns.iter().enumerate() {
        let column = mapping.table.column(name).ok_or_else(|| {
            Error::internal(format!("{} maps unknown column '{name}'", mapping.entity))
        })?;
        let raw = row.get_ref(offset + i).map_err(sqlite_error)?;
        out.push(*name, Value::decode(raw, column.column_type)?);
    }
    Ok(out)
}

fn same_row(a: Option<i64>, b: Option<i64>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

/// A unit of work over one pooled connection.
pub struct Session<'e> {
    engine: &'e Engine,
    conn: Option<PooledConnection>,
    state: SessionState,
    tracked: Vec<Option<Tracked>>,
    round_trips: Cell<u64>,
}

impl<'e> Session<'e> {
    pub(crate) fn new(engine: &'e Engine, conn: PooledConnection) -> Self {
        tracing::debug!("Session opened");
        Self {
            engine,
            conn: Some(conn),
            state: SessionState::Clean,
            tracked: Vec::new(),
            round_trips: Cell::new(0),
        }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of statements sent to the database so far.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.get()
    }

    fn statements(&self) -> Statements<'_> {
        Statements {
            echo: self.engine.echo(),
            count: &self.round_trips,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            SessionState::Failed => Err(Error::session_state(
                "a previous commit failed; roll back before reusing the session",
            )),
            SessionState::Closed => Err(Error::session_state("session is closed")),
            _ => Ok(()),
        }
    }

    fn conn(&self) -> Result<&PooledConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::session_state("session is closed"))
    }

    fn pending(&self) -> usize {
        self.tracked
            .iter()
            .flatten()
            .filter(|t| t.status != Status::Persistent)
            .count()
    }

    /// Stage `entity`: an insert when it has no key yet, an update otherwise.
    pub fn add<E: Entity>(&mut self, entity: E) -> Result<Handle<E>> {
        self.ensure_usable()?;
        self.engine.mapper().mapping::<E>()?;

        let status = if Entity::key(&entity).is_some() {
            Status::Dirty
        } else {
            Status::New
        };
        self.tracked.push(Some(Tracked {
            entity: Box::new(entity),
            status,
        }));
        self.state = SessionState::Dirty;
        tracing::trace!("Staged {} ({status:?})", E::NAME);
        Ok(Handle {
            index: self.tracked.len() - 1,
            _entity: PhantomData,
        })
    }

    /// The tracked instance behind `handle`, or `None` once it was discarded.
    pub fn get<E: Entity>(&self, handle: Handle<E>) -> Option<&E> {
        self.tracked
            .get(handle.index)?
            .as_ref()?
            .entity
            .as_any()
            .downcast_ref::<E>()
    }

    /// Mutable access. A persisted entity is staged for update again.
    pub fn get_mut<E: Entity>(&mut self, handle: Handle<E>) -> Option<&mut E> {
        if self.ensure_usable().is_err() {
            return None;
        }
        let tracked = self.tracked.get_mut(handle.index)?.as_mut()?;
        if tracked.status == Status::Persistent {
            tracked.status = Status::Dirty;
            self.state = SessionState::Dirty;
        }
        tracked.entity.as_any_mut().downcast_mut::<E>()
    }

    /// Write every staged entity in one transaction.
    ///
    /// On failure nothing is written, no keys are assigned, and the session
    /// stays unusable until [`Session::rollback`].
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let pending = self.pending();
        if pending == 0 {
            self.state = SessionState::Clean;
            return Ok(());
        }

        let reloaded = match self.flush() {
            Ok(reloaded) => reloaded,
            Err(e) => {
                tracing::warn!("Commit failed, session needs a rollback: {e}");
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        self.state = SessionState::Flushed;

        for (index, row) in reloaded {
            if let Some(tracked) = self.tracked.get_mut(index).and_then(Option::as_mut) {
                tracked.entity.reload(&row)?;
                tracked.status = Status::Persistent;
            }
        }
        self.state = SessionState::Clean;
        tracing::info!("Committed {pending} entities");
        Ok(())
    }

    fn flush(&mut self) -> Result<Vec<(usize, Row)>> {
        let engine = self.engine;
        let statements = Statements {
            echo: engine.echo(),
            count: &self.round_trips,
        };
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::session_state("session is closed"))?;

        let tx = conn.transaction().map_err(sqlite_error)?;
        statements.log("BEGIN", &[]);
        let mut reloaded = Vec::new();
        for (index, tracked) in self.tracked.iter().enumerate() {
            let Some(tracked) = tracked else { continue };
            let mapping = engine
                .mapper()
                .mapping_of(tracked.entity.entity_type(), tracked.entity.name())?;
            let key = match tracked.status {
                Status::Persistent => continue,
                Status::New => statements.insert(&tx, mapping, &*tracked.entity)?,
                Status::Dirty => statements.update(&tx, mapping, &*tracked.entity)?,
            };
            reloaded.push((index, statements.select_by_key(&tx, mapping, key)?));
        }
        tx.commit().map_err(sqlite_error)?;
        statements.log("COMMIT", &[]);
        Ok(reloaded)
    }

    /// Discard staged inserts and restore staged updates from the database.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::session_state("session is closed"));
        }
        let engine = self.engine;
        let statements = Statements {
            echo: engine.echo(),
            count: &self.round_trips,
        };
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::session_state("session is closed"))?;

        let mut discarded = 0;
        for slot in self.tracked.iter_mut() {
            let Some(tracked) = slot else { continue };
            let status = tracked.status;
            match status {
                Status::Persistent => {}
                Status::New => {
                    *slot = None;
                    discarded += 1;
                }
                Status::Dirty => {
                    let mapping = engine
                        .mapper()
                        .mapping_of(tracked.entity.entity_type(), tracked.entity.name())?;
                    let stored = match tracked.entity.key() {
                        Some(key) => match statements.select_by_key(conn, mapping, key) {
                            Ok(row) => Some(row),
                            Err(Error::NotFound { .. }) => None,
                            Err(e) => return Err(e),
                        },
                        None => None,
                    };
                    match stored {
                        Some(row) => {
                            tracked.entity.reload(&row)?;
                            tracked.status = Status::Persistent;
                        }
                        None => {
                            *slot = None;
                            discarded += 1;
                        }
                    }
                }
            }
        }
        self.state = SessionState::Clean;
        tracing::info!("Rolled back, discarded {discarded} staged entities");
        Ok(())
    }

    /// Release the connection. Dropping the session does the same.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pending = self.pending();
            if pending > 0 {
                tracing::warn!("Session closed with {pending} uncommitted entities");
            }
            drop(conn);
            self.state = SessionState::Closed;
            tracing::debug!("Session closed after {} statements", self.round_trips());
        }
    }

    pub fn query<E: Entity>(&self) -> Query<'_, E> {
        Query::new(self)
    }

    /// Query `(A, B)` pairs. `B` must be brought in with a join.
    pub fn query_pair<A: Entity, B: Entity>(&self) -> PairQuery<'_, A, B> {
        PairQuery::new(self)
    }

    /// Resolve one navigation on a single entity.
    pub fn resolve<S: Entity>(&self, navigation: &impl Navigation<S>, source: &mut S) -> Result<()> {
        self.resolve_all(navigation, std::slice::from_mut(source))
    }

    /// Resolve one navigation on many entities with a single query.
    pub fn resolve_all<S: Entity>(
        &self,
        navigation: &impl Navigation<S>,
        sources: &mut [S],
    ) -> Result<()> {
        self.ensure_usable()?;
        navigation.load(self, sources)
    }

    /// Point `child` at a persisted `owner` through `relationship`.
    ///
    /// For one-to-one relationships the owner must not already have a child,
    /// neither in the database nor staged in this session.
    pub fn attach<O: Entity, T: Entity>(
        &self,
        relationship: &Relationship<O, T>,
        owner: &O,
        child: &mut T,
    ) -> Result<()> {
        self.ensure_usable()?;
        let info = relationship.info();
        self.engine.relations().ensure_declared(&info)?;
        let key = Entity::key(owner).ok_or_else(|| {
            Error::invalid_input(format!(
                "{} must be committed before it can own a {}",
                O::NAME,
                T::NAME
            ))
        })?;

        if relationship.cardinality() == Cardinality::OneToOne {
            let child_key = Entity::key(child);
            let staged = self
                .tracked
                .iter()
                .flatten()
                .filter(|t| t.status != Status::Persistent)
                .filter_map(|t| t.entity.as_any().downcast_ref::<T>())
                .any(|other| {
                    relationship.child_key(other) == Some(key)
                        && !same_row(Entity::key(other), child_key)
                });
            let stored = self
                .query::<T>()
                .filter(Col::new(T::TABLE, info.foreign_key).eq(key))
                .all()?
                .iter()
                .any(|other| !same_row(Entity::key(other), child_key));
            if staged || stored {
                return Err(Error::cardinality(
                    info.qualified_name(),
                    format!("{} #{key} already has a {}", O::NAME, T::NAME),
                ));
            }
        }

        relationship.link(owner, key, child);
        Ok(())
    }

    /// Run literal SQL and return its rows undecoded.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_usable()?;
        let conn = self.conn()?;
        self.statements().log(sql, params);

        let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        if names.is_empty() {
            stmt.execute(params_from_iter(params.iter()))
                .map_err(sqlite_error)?;
            return Ok(Vec::new());
        }

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(sqlite_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut decoded = Row::new();
            for (i, name) in names.iter().enumerate() {
                let raw = row.get_ref(i).map_err(sqlite_error)?;
                decoded.push(name.as_str(), Value::from_raw(raw));
            }
            out.push(decoded);
        }
        Ok(out)
    }

    /// Run a query whose result rows hold the columns of each mapping in `layout`.
    pub(crate) fn fetch(
        &self,
        sql: &str,
        params: &[Value],
        layout: &[&Mapping],
    ) -> Result<Vec<Vec<Row>>> {
        self.ensure_usable()?;
        let conn = self.conn()?;
        self.statements().log(sql, params);

        let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(sqlite_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut offset = 0;
            let mut parts = Vec::with_capacity(layout.len());
            for mapping in layout {
                parts.push(read_entity(row, offset, mapping)?);
                offset += mapping.columns.len();
            }
            out.push(parts);
        }
        Ok(out)
    }

    pub(crate) fn fetch_scalar(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.ensure_usable()?;
        let conn = self.conn()?;
        self.statements().log(sql, params);
        conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(sqlite_error)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("tracked", &self.tracked.iter().flatten().count())
            .field("round_trips", &self.round_trips.get())
            .finish()
    }
}
