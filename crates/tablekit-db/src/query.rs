//! Query builder.
//!
//! Columns are addressed through [`Col`], predicates compose into a
//! [`Predicate`] tree, and [`Query`] / [`PairQuery`] render a parameterised
//! `SELECT` that the session executes. Builder mistakes (unknown columns,
//! undeclared joins) are kept until execution and reported as
//! [`Error::InvalidQuery`].

use std::fmt;
use std::marker::PhantomData;

use tablekit_common::{Error, Result};

use crate::mapper::{Entity, Mapping};
use crate::relationship::{Navigation, RelationshipInfo};
use crate::session::Session;
use crate::value::Value;

/// A table-qualified column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Col {
    pub table: &'static str,
    pub column: &'static str,
}

impl Col {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self { table, column }
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            column: self,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    /// Case-sensitive `LIKE`.
    pub fn like(self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            column: self,
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    /// Case-insensitive `LIKE`.
    pub fn ilike(self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            column: self,
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::Not(Box::new(Predicate::IsNull(self)))
    }

    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            column: self,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Column-to-column equality, for explicit join conditions.
    pub fn eq_col(self, other: Col) -> Predicate {
        Predicate::Columns(self, other)
    }
}

impl fmt::Display for Col {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A boolean condition over columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: Col,
        op: CompareOp,
        value: Value,
    },
    Columns(Col, Col),
    Like {
        column: Col,
        pattern: String,
        case_insensitive: bool,
    },
    IsNull(Col),
    In {
        column: Col,
        values: Vec<Value>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// All of `predicates`.
pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

/// Any of `predicates`.
pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

pub fn not(predicate: Predicate) -> Predicate {
    Predicate::Not(Box::new(predicate))
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut list) => {
                list.push(other);
                Predicate::And(list)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut list) => {
                list.push(other);
                Predicate::Or(list)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    fn columns(&self, out: &mut Vec<Col>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::Like { column, .. }
            | Predicate::IsNull(column)
            | Predicate::In { column, .. } => out.push(*column),
            Predicate::Columns(a, b) => {
                out.push(*a);
                out.push(*b);
            }
            Predicate::And(list) | Predicate::Or(list) => {
                list.iter().for_each(|p| p.columns(out));
            }
            Predicate::Not(inner) => inner.columns(out),
        }
    }

    fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        fn bind(sql: &mut String, params: &mut Vec<Value>, value: &Value) {
            params.push(value.clone());
            sql.push_str(&format!("?{}", params.len()));
        }

        match self {
            Predicate::Compare {
                column,
                op: CompareOp::Eq,
                value: Value::Null,
            } => sql.push_str(&format!("{column} IS NULL")),
            Predicate::Compare {
                column,
                op: CompareOp::Ne,
                value: Value::Null,
            } => sql.push_str(&format!("{column} IS NOT NULL")),
            Predicate::Compare { column, op, value } => {
                sql.push_str(&format!("{column} {} ", op.sql()));
                bind(sql, params, value);
            }
            Predicate::Columns(a, b) => sql.push_str(&format!("{a} = {b}")),
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                if *case_insensitive {
                    sql.push_str(&format!("lower({column}) LIKE lower("));
                    bind(sql, params, &Value::Text(pattern.clone()));
                    sql.push(')');
                } else {
                    sql.push_str(&format!("{column} LIKE "));
                    bind(sql, params, &Value::Text(pattern.clone()));
                }
            }
            Predicate::IsNull(column) => sql.push_str(&format!("{column} IS NULL")),
            Predicate::In { values, .. } if values.is_empty() => sql.push('0'),
            Predicate::In { column, values } => {
                if let Some(list) = crate::value::json_array(values) {
                    sql.push_str(&format!("{column} IN (SELECT value FROM json_each("));
                    bind(sql, params, &Value::Text(list));
                    sql.push_str("))");
                    return;
                }
                sql.push_str(&format!("{column} IN ("));
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    bind(sql, params, value);
                }
                sql.push(')');
            }
            Predicate::And(list) | Predicate::Or(list) if list.is_empty() => {
                sql.push(if matches!(self, Predicate::And(_)) { '1' } else { '0' });
            }
            Predicate::And(list) | Predicate::Or(list) => {
                let joiner = if matches!(self, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                sql.push('(');
                for (i, p) in list.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    p.render(sql, params);
                }
                sql.push(')');
            }
            Predicate::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(sql, params);
                sql.push(')');
            }
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => format!("'{s}'"),
        Value::Bool(b) => b.to_string(),
        Value::Timestamp(ts) => format!("'{}'", crate::value::format_timestamp(ts)),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, list: &[Predicate], sep: &str| {
            write!(f, "(")?;
            for (i, p) in list.iter().enumerate() {
                if i > 0 {
                    write!(f, "{sep}")?;
                }
                write!(f, "{p}")?;
            }
            write!(f, ")")
        };
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "{column} {} {}", op.sql(), literal(value))
            }
            Predicate::Columns(a, b) => write!(f, "{a} = {b}"),
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{column} {op} '{pattern}'")
            }
            Predicate::IsNull(column) => write!(f, "{column} IS NULL"),
            Predicate::In { column, values } => {
                let values: Vec<String> = values.iter().map(literal).collect();
                write!(f, "{column} IN ({})", values.join(", "))
            }
            Predicate::And(list) => join(f, list, " AND "),
            Predicate::Or(list) => join(f, list, " OR "),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

/// An eager-loading option for queries rooted at `E`.
pub struct Eager<E: Entity>(Box<dyn Navigation<E>>);

impl<E: Entity> fmt::Debug for Eager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eager({})", self.0.info().qualified_name())
    }
}

/// Load `navigation` for every result in one extra query.
pub fn eager<E: Entity, N: Navigation<E>>(navigation: N) -> Eager<E> {
    Eager(Box::new(navigation))
}

#[derive(Debug, Default)]
struct Select {
    entities: Vec<Mapping>,
    scope: Vec<&'static str>,
    joins: Vec<(&'static str, Predicate)>,
    filters: Vec<Predicate>,
    order_by: Vec<(Col, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    error: Option<Error>,
}

impl Select {
    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn select<E: Entity>(&mut self, session: &Session<'_>) {
        match session.engine().mapper().mapping::<E>() {
            Ok(mapping) => {
                if self.entities.is_empty() {
                    self.scope.push(E::TABLE);
                }
                self.entities.push(mapping.clone());
            }
            Err(e) => self.fail(e),
        }
    }

    fn in_scope(&self, table: &str) -> bool {
        self.scope.contains(&table)
    }

    fn join_relationship(&mut self, session: &Session<'_>, info: RelationshipInfo) {
        if !session.engine().relations().is_declared(&info) {
            return self.fail(Error::invalid_query(format!(
                "cannot join {}: relationship is not declared",
                info.qualified_name()
            )));
        }
        let table = match (
            self.in_scope(info.owner_table),
            self.in_scope(info.target_table),
        ) {
            (true, false) => info.target_table,
            (false, true) => info.owner_table,
            (true, true) => {
                return self.fail(Error::invalid_query(format!(
                    "{} and {} are both already part of the query",
                    info.owner_table, info.target_table
                )))
            }
            (false, false) => {
                return self.fail(Error::invalid_query(format!(
                    "cannot join {}: neither {} nor {} is part of the query",
                    info.qualified_name(),
                    info.owner_table,
                    info.target_table
                )))
            }
        };
        let (fk, key) = info.join_condition();
        self.joins.push((table, fk.eq_col(key)));
        self.scope.push(table);
    }

    fn join_on(&mut self, session: &Session<'_>, table: &'static str, on: Predicate) {
        if session.engine().registry().table(table).is_none() {
            return self.fail(Error::invalid_query(format!("table '{table}' is not registered")));
        }
        if self.in_scope(table) {
            return self.fail(Error::invalid_query(format!(
                "table '{table}' is already part of the query"
            )));
        }
        self.scope.push(table);
        self.joins.push((table, on));
    }

    fn filter_by<E: Entity>(&mut self, column: &'static str, value: Value) {
        if E::COLUMNS.contains(&column) {
            self.filters.push(Col::new(E::TABLE, column).eq(value));
        } else {
            self.fail(Error::invalid_query(format!(
                "{} has no mapped column '{column}'",
                E::NAME
            )));
        }
    }

    /// Surface the first builder error, then check every referenced column.
    fn check(&mut self) -> Result<()> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let mut columns = Vec::new();
        for (_, on) in &self.joins {
            on.columns(&mut columns);
        }
        for filter in &self.filters {
            filter.columns(&mut columns);
        }
        columns.extend(self.order_by.iter().map(|(c, _)| *c));
        for mapping in &self.entities {
            if !self.in_scope(&mapping.table.name) {
                return Err(Error::invalid_query(format!(
                    "{} is selected but table '{}' is not joined",
                    mapping.entity, mapping.table.name
                )));
            }
        }
        for col in columns {
            if !self.in_scope(col.table) {
                return Err(Error::invalid_query(format!(
                    "column {col} is not part of the query; join '{}' first",
                    col.table
                )));
            }
        }
        Ok(())
    }

    fn render(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        let lists: Vec<String> = self.entities.iter().map(Mapping::select_list).collect();
        sql.push_str(&lists.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(self.scope.first().copied().unwrap_or_default());

        for (table, on) in &self.joins {
            sql.push_str(&format!(" JOIN {table} ON "));
            on.render(&mut sql, &mut params);
        }

        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            for (i, filter) in self.filters.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                filter.render(&mut sql, &mut params);
            }
        }

        let order: Vec<String> = if self.order_by.is_empty() {
            self.entities
                .iter()
                .map(|m| format!("{}.{} ASC", m.table.name, m.key_column()))
                .collect()
        } else {
            self.order_by
                .iter()
                .map(|(col, desc)| format!("{col} {}", if *desc { "DESC" } else { "ASC" }))
                .collect()
        };
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        (sql, params)
    }

    fn describe(&self) -> String {
        if self.filters.is_empty() {
            "no filter".to_string()
        } else {
            self.filters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" AND ")
        }
    }
}

/// A query returning entities of type `E`.
pub struct Query<'s, E: Entity> {
    session: &'s Session<'s>,
    select: Select,
    eager: Vec<Eager<E>>,
    _entity: PhantomData<E>,
}

impl<'s, E: Entity> Query<'s, E> {
    pub(crate) fn new(session: &'s Session<'s>) -> Self {
        let mut select = Select::default();
        select.select::<E>(session);
        Self {
            session,
            select,
            eager: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.select.filters.push(predicate);
        self
    }

    /// Equality on one of `E`'s mapped columns.
    pub fn filter_by(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.select.filter_by::<E>(column, value.into());
        self
    }

    /// Join along a declared relationship, in either direction.
    pub fn join<S: Entity>(mut self, navigation: impl Navigation<S>) -> Self {
        self.select.join_relationship(self.session, navigation.info());
        self
    }

    pub fn join_on(mut self, table: &'static str, on: Predicate) -> Self {
        self.select.join_on(self.session, table, on);
        self
    }

    pub fn options(mut self, eager: Eager<E>) -> Self {
        self.eager.push(eager);
        self
    }

    pub fn order_by(mut self, column: Col) -> Self {
        self.select.order_by.push((column, false));
        self
    }

    pub fn order_by_desc(mut self, column: Col) -> Self {
        self.select.order_by.push((column, true));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.select.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.select.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.select.distinct = true;
        self
    }

    /// The SQL this query would run.
    pub fn sql(&self) -> Result<String> {
        if let Some(error) = &self.select.error {
            return Err(Error::invalid_query(error.to_string()));
        }
        Ok(self.select.render().0)
    }

    pub fn all(mut self) -> Result<Vec<E>> {
        self.select.check()?;
        let (sql, params) = self.select.render();
        let layout: Vec<&Mapping> = self.select.entities.iter().collect();
        let rows = self.session.fetch(&sql, &params, &layout)?;
        let mut entities = rows
            .iter()
            .map(|parts| E::from_row(&parts[0]))
            .collect::<Result<Vec<_>>>()?;
        for eager in &self.eager {
            eager.0.load(self.session, &mut entities)?;
        }
        Ok(entities)
    }

    /// Exactly one result.
    pub fn one(self) -> Result<E> {
        let criteria = self.select.describe();
        self.one_or_none()?
            .ok_or_else(|| Error::not_found(E::NAME, criteria))
    }

    /// At most one result.
    pub fn one_or_none(mut self) -> Result<Option<E>> {
        self.select.limit = Some(2);
        let mut found = self.all()?;
        if found.len() > 1 {
            return Err(Error::multiple_results(E::NAME));
        }
        Ok(found.pop())
    }

    pub fn first(mut self) -> Result<Option<E>> {
        self.select.limit = Some(1);
        Ok(self.all()?.into_iter().next())
    }

    pub fn count(mut self) -> Result<i64> {
        self.select.check()?;
        let (sql, params) = self.select.render();
        self.session
            .fetch_scalar(&format!("SELECT COUNT(*) FROM ({sql})"), &params)
    }
}

/// A query returning `(A, B)` pairs, with `B` reached through a join.
pub struct PairQuery<'s, A: Entity, B: Entity> {
    session: &'s Session<'s>,
    select: Select,
    eager_left: Vec<Eager<A>>,
    eager_right: Vec<Eager<B>>,
}

impl<'s, A: Entity, B: Entity> PairQuery<'s, A, B> {
    pub(crate) fn new(session: &'s Session<'s>) -> Self {
        let mut select = Select::default();
        select.select::<A>(session);
        select.select::<B>(session);
        Self {
            session,
            select,
            eager_left: Vec::new(),
            eager_right: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.select.filters.push(predicate);
        self
    }

    pub fn join<S: Entity>(mut self, navigation: impl Navigation<S>) -> Self {
        self.select.join_relationship(self.session, navigation.info());
        self
    }

    pub fn join_on(mut self, table: &'static str, on: Predicate) -> Self {
        self.select.join_on(self.session, table, on);
        self
    }

    /// Eager-load a traversal on the left-hand entities.
    pub fn options(mut self, eager: Eager<A>) -> Self {
        self.eager_left.push(eager);
        self
    }

    /// Eager-load a traversal on the right-hand entities.
    pub fn options_right(mut self, eager: Eager<B>) -> Self {
        self.eager_right.push(eager);
        self
    }

    pub fn order_by(mut self, column: Col) -> Self {
        self.select.order_by.push((column, false));
        self
    }

    pub fn order_by_desc(mut self, column: Col) -> Self {
        self.select.order_by.push((column, true));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.select.limit = Some(limit);
        self
    }

    pub fn all(mut self) -> Result<Vec<(A, B)>> {
        self.select.check()?;
        let (sql, params) = self.select.render();
        let layout: Vec<&Mapping> = self.select.entities.iter().collect();
        let rows = self.session.fetch(&sql, &params, &layout)?;

        let mut left = Vec::with_capacity(rows.len());
        let mut right = Vec::with_capacity(rows.len());
        for parts in &rows {
            left.push(A::from_row(&parts[0])?);
            right.push(B::from_row(&parts[1])?);
        }
        for eager in &self.eager_left {
            eager.0.load(self.session, &mut left)?;
        }
        for eager in &self.eager_right {
            eager.0.load(self.session, &mut right)?;
        }
        Ok(left.into_iter().zip(right).collect())
    }
}
