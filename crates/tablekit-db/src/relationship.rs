//! Relationships between mapped entities.
//!
//! A [`Relationship`] links an owner to the entities whose foreign key points
//! at it. Navigation is explicit: the owner holds a [`Related`] slot that stays
//! unresolved until a session resolves it, either on request or as part of an
//! eager query option.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tablekit_common::{Error, Result};

use crate::mapper::{Entity, Mapper};
use crate::query::Col;
use crate::session::Session;

/// How many targets an owner can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToMany,
    OneToOne,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::OneToMany => write!(f, "one-to-many"),
            Cardinality::OneToOne => write!(f, "one-to-one"),
        }
    }
}

/// A navigable reference that is either not loaded yet or loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum Related<T> {
    Unresolved,
    Resolved(Box<T>),
}

impl<T> Default for Related<T> {
    fn default() -> Self {
        Related::Unresolved
    }
}

impl<T> Related<T> {
    pub fn resolved(value: T) -> Self {
        Related::Resolved(Box::new(value))
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Related::Resolved(_))
    }

    pub fn is_unresolved(&self) -> bool {
        !self.is_resolved()
    }

    /// The loaded value, if any.
    pub fn get(&self) -> Option<&T> {
        match self {
            Related::Resolved(value) => Some(value),
            Related::Unresolved => None,
        }
    }

    pub fn set(&mut self, value: T) {
        *self = Related::resolved(value);
    }

    /// Forget the loaded value.
    pub fn reset(&mut self) {
        *self = Related::Unresolved;
    }

    pub fn into_inner(self) -> Option<T> {
        match self {
            Related::Resolved(value) => Some(*value),
            Related::Unresolved => None,
        }
    }
}

impl<T: Serialize> Serialize for Related<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Related::Resolved(value) => value.serialize(serializer),
            Related::Unresolved => serializer.serialize_none(),
        }
    }
}

/// Type-erased description of a declared relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    pub owner: &'static str,
    pub owner_table: &'static str,
    pub owner_key: &'static str,
    pub owner_type: TypeId,
    pub target: &'static str,
    pub target_table: &'static str,
    pub target_type: TypeId,
    pub name: &'static str,
    pub back_reference: &'static str,
    pub foreign_key: &'static str,
    pub cardinality: Cardinality,
}

impl RelationshipInfo {
    /// `Owner.name`, e.g. `User.posts`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// Join condition `target.fk = owner.key`.
    pub fn join_condition(&self) -> (Col, Col) {
        (
            Col::new(self.target_table, self.foreign_key),
            Col::new(self.owner_table, self.owner_key),
        )
    }
}

impl fmt::Display for RelationshipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} ({} {} via {}.{}, back reference {}.{})",
            self.owner,
            self.name,
            self.cardinality,
            self.target,
            self.target_table,
            self.foreign_key,
            self.target,
            self.back_reference
        )
    }
}

enum Slot<O, T> {
    Many(fn(&mut O) -> &mut Related<Vec<T>>),
    One(fn(&mut O) -> &mut Related<Option<T>>),
}

impl<O, T> Clone for Slot<O, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, T> Copy for Slot<O, T> {}

/// A foreign-key link from owner `O` to target `T`.
///
/// The accessors are plain function pointers so relationships can live in
/// `const` items next to the entity they belong to.
pub struct Relationship<O, T> {
    name: &'static str,
    back_reference: &'static str,
    foreign_key: &'static str,
    slot: Slot<O, T>,
    parent: fn(&mut T) -> &mut Related<O>,
    child_key: fn(&T) -> Option<i64>,
    set_child_key: fn(&mut T, i64),
}

impl<O, T> Clone for Relationship<O, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, T> Copy for Relationship<O, T> {}

impl<O, T> fmt::Debug for Relationship<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("back_reference", &self.back_reference)
            .field("foreign_key", &self.foreign_key)
            .field("cardinality", &self.cardinality())
            .finish()
    }
}

impl<O, T> Relationship<O, T> {
    /// An owner with any number of targets.
    pub const fn one_to_many(
        name: &'static str,
        back_reference: &'static str,
        foreign_key: &'static str,
        children: fn(&mut O) -> &mut Related<Vec<T>>,
        parent: fn(&mut T) -> &mut Related<O>,
        child_key: fn(&T) -> Option<i64>,
        set_child_key: fn(&mut T, i64),
    ) -> Self {
        Self {
            name,
            back_reference,
            foreign_key,
            slot: Slot::Many(children),
            parent,
            child_key,
            set_child_key,
        }
    }

    /// An owner with at most one target. The foreign key column must be unique.
    pub const fn one_to_one(
        name: &'static str,
        back_reference: &'static str,
        foreign_key: &'static str,
        child: fn(&mut O) -> &mut Related<Option<T>>,
        parent: fn(&mut T) -> &mut Related<O>,
        child_key: fn(&T) -> Option<i64>,
        set_child_key: fn(&mut T, i64),
    ) -> Self {
        Self {
            name,
            back_reference,
            foreign_key,
            slot: Slot::One(child),
            parent,
            child_key,
            set_child_key,
        }
    }

    /// Navigation from the target back to its owner.
    pub const fn backref(self) -> Backref<O, T> {
        Backref(self)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn foreign_key(&self) -> &'static str {
        self.foreign_key
    }

    pub fn cardinality(&self) -> Cardinality {
        match self.slot {
            Slot::Many(_) => Cardinality::OneToMany,
            Slot::One(_) => Cardinality::OneToOne,
        }
    }

    pub(crate) fn child_key(&self, child: &T) -> Option<i64> {
        (self.child_key)(child)
    }

    pub(crate) fn link(&self, owner: &O, owner_key: i64, child: &mut T)
    where
        O: Clone,
    {
        (self.set_child_key)(child, owner_key);
        (self.parent)(child).set(owner.clone());
    }
}

impl<O: Entity, T: Entity> Relationship<O, T> {
    pub fn info(&self) -> RelationshipInfo {
        RelationshipInfo {
            owner: O::NAME,
            owner_table: O::TABLE,
            owner_key: O::key_column(),
            owner_type: TypeId::of::<O>(),
            target: T::NAME,
            target_table: T::TABLE,
            target_type: TypeId::of::<T>(),
            name: self.name,
            back_reference: self.back_reference,
            foreign_key: self.foreign_key,
            cardinality: self.cardinality(),
        }
    }
}

/// The reverse direction of a [`Relationship`]: target to owner.
pub struct Backref<O, T>(Relationship<O, T>);

impl<O, T> Clone for Backref<O, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, T> Copy for Backref<O, T> {}

impl<O, T> fmt::Debug for Backref<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backref").field(&self.0.back_reference).finish()
    }
}

/// A traversal that can populate the related slots of a batch of sources.
pub trait Navigation<S: Entity>: 'static {
    /// The declared relationship this traversal follows.
    fn info(&self) -> RelationshipInfo;

    /// Resolve the traversal for every source in one query.
    fn load(&self, session: &Session<'_>, sources: &mut [S]) -> Result<()>;
}

fn distinct_keys(keys: impl Iterator<Item = i64>) -> Vec<i64> {
    let mut keys: Vec<i64> = keys.collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

impl<O: Entity, T: Entity> Navigation<O> for Relationship<O, T> {
    fn info(&self) -> RelationshipInfo {
        Relationship::info(self)
    }

    fn load(&self, session: &Session<'_>, owners: &mut [O]) -> Result<()> {
        let info = Relationship::info(self);
        session.engine().relations().ensure_declared(&info)?;

        let keys = distinct_keys(owners.iter().filter_map(Entity::key));
        let mut grouped: HashMap<i64, Vec<T>> = HashMap::new();
        if !keys.is_empty() {
            let children = session
                .query::<T>()
                .filter(Col::new(T::TABLE, self.foreign_key).in_list(keys))
                .all()?;
            for child in children {
                if let Some(fk) = self.child_key(&child) {
                    grouped.entry(fk).or_default().push(child);
                }
            }
        }

        tracing::debug!(
            "Resolved {} for {} {}",
            info.qualified_name(),
            owners.len(),
            O::NAME
        );
        for owner in owners.iter_mut() {
            let children = owner
                .key()
                .and_then(|key| grouped.get(&key))
                .cloned()
                .unwrap_or_default();
            match self.slot {
                Slot::Many(slot) => slot(owner).set(children),
                Slot::One(slot) => slot(owner).set(children.into_iter().next()),
            }
        }
        Ok(())
    }
}

impl<O: Entity, T: Entity> Navigation<T> for Backref<O, T> {
    fn info(&self) -> RelationshipInfo {
        self.0.info()
    }

    fn load(&self, session: &Session<'_>, children: &mut [T]) -> Result<()> {
        let relationship = &self.0;
        let info = relationship.info();
        session.engine().relations().ensure_declared(&info)?;

        let keys = distinct_keys(children.iter().filter_map(|c| relationship.child_key(c)));
        let mut parents: HashMap<i64, O> = HashMap::new();
        if !keys.is_empty() {
            let found = session
                .query::<O>()
                .filter(Col::new(O::TABLE, O::key_column()).in_list(keys))
                .all()?;
            parents.extend(found.into_iter().filter_map(|p| p.key().map(|k| (k, p))));
        }

        for child in children.iter_mut() {
            let Some(fk) = relationship.child_key(child) else {
                continue;
            };
            let parent = parents
                .get(&fk)
                .ok_or_else(|| Error::not_found(O::NAME, format!("{} = {fk}", O::key_column())))?;
            (relationship.parent)(child).set(parent.clone());
        }
        Ok(())
    }
}

/// Registry of declared relationships.
#[derive(Debug, Default)]
pub struct RelationshipResolver {
    declared: Vec<RelationshipInfo>,
}

impl RelationshipResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `relationship` between two bound entities.
    ///
    /// The foreign key column must be mapped by `T` and reference the primary
    /// key of `O`'s table. A one-to-one relationship additionally needs that
    /// column to be unique.
    pub fn declare<O: Entity, T: Entity>(
        &mut self,
        mapper: &Mapper,
        relationship: &Relationship<O, T>,
    ) -> Result<&RelationshipInfo> {
        let owner = mapper.mapping::<O>()?;
        let target = mapper.mapping::<T>()?;
        let info = relationship.info();
        let qualified = info.qualified_name();

        let column = target.table.column(info.foreign_key).ok_or_else(|| {
            Error::mapping_conflict(
                T::NAME,
                format!(
                    "table '{}' has no column '{}' for {qualified}",
                    target.table.name, info.foreign_key
                ),
            )
        })?;
        if !T::COLUMNS.contains(&info.foreign_key) {
            return Err(Error::mapping_conflict(
                T::NAME,
                format!("does not map foreign key '{}' used by {qualified}", info.foreign_key),
            ));
        }
        match &column.foreign_key {
            Some(fk) if fk.table == owner.table.name && fk.column == owner.key_column() => {}
            _ => {
                return Err(Error::mapping_conflict(
                    T::NAME,
                    format!(
                        "column '{}.{}' does not reference {}.{}",
                        target.table.name,
                        info.foreign_key,
                        owner.table.name,
                        owner.key_column()
                    ),
                ))
            }
        }
        if info.cardinality == Cardinality::OneToOne && !column.unique {
            return Err(Error::cardinality(
                qualified,
                format!(
                    "one-to-one needs a unique foreign key, but {}.{} is not unique",
                    target.table.name, info.foreign_key
                ),
            ));
        }

        if self
            .declared
            .iter()
            .any(|d| d.owner_type == info.owner_type && d.name == info.name)
        {
            return Err(Error::mapping_conflict(
                O::NAME,
                format!("relationship '{}' is declared twice", info.name),
            ));
        }
        if self
            .declared
            .iter()
            .any(|d| d.target_type == info.target_type && d.back_reference == info.back_reference)
        {
            return Err(Error::mapping_conflict(
                T::NAME,
                format!("back reference '{}' is declared twice", info.back_reference),
            ));
        }

        tracing::debug!("Declared relationship {info}");
        self.declared.push(info);
        let index = self.declared.len() - 1;
        Ok(&self.declared[index])
    }

    pub fn is_declared(&self, info: &RelationshipInfo) -> bool {
        self.declared.contains(info)
    }

    pub(crate) fn ensure_declared(&self, info: &RelationshipInfo) -> Result<()> {
        if self.is_declared(info) {
            Ok(())
        } else {
            Err(Error::mapping_conflict(
                info.owner,
                format!("relationship '{}' is not declared", info.name),
            ))
        }
    }

    pub fn declared(&self) -> &[RelationshipInfo] {
        &self.declared
    }
}
