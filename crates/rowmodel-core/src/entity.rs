//! The entity contract consumed by rows.
//!
//! An entity owns field definitions, defaults, relation metadata and the
//! persistence primitives for one table or collection. Rows hold a shared
//! [`EntityRef`] and never manage the entity's lifetime; the SQL builder,
//! connection handling and schema loading live behind implementations of
//! this trait.

use crate::Result;
use crate::row::{Row, Slot};
use crate::scope::Scope;
use crate::store::Record;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an entity. Many rows share one entity.
pub type EntityRef = Arc<dyn Entity>;

/// Computed field behavior registered on an entity.
///
/// A getter runs when a row is asked for a name it does not hold; its
/// result is cached on the row.
pub type Getter = Arc<dyn Fn(&Row) -> Result<Slot> + Send + Sync>;

/// How two entities are related.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This entity holds a foreign key pointing at one record of the other.
    HasOne,
    /// The other entity holds a foreign key pointing back at this one.
    HasMany,
    /// The entities are linked through a bridge entity.
    ManyToMany,
}

impl RelationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HasOne => "has-one",
            Self::HasMany => "has-many",
            Self::ManyToMany => "many-to-many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The records an entity returns for a relation query.
///
/// Whether a relation yields one record, many or nothing is decided by the
/// related entity, not by the row asking.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    None,
    One(Record),
    Many(Vec<Record>),
}

/// Schema and persistence primitives for one entity.
pub trait Entity: Send + Sync + fmt::Debug {
    /// Entity name, used for registry lookup, cycle guards and diagnostics.
    fn name(&self) -> &str;

    /// Declared field names, in declaration order.
    fn fields(&self) -> &[String];

    /// Whether `name` is a declared field.
    fn has_field(&self, name: &str) -> bool {
        self.fields().iter().any(|f| f == name)
    }

    /// Default value of every declared field.
    fn defaults(&self) -> Record;

    /// Name of the identity field.
    fn primary_key(&self) -> &str {
        "id"
    }

    /// Name of the field other entities use to point at this one.
    fn foreign_key(&self) -> String {
        format!("{}_id", self.name())
    }

    /// Classify the relation from this entity to `other`.
    fn relation(&self, other: &dyn Entity) -> Option<RelationKind>;

    /// Whether an entity named `name` is related to this one.
    fn is_related(&self, name: &str) -> bool {
        self.resolve(name)
            .is_some_and(|other| self.relation(other.as_ref()).is_some())
    }

    /// Resolve an entity by name through the owning registry.
    fn resolve(&self, name: &str) -> Option<EntityRef>;

    /// A computed-field getter registered under `name`, if any.
    fn getter(&self, _name: &str) -> Option<Getter> {
        None
    }

    /// Insert a record and return its canonical persisted fields.
    fn insert(&self, payload: &Record, handle_duplications: bool) -> Result<Record>;

    /// Update records within `scope`, writing only `changed` fields when
    /// given, and return the canonical persisted fields.
    fn update(&self, payload: &Record, scope: &Scope, changed: Option<&[String]>)
    -> Result<Record>;

    /// Delete records within `scope`, returning how many were removed.
    fn delete(&self, scope: &Scope) -> Result<u64>;

    /// Select the first record within `scope`.
    fn select_one(&self, scope: &Scope) -> Result<Option<Record>>;

    /// Select the records of this entity related to `row`, narrowed by
    /// the caller-supplied `scope`.
    fn select_by(&self, row: &Row, scope: &Scope) -> Result<Selection>;
}

/// Name-to-entity lookup shared by all entities of one database.
pub trait Registry: Send + Sync {
    /// Look up an entity by name.
    fn entity(&self, name: &str) -> Option<EntityRef>;

    /// Names of every registered entity.
    fn entity_names(&self) -> Vec<String>;
}
