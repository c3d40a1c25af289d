//! Entity-bound rows with change tracking and lazy relations.
//!
//! A [`Row`] is the in-memory form of one record. It starts from the
//! entity's defaults, records every explicit assignment in a
//! [`ChangeLog`], resolves unknown names lazily through getters and
//! relations, and hands persistence to its entity.

use crate::Result;
use crate::changes::ChangeLog;
use crate::config::SaveOptions;
use crate::entity::{EntityRef, RelationKind, Selection};
use crate::error::{Error, RowError, RowErrorKind, TypeError};
use crate::scope::Scope;
use crate::store::{FieldMap, Record};
use crate::value::{FromValue, Value};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// What a row holds under one name.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A scalar field value
    Value(Value),
    /// A resolved to-one relation
    Row(Box<Row>),
    /// A resolved to-many relation
    Rows(Vec<Row>),
}

impl Slot {
    /// The scalar value, if this slot holds one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The related row, if this slot holds one.
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Slot::Row(row) => Some(row),
            _ => None,
        }
    }

    /// The related rows, if this slot holds a collection.
    pub fn as_rows(&self) -> Option<&[Row]> {
        match self {
            Slot::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Whether this slot is a scalar NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Slot::Value(Value::Null))
    }

    fn flatten(&self, keys_as_id: bool, path: &mut Vec<String>) -> Option<serde_json::Value> {
        match self {
            Slot::Value(v) => Some(v.to_json()),
            Slot::Row(row) => row.flatten_path(keys_as_id, path),
            Slot::Rows(rows) => {
                if rows
                    .first()
                    .is_some_and(|first| path.iter().any(|n| n == first.entity_name()))
                {
                    return None;
                }
                if keys_as_id {
                    // Rows without identity are keyed by their position.
                    let mut map = serde_json::Map::with_capacity(rows.len());
                    for (index, row) in rows.iter().enumerate() {
                        let key = row.id().map_or_else(|| index.to_string(), Value::to_key);
                        let flat = row
                            .flatten_path(keys_as_id, path)
                            .unwrap_or(serde_json::Value::Null);
                        map.insert(key, flat);
                    }
                    Some(serde_json::Value::Object(map))
                } else {
                    Some(serde_json::Value::Array(
                        rows.iter()
                            .map(|row| {
                                row.flatten_path(keys_as_id, path)
                                    .unwrap_or(serde_json::Value::Null)
                            })
                            .collect(),
                    ))
                }
            }
        }
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot::Value(v)
    }
}

impl From<Row> for Slot {
    fn from(row: Row) -> Self {
        Slot::Row(Box::new(row))
    }
}

impl From<Vec<Row>> for Slot {
    fn from(rows: Vec<Row>) -> Self {
        Slot::Rows(rows)
    }
}

/// How a read of an unknown name would be satisfied.
///
/// Checked in this order: a value already held, a getter registered on the
/// entity, a related entity of that name. Anything else is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Present,
    Getter,
    Relation,
    Absent,
}

/// One record of an entity, held in memory.
#[derive(Debug, Clone)]
pub struct Row {
    entity: EntityRef,
    values: FieldMap<Slot>,
    changes: ChangeLog,
}

impl Row {
    /// Create a row from the entity's defaults overridden by `seed`.
    ///
    /// Seed values count as loaded state, not as changes.
    pub fn new(entity: EntityRef, seed: Option<Record>) -> Self {
        let mut values: FieldMap<Slot> = entity
            .defaults()
            .into_iter()
            .map(|(name, value)| (name, Slot::Value(value)))
            .collect();
        if let Some(seed) = seed {
            for (name, value) in seed {
                values.insert(name, Slot::Value(value));
            }
        }
        Self {
            entity,
            values,
            changes: ChangeLog::new(),
        }
    }

    /// The owning entity.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        self.entity.name()
    }

    /// The persisted identity, if the row has a non-empty one.
    pub fn id(&self) -> Option<&Value> {
        self.value(self.entity.primary_key())
            .filter(|v| !v.is_empty_identity())
    }

    /// Get whatever is held under `name`, without resolving anything.
    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.values.get(name)
    }

    /// Get a scalar value by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(Slot::as_value)
    }

    /// Get a typed scalar value by name.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.value(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("no scalar value named '{}'", name),
                field: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.field = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Whether anything is held under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains(name)
    }

    /// Everything the row holds, including cached relations.
    pub fn values(&self) -> &FieldMap<Slot> {
        &self.values
    }

    /// A copy of everything the row holds, or only of the dirty names.
    pub fn to_values(&self, only_changed: bool) -> FieldMap<Slot> {
        let mut out = FieldMap::with_capacity(self.values.len());
        for (name, slot) in self.values.iter() {
            if !only_changed || self.changes.contains(name) {
                out.insert(name, slot.clone());
            }
        }
        out
    }

    /// The scalar values of declared entity fields, optionally only dirty ones.
    ///
    /// Names that are not declared fields (cached relations, ad-hoc values)
    /// are left out.
    pub fn field_values(&self, only_changed: bool) -> Record {
        let mut out = Record::with_capacity(self.values.len());
        for (name, slot) in self.values.iter() {
            if only_changed && !self.changes.contains(name) {
                continue;
            }
            if !self.entity.has_field(name) {
                continue;
            }
            match slot {
                Slot::Value(v) => {
                    out.insert(name, v.clone());
                }
                _ => tracing::warn!(
                    entity = self.entity.name(),
                    field = name,
                    "Declared field holds a related row; leaving it out of the payload"
                ),
            }
        }
        out
    }

    /// Assign many values at once, marking each assigned name dirty.
    ///
    /// With `only_declared_fields`, names the entity does not declare are
    /// silently dropped first.
    pub fn set<I, K, V>(&mut self, data: I, only_declared_fields: bool)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in data {
            let name = name.into();
            if only_declared_fields && !self.entity.has_field(&name) {
                tracing::trace!(
                    entity = self.entity.name(),
                    field = %name,
                    "Dropping undeclared field"
                );
                continue;
            }
            self.changes.mark(&name);
            self.values.insert(name, Slot::Value(value.into()));
        }
    }

    /// Assign one value. The name is marked dirty even if the value is unchanged.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.set_slot(name, Slot::Value(value.into()));
    }

    /// Assign a slot (a value or related rows), marking the name dirty.
    pub fn set_slot(&mut self, name: impl Into<String>, slot: impl Into<Slot>) {
        let name = name.into();
        self.changes.mark(&name);
        self.values.insert(name, slot.into());
    }

    /// Whether anything was assigned since construction, the last save or reload.
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    /// Decide how a read of `name` would be satisfied.
    pub fn access(&self, name: &str) -> Access {
        if self.values.contains(name) {
            Access::Present
        } else if self.entity.getter(name).is_some() {
            Access::Getter
        } else if self.entity.is_related(name) {
            Access::Relation
        } else {
            Access::Absent
        }
    }

    /// Read `name`, computing and caching it through a getter or relation
    /// when the row does not hold it yet.
    ///
    /// Computed values are cached without being marked dirty. An absent
    /// name yields `None` and caches nothing.
    pub fn fetch(&mut self, name: &str) -> Result<Option<&Slot>> {
        match self.access(name) {
            Access::Present => {}
            Access::Getter => {
                let Some(getter) = self.entity.getter(name) else {
                    return Ok(None);
                };
                let slot = getter(&*self)?;
                self.values.insert(name, slot);
            }
            Access::Relation => {
                let slot = self.relation(name, &Scope::new())?;
                self.values.insert(name, slot);
            }
            Access::Absent => return Ok(None),
        }
        Ok(self.values.get(name))
    }

    /// Fetch the rows of the entity named `name` related to this row.
    ///
    /// The related entity decides whether the result is one row, many rows
    /// or NULL. The result is returned as-is and not cached.
    #[tracing::instrument(level = "debug", skip(self, scope), fields(entity = %self.entity.name()))]
    pub fn relation(&self, name: &str, scope: &Scope) -> Result<Slot> {
        let Some(related) = self.entity.resolve(name) else {
            return Err(RowError::new(
                RowErrorKind::UnknownRelation,
                self.entity.name(),
                format!("no related entity named '{}'", name),
            )
            .with_target(name)
            .into());
        };

        let slot = match related.select_by(self, scope)? {
            Selection::None => Slot::Value(Value::Null),
            Selection::One(record) => Slot::Row(Box::new(Row::new(
                Arc::clone(&related),
                Some(record),
            ))),
            Selection::Many(records) => Slot::Rows(
                records
                    .into_iter()
                    .map(|record| Row::new(Arc::clone(&related), Some(record)))
                    .collect(),
            ),
        };
        tracing::debug!(
            related = related.name(),
            rows = match &slot {
                Slot::Value(_) => 0,
                Slot::Row(_) => 1,
                Slot::Rows(rows) => rows.len(),
            },
            "Resolved relation"
        );
        Ok(slot)
    }

    /// Dynamic method-style access.
    ///
    /// `getTitle` with no scope returns the `title` value when the row holds
    /// one. Otherwise the name (the lower-cased remainder for `get*` forms)
    /// is tried as a getter and then as a related entity. Nothing is cached.
    pub fn invoke(&mut self, method: &str, scope: Option<&Scope>) -> Result<Slot> {
        let target = match accessor_suffix(method) {
            Some(suffix) => {
                let field = suffix.to_lowercase();
                if scope.is_none() {
                    if let Some(slot) = self.values.get(&field) {
                        return Ok(slot.clone());
                    }
                }
                field
            }
            None => method.to_string(),
        };

        if let Some(getter) = self.entity.getter(&target) {
            return getter(&*self);
        }
        let default_scope = Scope::new();
        self.relation(&target, scope.unwrap_or(&default_scope))
            .map_err(|e| match e {
                Error::Row(mut re) if re.kind == RowErrorKind::UnknownRelation => {
                    re.message = format!(
                        "'{}' is neither a field, a getter nor a related entity",
                        method
                    );
                    Error::Row(re)
                }
                e => e,
            })
    }

    /// Point this row at each of `rows` through a has-one foreign key.
    ///
    /// Every row is checked before anything is assigned, so a failure leaves
    /// this row untouched. A target without identity fails with
    /// `MissingIdentity` whatever the relation kind; a target whose entity is
    /// not has-one related fails with `InvalidRelation`.
    pub fn set_relation(&mut self, rows: &[&Row]) -> Result<()> {
        let mut assignments = Vec::with_capacity(rows.len());
        for other in rows {
            let Some(id) = other.id() else {
                return Err(RowError::new(
                    RowErrorKind::MissingIdentity,
                    self.entity.name(),
                    "the related row has no persisted identity",
                )
                .with_target(other.entity_name())
                .into());
            };

            let kind = self.entity.relation(other.entity.as_ref());
            if kind != Some(RelationKind::HasOne) {
                return Err(RowError::new(
                    RowErrorKind::InvalidRelation,
                    self.entity.name(),
                    match kind {
                        Some(kind) => format!("expected a has-one relation, found {}", kind),
                        None => "the entities are not related".to_string(),
                    },
                )
                .with_target(other.entity_name())
                .into());
            }

            assignments.push((other.entity.foreign_key(), id.clone()));
        }

        for (foreign_key, id) in assignments {
            tracing::trace!(
                entity = self.entity.name(),
                field = %foreign_key,
                "Relating row"
            );
            self.set_value(foreign_key, id);
        }
        Ok(())
    }

    /// Flatten the row into plain nested JSON.
    ///
    /// Related rows are flattened recursively. With `keys_as_id`, related
    /// collections become objects keyed by each row's identity.
    pub fn to_json(&self, keys_as_id: bool) -> serde_json::Value {
        self.flatten(keys_as_id, &[])
            .unwrap_or(serde_json::Value::Null)
    }

    /// Flatten with an explicit list of ancestor entity names.
    ///
    /// Recursion stops at any row whose entity name is already on the path:
    /// that branch becomes `None` here and `null` inside its parent.
    pub fn flatten(&self, keys_as_id: bool, ancestors: &[String]) -> Option<serde_json::Value> {
        let mut path = ancestors.to_vec();
        self.flatten_path(keys_as_id, &mut path)
    }

    fn flatten_path(&self, keys_as_id: bool, path: &mut Vec<String>) -> Option<serde_json::Value> {
        let name = self.entity.name();
        if path.iter().any(|n| n == name) {
            tracing::trace!(entity = name, depth = path.len(), "Cutting entity cycle");
            return None;
        }

        path.push(name.to_string());
        let mut map = serde_json::Map::with_capacity(self.values.len());
        for (field, slot) in self.values.iter() {
            let flat = slot
                .flatten(keys_as_id, path)
                .unwrap_or(serde_json::Value::Null);
            map.insert(field.to_string(), flat);
        }
        path.pop();

        Some(serde_json::Value::Object(map))
    }

    /// Persist the row through its entity.
    ///
    /// Rows without identity are inserted with every declared field. Rows
    /// with identity are updated by identity, one record at most, writing
    /// only dirty declared fields unless `only_changed_values` is off. The
    /// canonical values returned by the entity are assigned back and the
    /// change log is cleared.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.entity.name()))]
    pub fn save(&mut self, options: SaveOptions) -> Result<()> {
        let payload = self.field_values(false);

        let canonical = match self.id().cloned() {
            None => {
                tracing::debug!(
                    fields = payload.len(),
                    handle_duplications = options.handle_duplications,
                    "Inserting row"
                );
                self.entity.insert(&payload, options.handle_duplications)?
            }
            Some(id) => {
                let scope = Scope::by_identity(self.entity.primary_key(), id);
                let changed: Option<Vec<String>> = if options.only_changed_values {
                    Some(
                        self.changes
                            .names()
                            .iter()
                            .filter(|name| self.entity.has_field(name))
                            .cloned()
                            .collect(),
                    )
                } else {
                    None
                };
                tracing::debug!(
                    changed_count = changed.as_ref().map_or(payload.len(), Vec::len),
                    "Updating row"
                );
                self.entity.update(&payload, &scope, changed.as_deref())?
            }
        };

        self.set(canonical, false);
        self.changes.clear();
        Ok(())
    }

    /// Delete the persisted record. Rows without identity are left alone.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.entity.name()))]
    pub fn delete(&self) -> Result<()> {
        let Some(id) = self.id().cloned() else {
            tracing::debug!("Row has no identity; nothing to delete");
            return Ok(());
        };
        let removed = self
            .entity
            .delete(&Scope::by_identity(self.entity.primary_key(), id))?;
        tracing::debug!(removed, "Deleted row");
        Ok(())
    }

    /// Replace every value with the persisted record and clear the change log.
    ///
    /// Cached relations are dropped along with everything else. Fails with
    /// `NotPersisted`, leaving the row untouched, when the row has no
    /// identity or the record is gone.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %self.entity.name()))]
    pub fn reload(&mut self) -> Result<()> {
        let Some(id) = self.id().cloned() else {
            return Err(RowError::new(
                RowErrorKind::NotPersisted,
                self.entity.name(),
                "the row has no identity",
            )
            .into());
        };

        let scope = Scope::by_identity(self.entity.primary_key(), id.clone());
        let Some(record) = self.entity.select_one(&scope)? else {
            return Err(RowError::new(
                RowErrorKind::NotPersisted,
                self.entity.name(),
                format!("no record with identity {}", id.to_key()),
            )
            .into());
        };

        self.values = record
            .into_iter()
            .map(|(name, value)| (name, Slot::Value(value)))
            .collect();
        self.changes.clear();
        Ok(())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.entity.name() == other.entity.name() && self.values == other.values
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity.name(), self.to_json(false))
    }
}

/// The part after `get` in an accessor-style method name.
fn accessor_suffix(method: &str) -> Option<&str> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^get_?([A-Za-z][A-Za-z0-9_]*)$").ok())
        .as_ref()?;
    pattern
        .captures(method)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Getter};
    use crate::error::{StorageError, StorageErrorKind};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        inserts: Vec<(Record, bool)>,
        updates: Vec<(Record, Scope, Option<Vec<String>>)>,
        deletes: Vec<Scope>,
    }

    // Minimal entity: records in a Vec, relations declared by name.
    struct MockEntity {
        name: String,
        fields: Vec<String>,
        defaults: Record,
        relations: HashMap<String, RelationKind>,
        peers: Mutex<Vec<EntityRef>>,
        getters: HashMap<String, Getter>,
        stored: Mutex<Vec<Record>>,
        calls: Mutex<Calls>,
    }

    impl fmt::Debug for MockEntity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("MockEntity")
                .field("name", &self.name)
                .finish_non_exhaustive()
        }
    }

    impl MockEntity {
        fn new(name: &str, defaults: &[(&str, Value)]) -> Self {
            Self {
                name: name.to_string(),
                fields: defaults.iter().map(|(n, _)| (*n).to_string()).collect(),
                defaults: defaults.iter().cloned().collect(),
                relations: HashMap::new(),
                peers: Mutex::new(Vec::new()),
                getters: HashMap::new(),
                stored: Mutex::new(Vec::new()),
                calls: Mutex::new(Calls::default()),
            }
        }

        fn related(mut self, name: &str, kind: RelationKind) -> Self {
            self.relations.insert(name.to_string(), kind);
            self
        }

        fn getter(mut self, name: &str, getter: Getter) -> Self {
            self.getters.insert(name.to_string(), getter);
            self
        }

        fn link(&self, peer: &EntityRef) {
            self.peers.lock().unwrap().push(Arc::clone(peer));
        }

        fn store(&self, record: Record) {
            self.stored.lock().unwrap().push(record);
        }
    }

    impl Entity for MockEntity {
        fn name(&self) -> &str {
            &self.name
        }

        fn fields(&self) -> &[String] {
            &self.fields
        }

        fn defaults(&self) -> Record {
            self.defaults.clone()
        }

        fn relation(&self, other: &dyn Entity) -> Option<RelationKind> {
            self.relations.get(other.name()).copied()
        }

        fn resolve(&self, name: &str) -> Option<EntityRef> {
            self.peers
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.name() == name)
                .cloned()
        }

        fn getter(&self, name: &str) -> Option<Getter> {
            self.getters.get(name).cloned()
        }

        fn insert(&self, payload: &Record, handle_duplications: bool) -> Result<Record> {
            self.calls
                .lock()
                .unwrap()
                .inserts
                .push((payload.clone(), handle_duplications));
            let mut record = payload.clone();
            let next = self.stored.lock().unwrap().len() as i64 + 7;
            record.insert("id", Value::BigInt(next));
            self.store(record.clone());
            Ok(record)
        }

        fn update(
            &self,
            payload: &Record,
            scope: &Scope,
            changed: Option<&[String]>,
        ) -> Result<Record> {
            self.calls.lock().unwrap().updates.push((
                payload.clone(),
                scope.clone(),
                changed.map(<[String]>::to_vec),
            ));
            let stored = self.stored.lock().unwrap();
            stored
                .iter()
                .find(|r| scope.matches(r))
                .cloned()
                .ok_or_else(|| {
                    Error::Storage(StorageError::new(
                        StorageErrorKind::NotFound,
                        &self.name,
                        "no such record",
                    ))
                })
        }

        fn delete(&self, scope: &Scope) -> Result<u64> {
            self.calls.lock().unwrap().deletes.push(scope.clone());
            let mut stored = self.stored.lock().unwrap();
            let before = stored.len();
            stored.retain(|r| !scope.matches(r));
            Ok((before - stored.len()) as u64)
        }

        fn select_one(&self, scope: &Scope) -> Result<Option<Record>> {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .find(|r| scope.matches(r))
                .cloned())
        }

        fn select_by(&self, row: &Row, scope: &Scope) -> Result<Selection> {
            let stored = self.stored.lock().unwrap();
            match row.entity().relation(self) {
                Some(RelationKind::HasOne) => {
                    let fk = row.value(&self.foreign_key()).cloned().unwrap_or(Value::Null);
                    Ok(stored
                        .iter()
                        .find(|r| r.get("id").is_some_and(|id| id.loosely_eq(&fk)))
                        .cloned()
                        .map_or(Selection::None, Selection::One))
                }
                Some(_) => {
                    let fk = row.entity().foreign_key();
                    let id = row.id().cloned().unwrap_or(Value::Null);
                    Ok(Selection::Many(
                        stored
                            .iter()
                            .filter(|r| r.get(&fk).is_some_and(|v| v.loosely_eq(&id)))
                            .filter(|r| scope.matches(r))
                            .cloned()
                            .collect(),
                    ))
                }
                None => Ok(Selection::None),
            }
        }
    }

    fn post_entity() -> MockEntity {
        MockEntity::new(
            "post",
            &[
                ("id", Value::Null),
                ("title", Value::Text(String::new())),
                ("author_id", Value::Null),
            ],
        )
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_new_row_holds_defaults_and_is_clean() {
        let row = Row::new(Arc::new(post_entity()), None);
        assert_eq!(row.values().names(), &["id", "title", "author_id"]);
        assert_eq!(row.value("title"), Some(&Value::Text(String::new())));
        assert!(row.id().is_none());
        assert!(!row.changed());
    }

    #[test]
    fn test_seed_overrides_defaults_without_marking_dirty() {
        let seed = record(&[("id", Value::BigInt(3)), ("title", Value::from("x"))]);
        let row = Row::new(Arc::new(post_entity()), Some(seed));
        assert_eq!(row.id(), Some(&Value::BigInt(3)));
        assert_eq!(row.get_as::<String>("title").unwrap(), "x");
        assert!(!row.changed());
    }

    #[test]
    fn test_assignment_always_marks_dirty() {
        let mut row = Row::new(Arc::new(post_entity()), None);
        row.set_value("title", "");
        assert!(row.changed());
        assert!(row.changes().contains("title"));

        let diff = row.to_values(true);
        assert_eq!(diff.names(), &["title"]);
    }

    #[test]
    fn test_set_only_declared_fields() {
        let mut row = Row::new(Arc::new(post_entity()), None);
        row.set([("title", "a"), ("bogus", "b")], true);
        assert!(!row.contains("bogus"));
        assert_eq!(row.changes().names(), &["title"]);

        row.set([("bogus", "b")], false);
        assert_eq!(row.value("bogus"), Some(&Value::from("b")));
        assert!(row.changes().contains("bogus"));
    }

    #[test]
    fn test_field_values_filters_undeclared_names() {
        let mut row = Row::new(
            Arc::new(MockEntity::new(
                "post",
                &[("id", Value::Null), ("title", Value::Null)],
            )),
            Some(record(&[("id", Value::BigInt(1)), ("title", Value::from("x"))])),
        );
        row.set([("_cache", Value::Json(serde_json::json!({"k": 1})))], false);

        assert_eq!(
            row.field_values(false),
            record(&[("id", Value::BigInt(1)), ("title", Value::from("x"))])
        );
        assert!(row.field_values(true).is_empty());
        assert_eq!(row.to_values(false).len(), 3);
    }

    #[test]
    fn test_get_unknown_name_is_none() {
        let mut row = Row::new(Arc::new(post_entity()), None);
        assert!(row.get("nope").is_none());
        assert_eq!(row.access("nope"), Access::Absent);
        assert!(row.fetch("nope").unwrap().is_none());
        assert!(!row.contains("nope"));
        assert!(row.get_as::<i64>("nope").is_err());
    }

    #[test]
    fn test_getter_result_is_cached_but_clean() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let entity = post_entity().getter(
            "shout",
            Arc::new(move |row: &Row| -> Result<Slot> {
                *counter.lock().unwrap() += 1;
                let title = row.get_as::<String>("title")?;
                Ok(Slot::Value(Value::Text(title.to_uppercase())))
            }),
        );
        let mut row = Row::new(
            Arc::new(entity),
            Some(record(&[("title", Value::from("hi"))])),
        );

        assert_eq!(row.access("shout"), Access::Getter);
        let slot = row.fetch("shout").unwrap().cloned();
        assert_eq!(slot, Some(Slot::Value(Value::from("HI"))));
        row.fetch("shout").unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(row.access("shout"), Access::Present);
        assert!(!row.changed());
    }

    #[test]
    fn test_lazy_relation_is_memoized_until_reload() {
        let author = Arc::new(MockEntity::new(
            "author",
            &[("id", Value::Null), ("name", Value::Null)],
        ));
        author.store(record(&[("id", Value::BigInt(5)), ("name", Value::from("ann"))]));
        let author_ref: EntityRef = author.clone();

        let post = post_entity().related("author", RelationKind::HasOne);
        post.store(record(&[
            ("id", Value::BigInt(1)),
            ("title", Value::from("t")),
            ("author_id", Value::BigInt(5)),
        ]));
        post.link(&author_ref);
        let post: EntityRef = Arc::new(post);

        let mut row = Row::new(
            Arc::clone(&post),
            Some(record(&[
                ("id", Value::BigInt(1)),
                ("author_id", Value::BigInt(5)),
            ])),
        );
        assert_eq!(row.access("author"), Access::Relation);

        let slot = row.fetch("author").unwrap().cloned().unwrap();
        let author_row = slot.as_row().unwrap();
        assert_eq!(author_row.get_as::<String>("name").unwrap(), "ann");
        assert_eq!(row.access("author"), Access::Present);
        assert!(!row.changed());

        row.reload().unwrap();
        assert!(!row.contains("author"));
    }

    #[test]
    fn test_relation_to_unknown_entity_fails() {
        let row = Row::new(Arc::new(post_entity()), None);
        let err = row.relation("ghost", &Scope::new()).unwrap_err();
        assert!(err.is_row_error(RowErrorKind::UnknownRelation));
    }

    #[test]
    fn test_invoke_prefers_field_then_relation() {
        let comment = Arc::new(MockEntity::new(
            "comment",
            &[("id", Value::Null), ("post_id", Value::Null)],
        ));
        comment.store(record(&[("id", Value::BigInt(1)), ("post_id", Value::BigInt(9))]));
        comment.store(record(&[("id", Value::BigInt(2)), ("post_id", Value::BigInt(9))]));
        comment.store(record(&[("id", Value::BigInt(3)), ("post_id", Value::BigInt(4))]));
        let comment_ref: EntityRef = comment;

        let post = post_entity().related("comment", RelationKind::HasMany);
        post.link(&comment_ref);
        let mut row = Row::new(
            Arc::new(post),
            Some(record(&[("id", Value::BigInt(9)), ("title", Value::from("x"))])),
        );

        assert_eq!(row.invoke("getTitle", None).unwrap(), Slot::Value(Value::from("x")));

        let comments = row.invoke("comment", None).unwrap();
        assert_eq!(comments.as_rows().map(<[Row]>::len), Some(2));

        let narrowed = row
            .invoke("comment", Some(&Scope::new().where_eq("id", 2_i64)))
            .unwrap();
        assert_eq!(narrowed.as_rows().map(<[Row]>::len), Some(1));

        let via_get = row.invoke("getComment", None).unwrap();
        assert_eq!(via_get.as_rows().map(<[Row]>::len), Some(2));
        assert!(!row.contains("comment"));

        let err = row.invoke("getNothing", None).unwrap_err();
        assert!(err.is_row_error(RowErrorKind::UnknownRelation));
    }

    #[test]
    fn test_accessor_suffix() {
        assert_eq!(accessor_suffix("getTitle"), Some("Title"));
        assert_eq!(accessor_suffix("get_title"), Some("title"));
        assert_eq!(accessor_suffix("get"), None);
        assert_eq!(accessor_suffix("comments"), None);
        assert_eq!(accessor_suffix("target"), None);
    }

    #[test]
    fn test_set_relation_assigns_foreign_key() {
        let author: EntityRef = Arc::new(MockEntity::new("author", &[("id", Value::Null)]));
        let post: EntityRef = Arc::new(post_entity().related("author", RelationKind::HasOne));

        let ann = Row::new(Arc::clone(&author), Some(record(&[("id", Value::BigInt(5))])));
        let mut row = Row::new(post, None);
        row.set_relation(&[&ann]).unwrap();

        assert_eq!(row.value("author_id"), Some(&Value::BigInt(5)));
        assert!(row.changes().contains("author_id"));
    }

    #[test]
    fn test_set_relation_validates_before_assigning() {
        let author: EntityRef = Arc::new(MockEntity::new("author", &[("id", Value::Null)]));
        let tag: EntityRef = Arc::new(MockEntity::new("tag", &[("id", Value::Null)]));
        let post: EntityRef = Arc::new(
            post_entity()
                .related("author", RelationKind::HasOne)
                .related("tag", RelationKind::ManyToMany),
        );

        let ann = Row::new(Arc::clone(&author), Some(record(&[("id", Value::BigInt(5))])));
        let unsaved = Row::new(Arc::clone(&author), None);
        let rust = Row::new(Arc::clone(&tag), Some(record(&[("id", Value::BigInt(2))])));
        let unsaved_tag = Row::new(tag, None);
        let mut row = Row::new(post, None);

        let err = row.set_relation(&[&ann, &rust]).unwrap_err();
        assert!(err.is_row_error(RowErrorKind::InvalidRelation));
        assert!(!row.changed());
        assert_eq!(row.value("author_id"), Some(&Value::Null));

        let err = row.set_relation(&[&unsaved]).unwrap_err();
        assert!(err.is_row_error(RowErrorKind::MissingIdentity));

        let err = row.set_relation(&[&unsaved_tag]).unwrap_err();
        assert!(err.is_row_error(RowErrorKind::MissingIdentity));
        assert!(!row.changed());
    }

    #[test]
    fn test_save_inserts_then_updates_minimal_diff() {
        let entity = Arc::new(post_entity());
        let mut row = Row::new(entity.clone(), None);
        row.set_value("title", "Hello");
        row.set_value("scratch", "not a field");
        row.save(SaveOptions::default()).unwrap();

        assert!(!row.changed());
        assert_eq!(row.id(), Some(&Value::BigInt(7)));
        {
            let calls = entity.calls.lock().unwrap();
            let (payload, dup) = &calls.inserts[0];
            assert!(!dup);
            assert_eq!(payload.names(), &["id", "title", "author_id"]);
        }

        row.set_value("title", "Again");
        row.save(SaveOptions::default()).unwrap();
        row.save(SaveOptions::new().only_changed_values(false)).unwrap();

        let calls = entity.calls.lock().unwrap();
        assert_eq!(calls.updates.len(), 2);
        let (_, scope, changed) = &calls.updates[0];
        assert_eq!(scope, &Scope::by_identity("id", Value::BigInt(7)));
        assert_eq!(changed.as_deref(), Some(&["title".to_string()][..]));
        assert_eq!(calls.updates[1].2, None);
    }

    #[test]
    fn test_save_without_changes_sends_empty_diff() {
        let entity = Arc::new(post_entity());
        let mut row = Row::new(entity.clone(), None);
        row.save(SaveOptions::default()).unwrap();
        row.save(SaveOptions::default()).unwrap();

        let calls = entity.calls.lock().unwrap();
        assert_eq!(calls.updates.len(), 1);
        assert_eq!(calls.updates[0].2, Some(Vec::new()));
    }

    #[test]
    fn test_storage_errors_propagate_unchanged() {
        let entity = Arc::new(post_entity());
        let mut row = Row::new(entity, Some(record(&[("id", Value::BigInt(99))])));
        row.set_value("title", "x");
        let err = row.save(SaveOptions::default()).unwrap_err();
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::NotFound));
        assert!(row.changed());
    }

    #[test]
    fn test_delete() {
        let entity = Arc::new(post_entity());
        Row::new(entity.clone(), None).delete().unwrap();
        assert!(entity.calls.lock().unwrap().deletes.is_empty());

        entity.store(record(&[("id", Value::BigInt(4))]));
        Row::new(entity.clone(), Some(record(&[("id", Value::BigInt(4))])))
            .delete()
            .unwrap();
        let calls = entity.calls.lock().unwrap();
        assert_eq!(calls.deletes, vec![Scope::by_identity("id", Value::BigInt(4))]);
        assert!(entity.stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reload_failure_leaves_row_untouched() {
        let mut row = Row::new(
            Arc::new(post_entity()),
            Some(record(&[("id", Value::BigInt(7))])),
        );
        row.set_value("title", "draft");
        let before = row.clone();

        let err = row.reload().unwrap_err();
        assert!(err.is_row_error(RowErrorKind::NotPersisted));
        assert_eq!(row, before);
        assert_eq!(row.changes(), before.changes());

        let mut fresh = Row::new(Arc::new(post_entity()), None);
        assert!(fresh.reload().unwrap_err().is_row_error(RowErrorKind::NotPersisted));
    }

    #[test]
    fn test_reload_replaces_values() {
        let entity = Arc::new(post_entity());
        entity.store(record(&[("id", Value::BigInt(7)), ("title", Value::from("db"))]));
        let mut row = Row::new(entity, Some(record(&[("id", Value::BigInt(7))])));
        row.set_value("title", "local");
        row.reload().unwrap();

        assert_eq!(row.value("title"), Some(&Value::from("db")));
        assert!(!row.changed());
        assert!(!row.contains("author_id"));
    }

    #[test]
    fn test_to_json_cuts_entity_cycles() {
        let author: EntityRef = Arc::new(MockEntity::new("author", &[("id", Value::Null)]));
        let post: EntityRef = Arc::new(post_entity());

        let mut inner_post = Row::new(Arc::clone(&post), Some(record(&[("id", Value::BigInt(1))])));
        inner_post.set_slot("extra", Value::from("ok"));
        let mut author_row = Row::new(author, Some(record(&[("id", Value::BigInt(5))])));
        author_row.set_slot("post", Slot::Rows(vec![inner_post]));

        let mut row = Row::new(post, Some(record(&[("id", Value::BigInt(1))])));
        row.set_slot("author", author_row);

        let json = row.to_json(false);
        assert_eq!(json["author"]["id"], serde_json::json!(5));
        assert_eq!(json["author"]["post"], serde_json::Value::Null);
        assert_eq!(json["title"], serde_json::json!(""));

        let guarded = row.flatten(false, &["post".to_string()]);
        assert!(guarded.is_none());
    }

    #[test]
    fn test_to_json_keys_collections_by_id() {
        let comment: EntityRef = Arc::new(MockEntity::new(
            "comment",
            &[("id", Value::Null), ("body", Value::Null)],
        ));
        let rows = vec![
            Row::new(
                Arc::clone(&comment),
                Some(record(&[("id", Value::BigInt(3)), ("body", Value::from("a"))])),
            ),
            Row::new(
                comment,
                Some(record(&[("id", Value::BigInt(8)), ("body", Value::from("b"))])),
            ),
        ];
        let mut row = Row::new(Arc::new(post_entity()), None);
        row.set_slot("comment", rows);

        let listed = row.to_json(false);
        assert_eq!(listed["comment"][1]["body"], serde_json::json!("b"));

        let keyed = row.to_json(true);
        assert_eq!(keyed["comment"]["3"]["body"], serde_json::json!("a"));
        assert_eq!(keyed["comment"]["8"]["id"], serde_json::json!(8));
    }

    #[test]
    fn test_to_json_keeps_field_order() {
        let comment: EntityRef = Arc::new(MockEntity::new(
            "comment",
            &[("id", Value::Null), ("body", Value::Null), ("post_id", Value::Null)],
        ));
        let mut row = Row::new(Arc::new(post_entity()), None);
        row.set_slot("comment", vec![Row::new(Arc::clone(&comment), None)]);
        row.set_value("a_late_field", 1_i64);

        let json = row.to_json(false);
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        let names: Vec<&String> = row.values().names().iter().collect();
        assert_eq!(keys, names);

        let nested: Vec<&String> = json["comment"][0].as_object().unwrap().keys().collect();
        assert_eq!(nested, vec!["id", "body", "post_id"]);
    }

    #[test]
    fn test_keys_as_id_keeps_rows_without_identity() {
        let comment: EntityRef = Arc::new(MockEntity::new(
            "comment",
            &[("id", Value::Null), ("body", Value::Null)],
        ));
        let rows = vec![
            Row::new(Arc::clone(&comment), Some(record(&[("body", Value::from("a"))]))),
            Row::new(Arc::clone(&comment), Some(record(&[("body", Value::from("b"))]))),
            Row::new(
                comment,
                Some(record(&[("id", Value::BigInt(9)), ("body", Value::from("c"))])),
            ),
        ];
        let mut row = Row::new(Arc::new(post_entity()), None);
        row.set_slot("comment", rows);

        let keyed = row.to_json(true);
        let comments = keyed["comment"].as_object().unwrap();
        assert_eq!(comments.len(), 3);
        assert_eq!(comments["0"]["body"], serde_json::json!("a"));
        assert_eq!(comments["1"]["body"], serde_json::json!("b"));
        assert_eq!(comments["9"]["body"], serde_json::json!("c"));
    }

    #[test]
    fn test_getter_takes_priority_over_relation() {
        let author = Arc::new(MockEntity::new(
            "author",
            &[("id", Value::Null), ("name", Value::Null)],
        ));
        author.store(record(&[("id", Value::BigInt(5)), ("name", Value::from("ann"))]));
        let author_ref: EntityRef = author;

        let post = post_entity()
            .related("author", RelationKind::HasOne)
            .getter(
                "author",
                Arc::new(|_row: &Row| -> Result<Slot> {
                    Ok(Slot::Value(Value::from("computed")))
                }),
            );
        post.link(&author_ref);
        let mut row = Row::new(
            Arc::new(post),
            Some(record(&[("id", Value::BigInt(1)), ("author_id", Value::BigInt(5))])),
        );

        assert!(row.entity().is_related("author"));
        assert_eq!(row.access("author"), Access::Getter);
        let slot = row.fetch("author").unwrap().cloned();
        assert_eq!(slot, Some(Slot::Value(Value::from("computed"))));
        assert_eq!(row.invoke("author", None).unwrap(), Slot::Value(Value::from("computed")));

        row.set_value("author", "assigned");
        assert_eq!(row.access("author"), Access::Present);
        assert_eq!(
            row.fetch("author").unwrap(),
            Some(&Slot::Value(Value::from("assigned")))
        );
    }

    #[test]
    fn test_display_dump() {
        let row = Row::new(
            Arc::new(MockEntity::new("tag", &[("id", Value::Null)])),
            Some(record(&[("id", Value::BigInt(2))])),
        );
        assert_eq!(row.to_string(), "tag {\"id\":2}");
    }
}
