//! An entity whose records live in a `Vec` behind a mutex.

use crate::config::StoreConfig;
use crate::def::EntityDef;
use crate::store::MemoryStore;
use rowmodel_core::{
    Entity, EntityRef, Error, Getter, Record, Registry, RelationKind, Result, Row, RowError,
    RowErrorKind, Scope, Selection, StorageError, StorageErrorKind, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug)]
struct Table {
    records: Vec<Record>,
    next_id: i64,
}

/// In-memory entity registered with a [`MemoryStore`].
pub struct MemoryEntity {
    name: String,
    fields: Vec<String>,
    defaults: Record,
    primary_key: String,
    foreign_key: String,
    getters: HashMap<String, Getter>,
    detect_bridges: bool,
    registry: Weak<MemoryStore>,
    table: Mutex<Table>,
}

impl MemoryEntity {
    pub(crate) fn from_def(
        def: EntityDef,
        config: &StoreConfig,
        registry: Weak<MemoryStore>,
    ) -> Self {
        let primary_key = def.primary_key.unwrap_or_else(|| config.primary_key.clone());
        let foreign_key = def
            .foreign_key
            .unwrap_or_else(|| config.foreign_key_for(&def.name));

        // The identity field is always declared, first when implicit.
        let defaults = if def.defaults.contains(&primary_key) {
            def.defaults
        } else {
            let mut defaults = Record::with_capacity(def.defaults.len() + 1);
            defaults.insert(primary_key.clone(), Value::Null);
            defaults.extend(def.defaults);
            defaults
        };

        Self {
            fields: defaults.names().to_vec(),
            name: def.name,
            defaults,
            primary_key,
            foreign_key,
            getters: def.getters,
            detect_bridges: config.detect_bridges,
            registry,
            table: Mutex::new(Table {
                records: Vec::new(),
                next_id: config.first_id,
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored record, in insertion order.
    pub fn records(&self) -> Vec<Record> {
        self.table().records.clone()
    }

    /// Stored records within `scope`, honoring its limit.
    pub fn select(&self, scope: &Scope) -> Vec<Record> {
        self.table()
            .records
            .iter()
            .filter(|r| scope.matches(r))
            .take(scope.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().records.is_empty()
    }

    /// The bridge entity linking this entity with `other`, if one is defined
    /// and declares both foreign keys.
    fn bridge(&self, other: &dyn Entity) -> Option<Arc<MemoryEntity>> {
        if !self.detect_bridges {
            return None;
        }
        let store = self.registry.upgrade()?;
        let bridge = store.memory_entity(&StoreConfig::bridge_name(&self.name, other.name()))?;
        (bridge.has_field(&self.foreign_key) && bridge.has_field(&other.foreign_key()))
            .then_some(bridge)
    }

    fn not_found(&self, message: impl Into<String>) -> Error {
        Error::Storage(StorageError::new(
            StorageErrorKind::NotFound,
            &self.name,
            message,
        ))
    }

    fn identity_of<'r>(&self, record: &'r Record) -> Option<&'r Value> {
        record
            .get(&self.primary_key)
            .filter(|v| !v.is_empty_identity())
    }
}

impl fmt::Debug for MemoryEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEntity")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("primary_key", &self.primary_key)
            .field("foreign_key", &self.foreign_key)
            .finish_non_exhaustive()
    }
}

impl Entity for MemoryEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn defaults(&self) -> Record {
        self.defaults.clone()
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn foreign_key(&self) -> String {
        self.foreign_key.clone()
    }

    fn relation(&self, other: &dyn Entity) -> Option<RelationKind> {
        if self.has_field(&other.foreign_key()) {
            Some(RelationKind::HasOne)
        } else if other.has_field(&self.foreign_key) {
            Some(RelationKind::HasMany)
        } else if self.bridge(other).is_some() {
            Some(RelationKind::ManyToMany)
        } else {
            None
        }
    }

    fn resolve(&self, name: &str) -> Option<EntityRef> {
        self.registry.upgrade()?.entity(name)
    }

    fn getter(&self, name: &str) -> Option<Getter> {
        self.getters.get(name).cloned()
    }

    #[tracing::instrument(level = "debug", skip(self, payload), fields(entity = %self.name))]
    fn insert(&self, payload: &Record, handle_duplications: bool) -> Result<Record> {
        let mut record = self.defaults.clone();
        for (name, value) in payload.iter() {
            if self.has_field(name) {
                record.insert(name, value.clone());
            }
        }

        let mut table = self.table();
        let id = match self.identity_of(&record) {
            Some(id) => id.clone(),
            None => {
                let id = Value::BigInt(table.next_id);
                table.next_id = table.next_id.checked_add(1).ok_or_else(|| {
                    Error::Storage(StorageError::new(
                        StorageErrorKind::Backend,
                        &self.name,
                        "generated identities are exhausted",
                    ))
                })?;
                record.insert(self.primary_key.as_str(), id.clone());
                id
            }
        };
        if let Some(n) = id.as_i64() {
            table.next_id = table.next_id.max(n.saturating_add(1));
        }

        let existing = table.records.iter().position(|r| {
            self.identity_of(r).is_some_and(|stored| stored.loosely_eq(&id))
        });

        match existing {
            Some(index) if handle_duplications => {
                let stored = &mut table.records[index];
                for (name, value) in payload.iter() {
                    if self.has_field(name) {
                        stored.insert(name, value.clone());
                    }
                }
                tracing::debug!(id = %id.to_key(), "Duplicate identity; updated in place");
                Ok(stored.clone())
            }
            Some(_) => Err(Error::Storage(StorageError::new(
                StorageErrorKind::Duplicate,
                &self.name,
                format!("a record with {} {} already exists", self.primary_key, id.to_key()),
            ))),
            None => {
                tracing::debug!(id = %id.to_key(), "Inserted record");
                table.records.push(record.clone());
                Ok(record)
            }
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, payload, scope, changed),
        fields(entity = %self.name, filter = %scope.to_sql().0)
    )]
    fn update(
        &self,
        payload: &Record,
        scope: &Scope,
        changed: Option<&[String]>,
    ) -> Result<Record> {
        let written: Vec<&str> = match changed {
            Some(names) => names
                .iter()
                .map(String::as_str)
                .filter(|name| payload.contains(name))
                .collect(),
            None => payload.names().iter().map(String::as_str).collect(),
        };

        let mut table = self.table();
        let mut first = None;
        let mut touched = 0_usize;
        for record in table
            .records
            .iter_mut()
            .filter(|r| scope.matches(r))
            .take(scope.limit.unwrap_or(usize::MAX))
        {
            for name in &written {
                if let Some(value) = payload.get(name) {
                    record.insert(*name, value.clone());
                }
            }
            touched += 1;
            if first.is_none() {
                first = Some(record.clone());
            }
        }

        tracing::debug!(touched, fields = written.len(), "Updated records");
        first.ok_or_else(|| self.not_found("no record matched the update scope"))
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, scope),
        fields(entity = %self.name, filter = %scope.to_sql().0)
    )]
    fn delete(&self, scope: &Scope) -> Result<u64> {
        let limit = scope.limit.unwrap_or(usize::MAX);
        let mut removed = 0_usize;
        self.table().records.retain(|r| {
            if removed < limit && scope.matches(r) {
                removed += 1;
                false
            } else {
                true
            }
        });
        tracing::debug!(removed, "Deleted records");
        Ok(removed as u64)
    }

    fn select_one(&self, scope: &Scope) -> Result<Option<Record>> {
        Ok(self
            .table()
            .records
            .iter()
            .find(|r| scope.matches(r))
            .cloned())
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, row, scope),
        fields(entity = %self.name, owner = %row.entity_name())
    )]
    fn select_by(&self, row: &Row, scope: &Scope) -> Result<Selection> {
        let owner = row.entity();
        let Some(kind) = owner.relation(self) else {
            return Err(RowError::new(
                RowErrorKind::InvalidRelation,
                owner.name(),
                format!("'{}' is not related to '{}'", self.name, owner.name()),
            )
            .with_target(&self.name)
            .into());
        };
        tracing::trace!(kind = %kind, "Selecting related records");

        match kind {
            RelationKind::HasOne => {
                let Some(reference) = row
                    .value(&self.foreign_key)
                    .filter(|v| !v.is_empty_identity())
                else {
                    return Ok(Selection::None);
                };
                let scope = Scope::new()
                    .where_eq(self.primary_key.as_str(), reference.clone())
                    .merge(scope);
                Ok(self
                    .select_one(&scope)?
                    .map_or(Selection::None, Selection::One))
            }
            RelationKind::HasMany => {
                let Some(id) = row.id() else {
                    return Ok(Selection::Many(Vec::new()));
                };
                let scope = Scope::new()
                    .where_eq(owner.foreign_key(), id.clone())
                    .merge(scope);
                Ok(Selection::Many(self.select(&scope)))
            }
            RelationKind::ManyToMany => {
                let Some(id) = row.id() else {
                    return Ok(Selection::Many(Vec::new()));
                };
                let Some(bridge) = self.bridge(owner.as_ref()) else {
                    return Ok(Selection::Many(Vec::new()));
                };
                let links = bridge.select(&Scope::new().where_eq(owner.foreign_key(), id.clone()));
                let targets: Vec<Value> = links
                    .iter()
                    .filter_map(|link| link.get(&self.foreign_key))
                    .filter(|v| !v.is_empty_identity())
                    .cloned()
                    .collect();

                let limit = scope.limit.unwrap_or(usize::MAX);
                let records = self
                    .table()
                    .records
                    .iter()
                    .filter(|r| {
                        self.identity_of(r)
                            .is_some_and(|own| targets.iter().any(|t| t.loosely_eq(own)))
                    })
                    .filter(|r| scope.matches(r))
                    .take(limit)
                    .cloned()
                    .collect();
                Ok(Selection::Many(records))
            }
        }
    }
}
