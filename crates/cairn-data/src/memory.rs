//! In-process durable store.
//!
//! Records are kept in insertion order under a single lock; the lock is never
//! held across an await point.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use cairn_core::{
    Actor, CreateOutcome, EntityId, EntityPatch, EntityRecord, EntityStore, EntityType, ListArgs,
    NewEntity, OrderMode, Page, StandardId, StoreError, StoreResult, attribute_text,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Durable store backed by process memory.
#[derive(Default)]
pub struct MemoryEntityStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    rows: BTreeMap<u64, EntityRecord>,
    seq_by_id: HashMap<EntityId, u64>,
    identities: HashMap<(EntityType, StandardId), EntityId>,
}

impl MemoryState {
    fn get(&self, id: EntityId, entity_type: EntityType) -> Option<(u64, &EntityRecord)> {
        let seq = *self.seq_by_id.get(&id)?;
        self.rows
            .get(&seq)
            .filter(|record| record.entity_type == entity_type)
            .map(|record| (seq, record))
    }
}

impl MemoryEntityStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().rows.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn load_by_id(
        &self,
        id: EntityId,
        entity_type: EntityType,
    ) -> StoreResult<EntityRecord> {
        self.read()
            .get(id, entity_type)
            .map(|(_, record)| record.clone())
            .ok_or(StoreError::NotFound { entity_type, id })
    }

    async fn load_by_standard_id(
        &self,
        standard_id: &StandardId,
        entity_type: EntityType,
    ) -> StoreResult<Option<EntityRecord>> {
        let state = self.read();
        Ok(state
            .identities
            .get(&(entity_type, standard_id.clone()))
            .and_then(|id| state.get(*id, entity_type))
            .map(|(_, record)| record.clone()))
    }

    async fn list_entities(
        &self,
        types: &[EntityType],
        indexed_attributes: &[&str],
        args: &ListArgs,
    ) -> StoreResult<Page<EntityRecord>> {
        let offset = args.offset()?;
        let needle = args
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<EntityRecord> = self
            .read()
            .rows
            .values()
            .filter(|record| types.contains(&record.entity_type))
            .filter(|record| {
                needle
                    .as_deref()
                    .is_none_or(|term| matches_search(record, indexed_attributes, term))
            })
            .filter(|record| {
                args.filters
                    .iter()
                    .all(|filter| filter.matches(record.attribute(&filter.key)))
            })
            .cloned()
            .collect();

        if let Some(field) = args.order_by.as_deref() {
            // Stable sort keeps insertion order among equal keys.
            matches.sort_by(|left, right| {
                compare_sort_keys(left.attribute(field), right.attribute(field), args.order_mode)
            });
        }

        let global_count = u64::try_from(matches.len()).unwrap_or(u64::MAX);
        let window: Vec<EntityRecord> = matches
            .into_iter()
            .skip(offset)
            .take(args.first.unwrap_or(usize::MAX))
            .collect();
        Ok(Page::from_window(window, offset, global_count))
    }

    async fn create_entity(&self, actor: &Actor, entity: NewEntity) -> StoreResult<CreateOutcome> {
        let mut state = self.write();
        let identity = (entity.entity_type, entity.standard_id.clone());
        if let Some(existing) = state
            .identities
            .get(&identity)
            .and_then(|id| state.get(*id, entity.entity_type))
        {
            return Ok(CreateOutcome::Existing(existing.1.clone()));
        }

        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::new_v4(),
            standard_id: entity.standard_id,
            entity_type: entity.entity_type,
            attributes: entity.attributes,
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq_by_id.insert(record.id, seq);
        state.identities.insert(identity, record.id);
        state.rows.insert(seq, record.clone());
        drop(state);
        Ok(CreateOutcome::Created(record))
    }

    async fn update_attribute(
        &self,
        actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
        patch: EntityPatch,
    ) -> StoreResult<EntityRecord> {
        let mut state = self.write();
        let (seq, current) = state
            .get(id, entity_type)
            .ok_or(StoreError::NotFound { entity_type, id })?;
        let mut updated = current.clone();

        if let Some(standard_id) = patch.standard_id.as_ref()
            && *standard_id != updated.standard_id
        {
            let identity = (entity_type, standard_id.clone());
            if let Some(existing_id) = state.identities.get(&identity).copied()
                && existing_id != id
            {
                return Err(StoreError::Conflict {
                    entity_type,
                    standard_id: standard_id.clone(),
                    existing_id,
                });
            }
            state
                .identities
                .remove(&(entity_type, updated.standard_id.clone()));
            state.identities.insert(identity, id);
            updated.standard_id = standard_id.clone();
        }

        patch.apply_to(&mut updated.attributes);
        updated.updated_by = actor.clone();
        updated.updated_at = Utc::now();
        state.rows.insert(seq, updated.clone());
        drop(state);
        Ok(updated)
    }

    async fn delete_element_by_id(
        &self,
        _actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
    ) -> StoreResult<EntityRecord> {
        let mut state = self.write();
        let (seq, _) = state
            .get(id, entity_type)
            .ok_or(StoreError::NotFound { entity_type, id })?;
        state.seq_by_id.remove(&id);
        let removed = state
            .rows
            .remove(&seq)
            .ok_or(StoreError::NotFound { entity_type, id })?;
        state
            .identities
            .remove(&(entity_type, removed.standard_id.clone()));
        drop(state);
        Ok(removed)
    }
}

fn matches_search(record: &EntityRecord, indexed_attributes: &[&str], term: &str) -> bool {
    indexed_attributes.iter().any(|key| {
        record
            .attribute(key)
            .and_then(attribute_text)
            .is_some_and(|text| text.to_lowercase().contains(term))
    })
}

/// Order attribute values the way Postgres orders `jsonb`; missing values sort last
/// in both directions.
fn compare_sort_keys(left: Option<&Value>, right: Option<&Value>, mode: OrderMode) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            let ordering = compare_json(left, right);
            match mode {
                OrderMode::Asc => ordering,
                OrderMode::Desc => ordering.reverse(),
            }
        }
    }
}

const fn json_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_json(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::String(left), Value::String(right)) => left.cmp(right),
        (Value::Number(left), Value::Number(right)) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        _ => json_rank(left).cmp(&json_rank(right)),
    }
}
