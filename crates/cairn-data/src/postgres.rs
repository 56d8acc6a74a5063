//! Postgres-backed durable store.

use async_trait::async_trait;
use cairn_core::{
    Actor, Attributes, CreateOutcome, EntityId, EntityPatch, EntityRecord, EntityStore,
    EntityType, ListArgs, NewEntity, Page, StandardId, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{DataError, Result};

/// Shared `WHERE` clause for listing and counting.
///
/// `$1` entity type slugs, `$2` escaped `ILIKE` pattern or `NULL`, `$3` indexed
/// attribute names, `$4` filters as `[{"key": .., "values": [..]}]`.
macro_rules! list_predicate {
    () => {
        r#"
    WHERE e.entity_type = ANY($1)
      AND ($2::text IS NULL OR EXISTS (
            SELECT 1 FROM unnest($3::text[]) AS idx(key)
            WHERE e.attributes ->> idx.key ILIKE $2))
      AND NOT EXISTS (
            SELECT 1 FROM jsonb_to_recordset($4::jsonb) AS f(key text, "values" text[])
            WHERE (e.attributes ->> f.key = ANY(f."values")) IS NOT TRUE)
"#
    };
}

macro_rules! entity_columns {
    () => {
        "id, entity_type, standard_id, attributes, created_by, updated_by, created_at, updated_at"
    };
}

const SELECT_BY_ID: &str = concat!(
    "SELECT ",
    entity_columns!(),
    " FROM cairn.entities WHERE id = $1 AND entity_type = $2"
);

const SELECT_BY_STANDARD_ID: &str = concat!(
    "SELECT ",
    entity_columns!(),
    " FROM cairn.entities WHERE standard_id = $1 AND entity_type = $2"
);

const INSERT_ENTITY: &str = concat!(
    r"
    INSERT INTO cairn.entities
        (id, entity_type, standard_id, attributes, created_by, updated_by, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $5, $6, $6)
    ON CONFLICT ON CONSTRAINT entities_identity_key DO NOTHING
    RETURNING ",
    entity_columns!()
);

const UPDATE_ENTITY: &str = concat!(
    r"
    UPDATE cairn.entities
    SET attributes = (attributes || $3::jsonb) - $4::text[],
        standard_id = COALESCE($5, standard_id),
        updated_by = $6,
        updated_at = $7
    WHERE id = $1 AND entity_type = $2
    RETURNING ",
    entity_columns!()
);

const DELETE_ENTITY: &str = concat!(
    "DELETE FROM cairn.entities WHERE id = $1 AND entity_type = $2 RETURNING ",
    entity_columns!()
);

const COUNT_ENTITIES: &str = concat!("SELECT COUNT(*) FROM cairn.entities e", list_predicate!());

const LIST_ENTITIES: &str = concat!(
    "SELECT e.id, e.entity_type, e.standard_id, e.attributes, e.created_by, e.updated_by, \
     e.created_at, e.updated_at FROM cairn.entities e",
    list_predicate!(),
    r"
    ORDER BY
        CASE WHEN $6 = 'asc' THEN e.attributes -> $5::text END ASC NULLS LAST,
        CASE WHEN $6 = 'desc' THEN e.attributes -> $5::text END DESC NULLS LAST,
        e.seq ASC
    LIMIT $7 OFFSET $8
"
);

/// Durable entity store persisted in the `cairn.entities` table.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    /// Initialise the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MigrationFailed`] when a migration cannot be applied.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Connect to `url` and initialise the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|source| DataError::query("connect", source))?;
        tracing::info!(max_connections, "connected to postgres entity store");
        Self::new(pool).await
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_by_standard_id(
        &self,
        standard_id: &StandardId,
        entity_type: EntityType,
    ) -> Result<Option<EntityRecord>> {
        sqlx::query_as::<_, EntityRow>(SELECT_BY_STANDARD_ID)
            .bind(standard_id.as_str())
            .bind(entity_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("load_by_standard_id", source))?
            .map(EntityRecord::try_from)
            .transpose()
    }

    async fn conflict_for(
        &self,
        standard_id: StandardId,
        entity_type: EntityType,
        source: sqlx::Error,
    ) -> StoreError {
        match self.fetch_by_standard_id(&standard_id, entity_type).await {
            Ok(Some(existing)) => StoreError::Conflict {
                entity_type,
                standard_id,
                existing_id: existing.id,
            },
            Ok(None) => DataError::query("update_attribute", source).into(),
            Err(err) => err.into(),
        }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn load_by_id(
        &self,
        id: EntityId,
        entity_type: EntityType,
    ) -> StoreResult<EntityRecord> {
        let row = sqlx::query_as::<_, EntityRow>(SELECT_BY_ID)
            .bind(id)
            .bind(entity_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("load_by_id", source))?
            .ok_or(StoreError::NotFound { entity_type, id })?;
        Ok(EntityRecord::try_from(row)?)
    }

    async fn load_by_standard_id(
        &self,
        standard_id: &StandardId,
        entity_type: EntityType,
    ) -> StoreResult<Option<EntityRecord>> {
        Ok(self.fetch_by_standard_id(standard_id, entity_type).await?)
    }

    async fn list_entities(
        &self,
        types: &[EntityType],
        indexed_attributes: &[&str],
        args: &ListArgs,
    ) -> StoreResult<Page<EntityRecord>> {
        let offset = args.offset()?;
        let slugs: Vec<String> = types.iter().map(ToString::to_string).collect();
        let pattern = args
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| format!("%{}%", escape_like(term)));
        let indexed: Vec<String> = indexed_attributes.iter().map(ToString::to_string).collect();
        let filters = Json(json!(args.filters));

        let global_count: i64 = sqlx::query_scalar(COUNT_ENTITIES)
            .bind(slugs.clone())
            .bind(pattern.clone())
            .bind(indexed.clone())
            .bind(filters.clone())
            .fetch_one(&self.pool)
            .await
            .map_err(|source| DataError::query("count_entities", source))?;

        let rows = sqlx::query_as::<_, EntityRow>(LIST_ENTITIES)
            .bind(slugs)
            .bind(pattern)
            .bind(indexed)
            .bind(filters)
            .bind(args.order_by.as_deref())
            .bind(args.order_mode.as_str())
            .bind(args.first.map_or(i64::MAX, clamp_i64))
            .bind(clamp_i64(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|source| DataError::query("list_entities", source))?;

        let items = rows
            .into_iter()
            .map(EntityRecord::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_window(
            items,
            offset,
            u64::try_from(global_count).unwrap_or_default(),
        ))
    }

    async fn create_entity(&self, actor: &Actor, entity: NewEntity) -> StoreResult<CreateOutcome> {
        let inserted = sqlx::query_as::<_, EntityRow>(INSERT_ENTITY)
            .bind(Uuid::new_v4())
            .bind(entity.entity_type.as_str())
            .bind(entity.standard_id.as_str())
            .bind(Json(Value::Object(entity.attributes)))
            .bind(actor.id())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("create_entity", source))?;

        if let Some(row) = inserted {
            return Ok(CreateOutcome::Created(EntityRecord::try_from(row)?));
        }

        // The identity is held by another row; hand that row back unchanged.
        self.fetch_by_standard_id(&entity.standard_id, entity.entity_type)
            .await?
            .map(CreateOutcome::Existing)
            .ok_or_else(|| {
                StoreError::backend("create_entity", "conflicting entity vanished during insert")
            })
    }

    async fn update_attribute(
        &self,
        actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
        patch: EntityPatch,
    ) -> StoreResult<EntityRecord> {
        let result = sqlx::query_as::<_, EntityRow>(UPDATE_ENTITY)
            .bind(id)
            .bind(entity_type.as_str())
            .bind(Json(Value::Object(patch.set)))
            .bind(patch.unset)
            .bind(patch.standard_id.as_ref().map(StandardId::as_str))
            .bind(actor.id())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(Some(row)) => Ok(EntityRecord::try_from(row)?),
            Ok(None) => Err(StoreError::NotFound { entity_type, id }),
            Err(source) if is_unique_violation(&source) => match patch.standard_id {
                Some(standard_id) => Err(self.conflict_for(standard_id, entity_type, source).await),
                None => Err(DataError::query("update_attribute", source).into()),
            },
            Err(source) => Err(DataError::query("update_attribute", source).into()),
        }
    }

    async fn delete_element_by_id(
        &self,
        actor: &Actor,
        id: EntityId,
        entity_type: EntityType,
    ) -> StoreResult<EntityRecord> {
        let row = sqlx::query_as::<_, EntityRow>(DELETE_ENTITY)
            .bind(id)
            .bind(entity_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| DataError::query("delete_element_by_id", source))?
            .ok_or(StoreError::NotFound { entity_type, id })?;
        tracing::debug!(entity_id = %id, actor = %actor, "entity row deleted");
        Ok(EntityRecord::try_from(row)?)
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: Uuid,
    entity_type: String,
    standard_id: String,
    attributes: Json<Value>,
    created_by: String,
    updated_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntityRow> for EntityRecord {
    type Error = DataError;

    fn try_from(row: EntityRow) -> Result<Self> {
        let entity_type = row
            .entity_type
            .parse::<EntityType>()
            .map_err(|err| DataError::InvalidRow {
                column: "entity_type",
                value: err.value,
            })?;
        let attributes: Attributes = match row.attributes.0 {
            Value::Object(map) => map,
            other => {
                return Err(DataError::InvalidRow {
                    column: "attributes",
                    value: other.to_string(),
                });
            }
        };
        Ok(Self {
            id: row.id,
            standard_id: StandardId::new(row.standard_id),
            entity_type,
            attributes,
            created_by: Actor::new(row.created_by),
            updated_by: Actor::new(row.updated_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn rows_with_unknown_types_are_rejected() {
        let row = EntityRow {
            id: Uuid::nil(),
            entity_type: "campaign".into(),
            standard_id: "campaign--x".into(),
            attributes: Json(json!({})),
            created_by: "alice".into(),
            updated_by: "alice".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let err = EntityRecord::try_from(row).expect_err("unknown type");
        assert!(matches!(err, DataError::InvalidRow { column: "entity_type", .. }));
    }

    #[test]
    fn rows_decode_into_records() {
        let row = EntityRow {
            id: Uuid::nil(),
            entity_type: "label".into(),
            standard_id: "label--x".into(),
            attributes: Json(json!({"value": "apt", "color": "#aabbcc"})),
            created_by: "alice".into(),
            updated_by: "bob".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let record = EntityRecord::try_from(row).expect("decode");
        assert_eq!(record.entity_type, EntityType::Label);
        assert_eq!(record.str_attribute("color"), Some("#aabbcc"));
        assert_eq!(record.updated_by, Actor::new("bob"));
    }

    #[test]
    fn listing_sql_shares_one_predicate() {
        assert!(COUNT_ENTITIES.contains("jsonb_to_recordset"));
        assert!(LIST_ENTITIES.contains("jsonb_to_recordset"));
        assert!(LIST_ENTITIES.ends_with("LIMIT $7 OFFSET $8\n"));
    }
}
