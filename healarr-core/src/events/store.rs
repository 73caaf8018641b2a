use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{HealarrError, Result};
use crate::types::{AggregateId, Page, PageMeta, Pagination};

use super::{AggregateType, Event, EventType, NewEvent};

/// Filters accepted by `EventStore::query` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub aggregate_type: Option<AggregateType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub event_type_prefix: Option<String>,
}

/// The append-only log plus its read projection (spec §4.1). The trait
/// boundary exists so tests can substitute an in-memory store without a
/// live Postgres instance, mirroring the repository-port split in
/// `ferrex-core::database::repository_ports`.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<i64>;

    async fn history(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>>;

    async fn query(&self, filter: EventFilter, pagination: Pagination) -> Result<Page<Event>>;

    /// Deletes every event for an aggregate id. No tombstoning (spec §4.1
    /// integrity rule): this is a hard delete.
    async fn delete_aggregate(&self, aggregate_id: &AggregateId) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: NewEvent) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO events (aggregate_type, aggregate_id, event_type, payload, version, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(event.aggregate_type.as_str())
        .bind(&event.aggregate_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.version)
        .bind(&event.actor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HealarrError::store_unavailable(e.to_string()))?;

        Ok(row.0)
    }

    async fn history(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, version, created_at, actor_id
            FROM events
            WHERE aggregate_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn query(&self, filter: EventFilter, pagination: Pagination) -> Result<Page<Event>> {
        let aggregate_type = filter.aggregate_type.map(|t| t.as_str().to_string());
        let prefix = filter.event_type_prefix.map(|p| format!("{p}%"));

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events
            WHERE ($1::text IS NULL OR aggregate_type = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
              AND ($4::text IS NULL OR event_type LIKE $4)
            "#,
        )
        .bind(&aggregate_type)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&prefix)
        .fetch_one(&self.pool)
        .await?;

        let data = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, version, created_at, actor_id
            FROM events
            WHERE ($1::text IS NULL OR aggregate_type = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
              AND ($4::text IS NULL OR event_type LIKE $4)
            ORDER BY id ASC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&aggregate_type)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&prefix)
        .bind(pagination.limit as i64)
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            data,
            pagination: PageMeta::new(pagination, total),
        })
    }

    async fn delete_aggregate(&self, aggregate_id: &AggregateId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Row shape of the `corruption_status` projection (spec §3, §4.1). Computed
/// on demand by a query over `events`; implementations are free to
/// materialise it, but correctness (P1–P3) must not depend on caching.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CorruptionStatusRow {
    pub aggregate_id: AggregateId,
    pub current_state: String,
    pub retry_count: i64,
    pub file_path: String,
    pub path_id: Option<i64>,
    pub last_error: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub corruption_type: String,
}

impl CorruptionStatusRow {
    pub fn event_type(&self) -> Option<EventType> {
        super::parse_event_type(&self.current_state)
    }
}

/// `corruption_status` read side, kept distinct from `EventStore` because in
/// practice it is always backed by the same table but queried with a very
/// different access pattern (latest-per-aggregate fold, not per-aggregate
/// history).
#[async_trait]
pub trait ProjectionReader: Send + Sync {
    async fn get(&self, aggregate_id: &AggregateId) -> Result<Option<CorruptionStatusRow>>;

    async fn list(
        &self,
        state_filter: Option<&[EventType]>,
        path_id: Option<i64>,
        sort_column: &str,
        sort_order: &str,
        pagination: Pagination,
    ) -> Result<Page<CorruptionStatusRow>>;
}

#[async_trait]
impl ProjectionReader for PostgresEventStore {
    async fn get(&self, aggregate_id: &AggregateId) -> Result<Option<CorruptionStatusRow>> {
        let row = sqlx::query_as::<_, CorruptionStatusRow>(PROJECTION_BASE_QUERY)
            .bind(aggregate_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list(
        &self,
        state_filter: Option<&[EventType]>,
        path_id: Option<i64>,
        sort_column: &str,
        sort_order: &str,
        pagination: Pagination,
    ) -> Result<Page<CorruptionStatusRow>> {
        let states: Option<Vec<&'static str>> =
            state_filter.map(|states| states.iter().map(|s| s.as_str()).collect());

        // sort_column/sort_order are guaranteed by the caller (healarr_core::query::safe_order_by)
        // to come from a fixed allowlist, never from raw user input.
        let order_clause = format!("ORDER BY {} {}", sort_column, sort_order);

        let count_sql = format!(
            "SELECT COUNT(*) FROM ({}) p WHERE ($1::text[] IS NULL OR p.current_state = ANY($1)) AND ($2::bigint IS NULL OR p.path_id = $2)",
            PROJECTION_SOURCE,
        );
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(&states)
            .bind(path_id)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT * FROM ({}) p WHERE ($1::text[] IS NULL OR p.current_state = ANY($1)) AND ($2::bigint IS NULL OR p.path_id = $2) {} LIMIT $3 OFFSET $4",
            PROJECTION_SOURCE, order_clause,
        );
        let data = sqlx::query_as::<_, CorruptionStatusRow>(&list_sql)
            .bind(&states)
            .bind(path_id)
            .bind(pagination.limit as i64)
            .bind(pagination.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            data,
            pagination: PageMeta::new(pagination, total),
        })
    }
}

/// The projection is logically: for each distinct corruption aggregate id,
/// its latest event's type, the `CorruptionDetected` payload fields, and the
/// min/max timestamps across its history (spec §4.1). The inner query joins
/// every event row for an aggregate against its own latest/first-detected
/// event, so it yields one row *per event*, not per aggregate — all of them
/// carrying identical column values thanks to the `OVER (PARTITION BY
/// aggregate_id)` window functions. `DISTINCT ON (aggregate_id)` collapses
/// those back to one row per aggregate (no `ORDER BY` needed: every
/// candidate row for a given aggregate is already content-identical, so
/// Postgres's arbitrary pick among them is safe), the same guard `get`'s
/// `PROJECTION_BASE_QUERY` already applies for the single-aggregate case.
const PROJECTION_SOURCE: &str = r#"
    SELECT DISTINCT ON (dedup.aggregate_id) dedup.* FROM (
        SELECT
            e.aggregate_id,
            latest.event_type AS current_state,
            COUNT(*) FILTER (WHERE e.event_type IN ('SearchFailed', 'DownloadFailed', 'DeletionFailed', 'VerificationFailed')) OVER (PARTITION BY e.aggregate_id) AS retry_count,
            first_detected.payload->>'file_path' AS file_path,
            NULLIF(first_detected.payload->>'path_id', '')::bigint AS path_id,
            latest.payload->>'error' AS last_error,
            MIN(e.created_at) OVER (PARTITION BY e.aggregate_id) AS detected_at,
            MAX(e.created_at) OVER (PARTITION BY e.aggregate_id) AS last_updated_at,
            first_detected.payload->>'corruption_type' AS corruption_type
        FROM events e
        JOIN LATERAL (
            SELECT event_type, payload FROM events le
            WHERE le.aggregate_id = e.aggregate_id AND le.aggregate_type = 'corruption'
            ORDER BY le.id DESC LIMIT 1
        ) latest ON true
        JOIN LATERAL (
            SELECT payload FROM events fe
            WHERE fe.aggregate_id = e.aggregate_id AND fe.aggregate_type = 'corruption'
              AND fe.event_type = 'CorruptionDetected'
            ORDER BY fe.id ASC LIMIT 1
        ) first_detected ON true
        WHERE e.aggregate_type = 'corruption'
    ) dedup
"#;

const PROJECTION_BASE_QUERY: &str = r#"
    SELECT DISTINCT ON (p.aggregate_id) p.* FROM (
        SELECT
            e.aggregate_id,
            latest.event_type AS current_state,
            COUNT(*) FILTER (WHERE e.event_type IN ('SearchFailed', 'DownloadFailed', 'DeletionFailed', 'VerificationFailed')) OVER (PARTITION BY e.aggregate_id) AS retry_count,
            first_detected.payload->>'file_path' AS file_path,
            NULLIF(first_detected.payload->>'path_id', '')::bigint AS path_id,
            latest.payload->>'error' AS last_error,
            MIN(e.created_at) OVER (PARTITION BY e.aggregate_id) AS detected_at,
            MAX(e.created_at) OVER (PARTITION BY e.aggregate_id) AS last_updated_at,
            first_detected.payload->>'corruption_type' AS corruption_type
        FROM events e
        JOIN LATERAL (
            SELECT event_type, payload FROM events le
            WHERE le.aggregate_id = e.aggregate_id AND le.aggregate_type = 'corruption'
            ORDER BY le.id DESC LIMIT 1
        ) latest ON true
        JOIN LATERAL (
            SELECT payload FROM events fe
            WHERE fe.aggregate_id = e.aggregate_id AND fe.aggregate_type = 'corruption'
              AND fe.event_type = 'CorruptionDetected'
            ORDER BY fe.id ASC LIMIT 1
        ) first_detected ON true
        WHERE e.aggregate_type = 'corruption' AND e.aggregate_id = $1
    ) p
"#;
