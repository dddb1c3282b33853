//! The hot-tier persistence layer: a capability trait over persistent
//! records, its Postgres implementation, and an in-memory implementation
//! used by tests and embedded callers.

use async_trait::async_trait;
use models::{AttributeCache, PersistentRecord, RecordQuery, Result, ResultPage, SchemaId};
use uuid::Uuid;

pub use sqlgen::TableNames;

mod postgres;
pub use postgres::PgRepository;

mod memory;
pub use memory::MemoryRepository;

mod eval;

/// Capability interface of the hot record store. Backends must keep the
/// change-log contract: every mutation leaves a dirty change-log row until
/// the CDC flusher marks it flushed.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Insert a record: upsert the main row and bulk-insert its EAV rows
    /// in one transaction.
    async fn insert(&self, record: &PersistentRecord) -> Result<()>;

    /// Fetch one fully hydrated record, including soft-deleted ones.
    async fn get(&self, schema_id: SchemaId, row_id: Uuid) -> Result<Option<PersistentRecord>>;

    /// Atomically replace a record's main row and EAV rows.
    async fn update(&self, record: &PersistentRecord) -> Result<()>;

    /// Soft-delete: set `deleted_at` and cascade-remove EAV rows.
    async fn delete(&self, schema_id: SchemaId, row_id: Uuid) -> Result<()>;

    /// Paginated condition query in the requested order. Unflushed
    /// change-log rows are always visible in the result.
    async fn query(
        &self,
        query: &RecordQuery,
        attributes: &AttributeCache,
    ) -> Result<ResultPage<PersistentRecord>>;

    /// Row ids with unflushed mutations, for the cold-tier anti-join.
    async fn dirty_rows(&self, schema_id: SchemaId) -> Result<Vec<Uuid>>;
}
