use async_trait::async_trait;
use models::{PersistentRecord, Result, SchemaId};
use sqlgen::{Fragment, SqlValue};
use std::collections::BTreeSet;
use std::sync::RwLock;
use uuid::Uuid;

/// Capability contract of the columnar tier.
///
/// The engine receives the compiled `?`-dialect predicate, with the
/// dirty-row anti-join already appended, and returns hydrated records for
/// the schema. Implementations wrap the predicate in whatever scan their
/// engine runs over the snapshot files.
#[async_trait]
pub trait ColumnarEngine: Send + Sync {
    async fn query(
        &self,
        schema_id: SchemaId,
        predicate: &Fragment,
        max_rows: usize,
    ) -> Result<Vec<PersistentRecord>>;

    /// Best-effort health probe of the engine and its snapshot storage.
    async fn probe(&self) -> Result<()>;
}

/// Test double for the columnar tier: serves seeded records, honoring the
/// `row_id NOT IN` suffix of the predicate. The condition itself is not
/// evaluated; seed only rows the condition would select.
#[derive(Default)]
pub struct MemoryColumnarEngine {
    records: RwLock<Vec<PersistentRecord>>,
}

impl MemoryColumnarEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, records: Vec<PersistentRecord>) {
        let mut held = self.records.write().expect("cold seed lock poisoned");
        held.extend(records);
    }

    /// Row ids excluded by the anti-join suffix, parsed from the trailing
    /// placeholders of the predicate.
    fn excluded_rows(predicate: &Fragment) -> BTreeSet<Uuid> {
        let Some(suffix) = predicate.sql.split("row_id NOT IN (").nth(1) else {
            return BTreeSet::new();
        };
        let placeholders = suffix.bytes().filter(|b| *b == b'?').count();
        predicate.args[predicate.args.len() - placeholders..]
            .iter()
            .filter_map(|arg| match arg {
                SqlValue::Text(raw) => Uuid::parse_str(raw).ok(),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ColumnarEngine for MemoryColumnarEngine {
    async fn query(
        &self,
        schema_id: SchemaId,
        predicate: &Fragment,
        max_rows: usize,
    ) -> Result<Vec<PersistentRecord>> {
        let excluded = Self::excluded_rows(predicate);
        let held = self.records.read().expect("cold seed lock poisoned");
        Ok(held
            .iter()
            .filter(|record| {
                record.schema_id == schema_id && !excluded.contains(&record.row_id)
            })
            .take(max_rows)
            .cloned()
            .collect())
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::AttributeCache;
    use sqlgen::build_cold_predicate;

    #[tokio::test]
    async fn test_memory_engine_honors_anti_join() {
        let engine = MemoryColumnarEngine::new();
        let stale = PersistentRecord::new(100, Uuid::from_u128(1));
        let kept = PersistentRecord::new(100, Uuid::from_u128(2));
        let other_schema = PersistentRecord::new(101, Uuid::from_u128(3));
        engine.seed(vec![stale.clone(), kept.clone(), other_schema]);

        let attributes = AttributeCache::new();
        let predicate = build_cold_predicate(None, &attributes, &[stale.row_id]).unwrap();

        let rows = engine.query(100, &predicate, 1000).await.unwrap();
        assert_eq!(rows, vec![kept]);
    }
}
