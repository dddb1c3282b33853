use crate::{eval, RecordRepository};
use async_trait::async_trait;
use models::{
    id, AttributeCache, ChangeLogRow, Error, PersistentRecord, RecordQuery, Result, ResultPage,
    RowKey, SchemaId,
};
use sqlgen::resolve_sort;
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

/// An in-memory [`RecordRepository`]: the reference backend for tests and
/// embedded callers. It mirrors the Postgres implementation's semantics,
/// including change-log visibility of unflushed mutations.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    records: BTreeMap<RowKey, PersistentRecord>,
    change_log: BTreeMap<RowKey, ChangeLogRow>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the external CDC flusher: mark a change-log row as
    /// rolled into the columnar tier.
    pub fn mark_flushed(&self, schema_id: SchemaId, row_id: Uuid, flushed_at: i64) {
        let mut state = self.state.write().expect("memory store lock poisoned");
        if let Some(row) = state.change_log.get_mut(&RowKey { schema_id, row_id }) {
            row.flushed_at = flushed_at;
        }
    }

    /// The change-log row of a record, for contract assertions in tests.
    pub fn change_log_row(&self, schema_id: SchemaId, row_id: Uuid) -> Option<ChangeLogRow> {
        let state = self.state.read().expect("memory store lock poisoned");
        state.change_log.get(&RowKey { schema_id, row_id }).cloned()
    }

    fn store(&self, record: &PersistentRecord) {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let key = record.key();
        state.records.insert(key, record.clone());
        state.change_log.insert(
            key,
            ChangeLogRow {
                schema_id: record.schema_id,
                row_id: record.row_id,
                changed_at: record.updated_at,
                deleted_at: record.deleted_at,
                flushed_at: 0,
            },
        );
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn insert(&self, record: &PersistentRecord) -> Result<()> {
        self.store(record);
        Ok(())
    }

    async fn get(&self, schema_id: SchemaId, row_id: Uuid) -> Result<Option<PersistentRecord>> {
        let state = self.state.read().expect("memory store lock poisoned");
        Ok(state.records.get(&RowKey { schema_id, row_id }).cloned())
    }

    async fn update(&self, record: &PersistentRecord) -> Result<()> {
        self.store(record);
        Ok(())
    }

    async fn delete(&self, schema_id: SchemaId, row_id: Uuid) -> Result<()> {
        let now = id::now_ms();
        let mut state = self.state.write().expect("memory store lock poisoned");
        let key = RowKey { schema_id, row_id };
        let Some(record) = state.records.get_mut(&key) else {
            return Err(Error::not_found(format!("record {row_id}")).with_operation("delete"));
        };
        let deleted_at = *record.deleted_at.get_or_insert(now);
        record.other_attributes.clear();

        state.change_log.insert(
            key,
            ChangeLogRow {
                schema_id,
                row_id,
                changed_at: now,
                deleted_at: Some(deleted_at),
                flushed_at: 0,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        query: &RecordQuery,
        attributes: &AttributeCache,
    ) -> Result<ResultPage<PersistentRecord>> {
        let sort = resolve_sort(&query.order, attributes)?;
        let state = self.state.read().expect("memory store lock poisoned");

        let mut anchored: BTreeMap<RowKey, PersistentRecord> = BTreeMap::new();
        for (key, record) in &state.records {
            if key.schema_id != query.schema_id || record.is_deleted() {
                continue;
            }
            let hit = match &query.condition {
                Some(condition) => eval::matches(condition, record, attributes)?,
                None => true,
            };
            if hit {
                anchored.insert(*key, record.clone());
            }
        }
        // Unflushed mutations are always visible.
        for (key, log_row) in &state.change_log {
            if key.schema_id == query.schema_id && log_row.is_dirty() {
                if let Some(record) = state.records.get(key) {
                    anchored.entry(*key).or_insert_with(|| record.clone());
                }
            }
        }
        drop(state);

        let mut records: Vec<PersistentRecord> = anchored.into_values().collect();
        eval::sort_records(&mut records, &sort);

        let total = records.len() as u64;
        let data: Vec<PersistentRecord> = records
            .into_iter()
            .skip(query.page.offset().max(0) as usize)
            .take(query.page.limit() as usize)
            .collect();
        Ok(ResultPage::new(data, total, &query.page))
    }

    async fn dirty_rows(&self, schema_id: SchemaId) -> Result<Vec<Uuid>> {
        let state = self.state.read().expect("memory store lock poisoned");
        Ok(state
            .change_log
            .iter()
            .filter(|(key, row)| key.schema_id == schema_id && row.is_dirty())
            .map(|(key, _)| key.row_id)
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{AttributeMetadata, ColumnBinding, Condition, Encoding, Page, ValueType};
    use pretty_assertions::assert_eq;

    fn attributes() -> AttributeCache {
        [
            (
                "name",
                AttributeMetadata {
                    attr_id: 1,
                    value_type: ValueType::Text,
                    binding: Some(ColumnBinding {
                        col_name: "text_01".to_string(),
                        encoding: Encoding::Default,
                    }),
                },
            ),
            (
                "age",
                AttributeMetadata {
                    attr_id: 2,
                    value_type: ValueType::Integer,
                    binding: None,
                },
            ),
        ]
        .into_iter()
        .map(|(name, meta)| (name.to_string(), meta))
        .collect()
    }

    fn record(row_id: u128, name: &str, age: f64) -> PersistentRecord {
        let mut record = PersistentRecord::new(100, Uuid::from_u128(row_id));
        record.created_at = 1;
        record.updated_at = 1;
        record
            .text_items
            .insert("text_01".to_string(), name.to_string());
        record.other_attributes.push(models::EavRecord {
            schema_id: 100,
            row_id: record.row_id,
            attr_id: 2,
            array_indices: String::new(),
            value_text: None,
            value_numeric: Some(age),
        });
        record
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let repo = MemoryRepository::new();
        let record = record(1, "Alice", 30.0);
        repo.insert(&record).await.unwrap();

        let fetched = repo.get(100, record.row_id).await.unwrap().unwrap();
        assert_eq!(fetched, record);

        repo.delete(100, record.row_id).await.unwrap();
        let fetched = repo.get(100, record.row_id).await.unwrap().unwrap();
        assert!(fetched.is_deleted());
        assert!(fetched.other_attributes.is_empty());

        // Deleting a missing record is NotFound.
        let err = repo.delete(100, Uuid::from_u128(99)).await.unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_mutations_leave_dirty_change_log_rows() {
        let repo = MemoryRepository::new();
        let record = record(1, "Alice", 30.0);
        repo.insert(&record).await.unwrap();
        assert_eq!(repo.dirty_rows(100).await.unwrap(), vec![record.row_id]);

        repo.mark_flushed(100, record.row_id, 500);
        assert!(repo.dirty_rows(100).await.unwrap().is_empty());

        // A new mutation dirties the row again.
        repo.update(&record).await.unwrap();
        assert_eq!(repo.dirty_rows(100).await.unwrap(), vec![record.row_id]);
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_paginates() {
        let repo = MemoryRepository::new();
        let attributes = attributes();
        for (i, (name, age)) in [("Carol", 41.0), ("Alice", 30.0), ("Bob", 35.0), ("Al", 20.0)]
            .iter()
            .enumerate()
        {
            repo.insert(&record(i as u128 + 1, name, *age)).await.unwrap();
        }

        let query = RecordQuery {
            schema_id: 100,
            condition: Some(Condition::kv("name", "starts_with:Al")),
            order: vec![models::AttributeOrder {
                attr: "age".to_string(),
                descending: true,
            }],
            page: Page {
                page: 1,
                items_per_page: 10,
            },
        };
        let result = repo.query(&query, &attributes).await.unwrap();
        assert_eq!(result.total_records, 2);
        assert_eq!(
            result
                .data
                .iter()
                .map(|r| r.text_items["text_01"].as_str())
                .collect::<Vec<_>>(),
            vec!["Alice", "Al"]
        );

        // Second page of one-per-page slicing.
        let query = RecordQuery {
            page: Page {
                page: 2,
                items_per_page: 1,
            },
            ..query
        };
        let result = repo.query(&query, &attributes).await.unwrap();
        assert_eq!(result.total_records, 2);
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].text_items["text_01"], "Al");
    }

    #[tokio::test]
    async fn test_dirty_rows_stay_visible_in_queries() {
        let repo = MemoryRepository::new();
        let attributes = attributes();
        let mut r = record(1, "Zed", 50.0);
        repo.insert(&r).await.unwrap();
        repo.delete(100, r.row_id).await.unwrap();

        // The tombstone is dirty, so the row still surfaces.
        let query = RecordQuery::new(100);
        let result = repo.query(&query, &attributes).await.unwrap();
        assert_eq!(result.total_records, 1);
        assert!(result.data[0].is_deleted());

        // Once flushed, it disappears from hot reads.
        repo.mark_flushed(100, r.row_id, 999);
        let result = repo.query(&query, &attributes).await.unwrap();
        assert_eq!(result.total_records, 0);

        // A fresh record filtered out by the condition still appears
        // while dirty.
        r.row_id = Uuid::from_u128(2);
        repo.insert(&r).await.unwrap();
        let query = RecordQuery {
            condition: Some(Condition::kv("name", "equals:NoSuch")),
            ..RecordQuery::new(100)
        };
        let result = repo.query(&query, &attributes).await.unwrap();
        assert_eq!(result.total_records, 1);
    }
}
