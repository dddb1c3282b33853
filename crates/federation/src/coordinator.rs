use crate::{
    merge_by_tier, CircuitBreaker, ColumnarEngine, ExecutionPlan, SourcePlan, TierRecords,
};
use models::{
    AttributeCache, Condition, Error, Page, PersistentRecord, RecordQuery, Result, ResultPage,
    SchemaId,
};
use sqlgen::{build_cold_predicate, pushdown_stats, Fragment};
use std::sync::Arc;
use std::time::Instant;
use store::RecordRepository;
use tokio_util::sync::CancellationToken;

/// Per-source fetch cap keeping merges bounded.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// One federated read. Results are ordered by `(schema_id, row_id)`; the
/// page window applies to the merged, reconciled set.
#[derive(Debug, Clone)]
pub struct FederatedRequest {
    pub schema_id: SchemaId,
    pub condition: Option<Condition>,
    pub page: Page,
    /// Break exact ties toward the hot tier (vs the stable tiers).
    pub prefer_hot: bool,
}

enum ColdOutcome {
    Rows(Vec<PersistentRecord>),
    Skipped(String),
}

/// Fans queries out to the hot repository and the cold columnar engine,
/// excludes dirty rows from the cold side, and reconciles the tiers with
/// last-write-wins.
pub struct Coordinator<R: ?Sized> {
    repository: Arc<R>,
    cold: Option<Arc<dyn ColumnarEngine>>,
    breaker: CircuitBreaker,
    max_rows: usize,
}

impl<R: RecordRepository + ?Sized> Coordinator<R> {
    pub fn new(repository: Arc<R>, cold: Option<Arc<dyn ColumnarEngine>>) -> Self {
        Self {
            repository,
            cold,
            breaker: CircuitBreaker::default(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Probe the cold engine, when one is configured.
    pub async fn probe_cold(&self) -> Option<Result<()>> {
        match &self.cold {
            Some(engine) => Some(engine.probe().await),
            None => None,
        }
    }

    /// Execute a federated read.
    ///
    /// The hot tier is queried through the repository (dirty rows are
    /// always visible there); the cold tier receives the `?`-dialect
    /// predicate with the dirty-row anti-join appended, so a row with an
    /// unflushed mutation can only be represented by its hot version.
    /// Tombstones win reconciliation and are then dropped from the page.
    #[tracing::instrument(skip_all, fields(schema_id = request.schema_id))]
    pub async fn query(
        &self,
        request: &FederatedRequest,
        attributes: &AttributeCache,
        cancel: &CancellationToken,
    ) -> Result<(ResultPage<PersistentRecord>, ExecutionPlan)> {
        let mut plan = ExecutionPlan::default();
        if let Some(condition) = &request.condition {
            let stats = pushdown_stats(condition, attributes)?;
            plan.pushdown_leaves = stats.pushdown_leaves;
            plan.total_leaves = stats.total_leaves;
        }

        let dirty = self.repository.dirty_rows(request.schema_id).await?;
        let cold_predicate =
            build_cold_predicate(request.condition.as_ref(), attributes, &dirty)?;

        let hot_query = RecordQuery {
            schema_id: request.schema_id,
            condition: request.condition.clone(),
            order: Vec::new(),
            page: Page {
                page: 1,
                items_per_page: self.max_rows as u32,
            },
        };

        let hot_fut = async {
            let started = Instant::now();
            let result = self.repository.query(&hot_query, attributes).await;
            (started.elapsed(), result)
        };
        let cold_fut = async {
            let started = Instant::now();
            let outcome = self
                .cold_rows(request.schema_id, &cold_predicate)
                .await;
            (started.elapsed(), outcome)
        };

        let ((hot_elapsed, hot_result), (cold_elapsed, cold_outcome)) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::timeout("federated query cancelled")
                    .with_operation("federated_query"));
            }
            results = async { tokio::join!(hot_fut, cold_fut) } => results,
        };

        let hot_page = hot_result?;
        plan.sources.push(SourcePlan {
            tier: "hot".to_string(),
            duration_ms: hot_elapsed.as_millis() as u64,
            rows: hot_page.data.len(),
            degraded: None,
        });

        let mut inputs = TierRecords::new();
        inputs.insert("hot".to_string(), hot_page.data);
        match cold_outcome {
            ColdOutcome::Rows(rows) => {
                plan.sources.push(SourcePlan {
                    tier: "cold".to_string(),
                    duration_ms: cold_elapsed.as_millis() as u64,
                    rows: rows.len(),
                    degraded: None,
                });
                inputs.insert("cold".to_string(), rows);
            }
            ColdOutcome::Skipped(reason) => {
                plan.sources.push(SourcePlan {
                    tier: "cold".to_string(),
                    duration_ms: cold_elapsed.as_millis() as u64,
                    rows: 0,
                    degraded: Some(reason),
                });
            }
        }

        let merge_started = Instant::now();
        let merged = merge_by_tier(inputs, request.prefer_hot);
        let visible: Vec<PersistentRecord> =
            merged.into_iter().filter(|r| !r.is_deleted()).collect();
        plan.merge_duration_ms = merge_started.elapsed().as_millis() as u64;
        plan.merged_rows = visible.len();

        let total = visible.len() as u64;
        let data: Vec<PersistentRecord> = visible
            .into_iter()
            .skip(request.page.offset().max(0) as usize)
            .take(request.page.limit() as usize)
            .collect();
        Ok((ResultPage::new(data, total, &request.page), plan))
    }

    async fn cold_rows(&self, schema_id: SchemaId, predicate: &Fragment) -> ColdOutcome {
        let Some(engine) = &self.cold else {
            return ColdOutcome::Skipped("columnar tier disabled".to_string());
        };
        if !self.breaker.allow() {
            return ColdOutcome::Skipped("circuit open".to_string());
        }
        match engine.query(schema_id, predicate, self.max_rows).await {
            Ok(rows) => {
                self.breaker.record_success();
                ColdOutcome::Rows(rows)
            }
            Err(err) => {
                self.breaker.record_failure();
                tracing::warn!(error = %err, "cold tier query failed; degrading to hot-only");
                ColdOutcome::Skipped(format!("cold query failed: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MemoryColumnarEngine;
    use async_trait::async_trait;
    use models::{AttributeMetadata, ValueType};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use store::MemoryRepository;
    use uuid::Uuid;

    fn attributes() -> AttributeCache {
        [(
            "notes".to_string(),
            AttributeMetadata {
                attr_id: 20,
                value_type: ValueType::Text,
                binding: None,
            },
        )]
        .into_iter()
        .collect()
    }

    fn record(row: u128, updated_at: i64, marker: &str) -> PersistentRecord {
        let mut record = PersistentRecord::new(100, Uuid::from_u128(row));
        record.created_at = 1;
        record.updated_at = updated_at;
        record.other_attributes.push(models::EavRecord {
            schema_id: 100,
            row_id: record.row_id,
            attr_id: 20,
            array_indices: String::new(),
            value_text: Some(marker.to_string()),
            value_numeric: None,
        });
        record
    }

    fn request() -> FederatedRequest {
        FederatedRequest {
            schema_id: 100,
            condition: None,
            page: Page {
                page: 1,
                items_per_page: 100,
            },
            prefer_hot: true,
        }
    }

    fn marker(record: &PersistentRecord) -> &str {
        record.other_attributes[0].value_text.as_deref().unwrap()
    }

    #[tokio::test]
    async fn test_dirty_rows_never_come_from_cold() {
        let repository = Arc::new(MemoryRepository::new());
        let cold = Arc::new(MemoryColumnarEngine::new());

        // The hot mutation is unflushed; the cold tier still holds stale
        // values for the same row.
        let fresh = record(1, 200, "fresh");
        repository.insert(&fresh).await.unwrap();
        cold.seed(vec![record(1, 999, "stale")]);

        let coordinator = Coordinator::new(repository, Some(cold));
        let (result, plan) = coordinator
            .query(&request(), &attributes(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.data.len(), 1);
        assert_eq!(marker(&result.data[0]), "fresh");
        assert_eq!(plan.sources.len(), 2);
        assert_eq!(plan.sources[1].rows, 0);
    }

    #[tokio::test]
    async fn test_flushed_rows_reconcile_by_lww() {
        let repository = Arc::new(MemoryRepository::new());
        let cold = Arc::new(MemoryColumnarEngine::new());

        let hot = record(1, 100, "hot");
        repository.insert(&hot).await.unwrap();
        repository.mark_flushed(100, hot.row_id, 150);
        cold.seed(vec![record(1, 200, "cold-newer"), record(2, 50, "cold-only")]);

        let coordinator = Coordinator::new(repository, Some(cold));
        let (result, plan) = coordinator
            .query(&request(), &attributes(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_records, 2);
        assert_eq!(marker(&result.data[0]), "cold-newer");
        assert_eq!(marker(&result.data[1]), "cold-only");
        assert_eq!(plan.merged_rows, 2);
    }

    #[tokio::test]
    async fn test_page_window_applies_to_merged_set() {
        let repository = Arc::new(MemoryRepository::new());
        for i in 0..5 {
            repository.insert(&record(i, 100, "hot")).await.unwrap();
        }
        let coordinator = Coordinator::new(repository, None);

        let mut req = request();
        req.page = Page {
            page: 2,
            items_per_page: 2,
        };
        let (result, _) = coordinator
            .query(&req, &attributes(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.total_records, 5);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].row_id, Uuid::from_u128(2));
    }

    struct FailingEngine;

    #[async_trait]
    impl ColumnarEngine for FailingEngine {
        async fn query(
            &self,
            _schema_id: SchemaId,
            _predicate: &Fragment,
            _max_rows: usize,
        ) -> Result<Vec<PersistentRecord>> {
            Err(Error::execution("boom"))
        }
        async fn probe(&self) -> Result<()> {
            Err(Error::execution("boom"))
        }
    }

    #[tokio::test]
    async fn test_cold_failures_degrade_and_open_circuit() {
        let repository = Arc::new(MemoryRepository::new());
        repository.insert(&record(1, 100, "hot")).await.unwrap();

        let coordinator = Coordinator::new(repository, Some(Arc::new(FailingEngine)))
            .with_breaker(CircuitBreaker::new(
                2,
                Duration::from_secs(60),
                Duration::from_secs(60),
            ));

        for expected in [
            "cold query failed: E_EXECUTION: boom",
            "cold query failed: E_EXECUTION: boom",
            "circuit open",
        ] {
            let (result, plan) = coordinator
                .query(&request(), &attributes(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(result.data.len(), 1);
            assert_eq!(plan.sources[1].degraded.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_promptly() {
        let repository = Arc::new(MemoryRepository::new());
        let coordinator = Coordinator::new(repository, None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coordinator
            .query(&request(), &attributes(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Timeout);
    }
}
