//! Request-level orchestration: CRUD over named schemas, paginated and
//! cross-schema queries, relation enrichment, projection, and batch forms.

use catalog::Registry;
use federation::{Coordinator, ExecutionPlan, FederatedRequest};
use models::{
    id, AttributeCache, AttributeOrder, Condition, Error, Page, PersistentRecord, RecordQuery,
    Result, ResultPage, SchemaId,
};
use record::{deep_merge, project, validate_document, Transformer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use store::RecordRepository;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod paths;

mod relations;
pub use relations::{enrich, strip_relation_fields};

mod batch;
pub use batch::{BatchFailure, BatchOutcome};


/// Pagination bounds, from the `query.*` configuration section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 1000,
        }
    }
}

/// A stored entity as callers see it: the enriched, projected document
/// plus its addressing and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    /// Base32-rendered row id.
    pub id: String,
    pub schema: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOp {
    pub schema: String,
    pub document: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetRequest {
    pub schema: String,
    pub id: String,
    #[serde(default)]
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOp {
    pub schema: String,
    pub id: String,
    pub updates: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteOp {
    pub schema: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub schema: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub sort_by: Vec<AttributeOrder>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub items_per_page: u32,
    #[serde(default)]
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrossSchemaRequest {
    pub schemas: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub items_per_page: u32,
    #[serde(default)]
    pub attrs: Vec<String>,
}

/// The engine façade. One instance serves all schemas of a registry.
pub struct EntityManager {
    registry: Arc<Registry>,
    repository: Arc<dyn RecordRepository>,
    coordinator: Option<Coordinator<dyn RecordRepository>>,
    limits: QueryLimits,
}

impl EntityManager {
    pub fn new(
        registry: Arc<Registry>,
        repository: Arc<dyn RecordRepository>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            registry,
            repository,
            coordinator: None,
            limits,
        }
    }

    /// Attach the federated read path.
    pub fn with_coordinator(mut self, coordinator: Coordinator<dyn RecordRepository>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[tracing::instrument(skip_all, fields(schema = %op.schema))]
    pub async fn create(&self, op: CreateOp) -> Result<Entity> {
        let (schema_id, cache) = self.lookup(&op.schema, "create")?;

        let mut doc = op.document;
        strip_relation_fields(&mut doc, &self.registry.relations(&op.schema));
        if let Some(schema_doc) = self.registry.document(&op.schema) {
            validate_document(&schema_doc, &doc)
                .map_err(|err| err.with_operation("create").with_entity(&op.schema))?;
        }

        let row_id = id::new_row_id();
        let now = id::now_ms();
        let transformer = Transformer::new(schema_id, &cache);
        let mut record = transformer
            .to_record(row_id, &doc)
            .map_err(|err| err.with_operation("create").with_entity(&op.schema))?;
        record.created_at = now;
        record.updated_at = now;

        self.repository
            .insert(&record)
            .await
            .map_err(|err| err.with_operation("create").with_entity(&op.schema))?;
        self.to_entity(&op.schema, &transformer, &record, &[])
    }

    #[tracing::instrument(skip_all, fields(schema = %req.schema, id = %req.id))]
    pub async fn get(&self, req: GetRequest) -> Result<Entity> {
        let (schema_id, cache) = self.lookup(&req.schema, "get")?;
        let row_id = parse_id(&req.id)?;

        let record = self
            .repository
            .get(schema_id, row_id)
            .await
            .map_err(|err| err.with_operation("get"))?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| {
                Error::not_found(format!("record {}", req.id))
                    .with_entity(&req.schema)
                    .with_operation("get")
            })?;

        let entities = self
            .hydrate_batch(&req.schema, schema_id, &cache, vec![record], &req.attrs)
            .await?;
        Ok(entities.into_iter().next().expect("one record hydrated"))
    }

    /// Deep-merge `updates` into the stored document: objects merge
    /// recursively, scalars and arrays replace wholesale. `created_at`
    /// and `deleted_at` are preserved.
    #[tracing::instrument(skip_all, fields(schema = %op.schema, id = %op.id))]
    pub async fn update(&self, op: UpdateOp) -> Result<Entity> {
        let (schema_id, cache) = self.lookup(&op.schema, "update")?;
        let row_id = parse_id(&op.id)?;

        let existing = self
            .repository
            .get(schema_id, row_id)
            .await
            .map_err(|err| err.with_operation("update"))?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| {
                Error::not_found(format!("record {}", op.id))
                    .with_entity(&op.schema)
                    .with_operation("update")
            })?;

        let transformer = Transformer::new(schema_id, &cache);
        let existing_doc = transformer.from_record(&existing)?;
        let mut merged = deep_merge(existing_doc, op.updates);
        strip_relation_fields(&mut merged, &self.registry.relations(&op.schema));
        if let Some(schema_doc) = self.registry.document(&op.schema) {
            validate_document(&schema_doc, &merged)
                .map_err(|err| err.with_operation("update").with_entity(&op.schema))?;
        }

        let mut record = transformer
            .to_record(row_id, &merged)
            .map_err(|err| err.with_operation("update").with_entity(&op.schema))?;
        record.created_at = existing.created_at;
        record.deleted_at = existing.deleted_at;
        record.updated_at = id::now_ms();

        self.repository
            .update(&record)
            .await
            .map_err(|err| err.with_operation("update").with_entity(&op.schema))?;
        self.to_entity(&op.schema, &transformer, &record, &[])
    }

    #[tracing::instrument(skip_all, fields(schema = %op.schema, id = %op.id))]
    pub async fn delete(&self, op: DeleteOp) -> Result<()> {
        let (schema_id, _) = self.lookup(&op.schema, "delete")?;
        let row_id = parse_id(&op.id)?;
        self.repository
            .delete(schema_id, row_id)
            .await
            .map_err(|err| err.with_entity(&op.schema))
    }

    #[tracing::instrument(skip_all, fields(schema = %req.schema))]
    pub async fn query(&self, req: QueryRequest) -> Result<ResultPage<Entity>> {
        let (schema_id, cache) = self.lookup(&req.schema, "query")?;
        let page = self.clamp(req.page, req.items_per_page);

        let result = self
            .repository
            .query(
                &RecordQuery {
                    schema_id,
                    condition: req.condition.clone(),
                    order: req.sort_by.clone(),
                    page,
                },
                &cache,
            )
            .await
            .map_err(|err| err.with_operation("query").with_entity(&req.schema))?;

        let records: Vec<PersistentRecord> = result
            .data
            .into_iter()
            .filter(|record| !record.is_deleted())
            .collect();
        let data = self
            .hydrate_batch(&req.schema, schema_id, &cache, records, &req.attrs)
            .await?;
        Ok(ResultPage {
            data,
            total_records: result.total_records,
            total_pages: result.total_pages,
            current_page: result.current_page,
        })
    }

    /// Search several schemas as one paginated stream, consuming offsets
    /// across them in declared order.
    #[tracing::instrument(skip_all, fields(schemas = req.schemas.len()))]
    pub async fn cross_schema_search(
        &self,
        req: CrossSchemaRequest,
    ) -> Result<ResultPage<Entity>> {
        let page = self.clamp(req.page, req.items_per_page);

        // Count pass first, so offsets can be threaded across schemas.
        let mut per_schema: Vec<(String, SchemaId, AttributeCache, u64)> = Vec::new();
        for schema in &req.schemas {
            let (schema_id, cache) = self.lookup(schema, "cross_schema_search")?;
            let count = self
                .repository
                .query(
                    &RecordQuery {
                        schema_id,
                        condition: req.condition.clone(),
                        order: Vec::new(),
                        page: Page {
                            page: 1,
                            items_per_page: 1,
                        },
                    },
                    &cache,
                )
                .await
                .map_err(|err| err.with_operation("cross_schema_search").with_entity(schema))?
                .total_records;
            per_schema.push((schema.clone(), schema_id, cache, count));
        }
        let grand_total: u64 = per_schema.iter().map(|(_, _, _, count)| count).sum();

        let mut remaining_offset = page.offset() as u64;
        let mut need = page.items_per_page as usize;
        let mut data: Vec<Entity> = Vec::new();
        for (schema, schema_id, cache, count) in &per_schema {
            if need == 0 {
                break;
            }
            if remaining_offset >= *count {
                remaining_offset -= count;
                continue;
            }

            let window = remaining_offset as usize + need;
            let result = self
                .repository
                .query(
                    &RecordQuery {
                        schema_id: *schema_id,
                        condition: req.condition.clone(),
                        order: Vec::new(),
                        page: Page {
                            page: 1,
                            items_per_page: window as u32,
                        },
                    },
                    cache,
                )
                .await
                .map_err(|err| err.with_operation("cross_schema_search").with_entity(schema))?;

            let records: Vec<PersistentRecord> = result
                .data
                .into_iter()
                .filter(|record| !record.is_deleted())
                .skip(remaining_offset as usize)
                .take(need)
                .collect();
            remaining_offset = 0;
            need -= records.len();

            let entities = self
                .hydrate_batch(schema, *schema_id, cache, records, &req.attrs)
                .await?;
            data.extend(entities);
        }

        Ok(ResultPage {
            data,
            total_records: grand_total,
            total_pages: grand_total.div_ceil(page.items_per_page.max(1) as u64),
            current_page: page.page,
        })
    }

    /// Federated read across the hot and cold tiers. Requires the
    /// coordinator to be attached.
    pub async fn federated_query(
        &self,
        req: QueryRequest,
        prefer_hot: bool,
        cancel: &CancellationToken,
    ) -> Result<(ResultPage<Entity>, ExecutionPlan)> {
        let Some(coordinator) = &self.coordinator else {
            return Err(Error::validation("columnar tier is not configured")
                .with_operation("federated_query"));
        };
        let (schema_id, cache) = self.lookup(&req.schema, "federated_query")?;
        let page = self.clamp(req.page, req.items_per_page);

        let (result, plan) = coordinator
            .query(
                &FederatedRequest {
                    schema_id,
                    condition: req.condition.clone(),
                    page,
                    prefer_hot,
                },
                &cache,
                cancel,
            )
            .await
            .map_err(|err| err.with_entity(&req.schema))?;

        let data = self
            .hydrate_batch(&req.schema, schema_id, &cache, result.data, &req.attrs)
            .await?;
        Ok((
            ResultPage {
                data,
                total_records: result.total_records,
                total_pages: result.total_pages,
                current_page: result.current_page,
            },
            plan,
        ))
    }

    fn lookup(&self, schema: &str, operation: &'static str) -> Result<(SchemaId, AttributeCache)> {
        self.registry
            .by_name(schema)
            .map_err(|err| err.with_operation(operation))
    }

    fn clamp(&self, page: u32, items_per_page: u32) -> Page {
        let items_per_page = if items_per_page == 0 {
            self.limits.default_page_size
        } else {
            items_per_page
        };
        Page {
            page,
            items_per_page,
        }
        .clamp(self.limits.max_page_size)
    }

    /// Transform, enrich, and project a batch of records from one schema.
    async fn hydrate_batch(
        &self,
        schema: &str,
        schema_id: SchemaId,
        cache: &AttributeCache,
        records: Vec<PersistentRecord>,
        projection: &[String],
    ) -> Result<Vec<Entity>> {
        let transformer = Transformer::new(schema_id, cache);
        let mut docs = Vec::with_capacity(records.len());
        for record in &records {
            docs.push(transformer.from_record(record)?);
        }
        enrich(&self.registry, self.repository.as_ref(), schema, &mut docs).await?;

        Ok(records
            .iter()
            .zip(docs)
            .map(|(record, doc)| Entity {
                id: id::encode_uuid(&record.row_id),
                schema: schema.to_string(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                data: project(&doc, projection),
            })
            .collect())
    }

    fn to_entity(
        &self,
        schema: &str,
        transformer: &Transformer<'_>,
        record: &PersistentRecord,
        projection: &[String],
    ) -> Result<Entity> {
        Ok(Entity {
            id: id::encode_uuid(&record.row_id),
            schema: schema.to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            data: project(&transformer.from_record(record)?, projection),
        })
    }
}

/// Accept base32 or canonical UUID record ids.
fn parse_id(raw: &str) -> Result<Uuid> {
    record::parse_row_id(raw)
        .ok_or_else(|| Error::validation(format!("{raw:?} is not a record id")))
}
