use crate::{CreateOp, DeleteOp, Entity, EntityManager, UpdateOp};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

/// Result of a batch run. Operations are applied sequentially; a failure
/// is recorded and never aborts its peers. No cross-operation atomicity.
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub successful: Vec<Entity>,
    pub failed: Vec<BatchFailure>,
    pub duration_ms: u64,
}

/// One failed operation within a batch.
#[derive(Debug, Serialize)]
pub struct BatchFailure {
    /// Position of the operation in the submitted batch.
    pub index: usize,
    pub operation: &'static str,
    pub error_code: &'static str,
    pub message: String,
}

impl EntityManager {
    pub async fn batch_create(&self, schema: &str, documents: Vec<Value>) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        for (index, document) in documents.into_iter().enumerate() {
            let op = CreateOp {
                schema: schema.to_string(),
                document,
            };
            match self.create(op).await {
                Ok(entity) => outcome.successful.push(entity),
                Err(err) => outcome.failed.push(BatchFailure {
                    index,
                    operation: "create",
                    error_code: err.code(),
                    message: err.to_string(),
                }),
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    pub async fn batch_update(&self, ops: Vec<UpdateOp>) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        for (index, op) in ops.into_iter().enumerate() {
            match self.update(op).await {
                Ok(entity) => outcome.successful.push(entity),
                Err(err) => outcome.failed.push(BatchFailure {
                    index,
                    operation: "update",
                    error_code: err.code(),
                    message: err.to_string(),
                }),
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    pub async fn batch_delete(&self, ops: Vec<DeleteOp>) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        for (index, op) in ops.into_iter().enumerate() {
            match self.delete(op).await {
                Ok(()) => {}
                Err(err) => outcome.failed.push(BatchFailure {
                    index,
                    operation: "delete",
                    error_code: err.code(),
                    message: err.to_string(),
                }),
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }
}
