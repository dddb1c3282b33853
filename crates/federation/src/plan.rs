use serde::Serialize;

/// Observability record of one federated query execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPlan {
    pub sources: Vec<SourcePlan>,
    /// Condition leaves served by main columns vs all leaves.
    pub pushdown_leaves: usize,
    pub total_leaves: usize,
    pub merge_duration_ms: u64,
    pub merged_rows: usize,
}

/// Per-source timing and row counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourcePlan {
    pub tier: String,
    pub duration_ms: u64,
    pub rows: usize,
    /// Set when the source was skipped or failed and the read degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ExecutionPlan {
    pub fn pushdown_ratio(&self) -> f64 {
        if self.total_leaves == 0 {
            1.0
        } else {
            self.pushdown_leaves as f64 / self.total_leaves as f64
        }
    }
}
