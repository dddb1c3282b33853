//! The federated read path: fan-out to the hot row store and the cold
//! columnar tier, dirty-row anti-join, and last-write-wins reconciliation.

mod merge;
pub use merge::{merge_by_tier, tier_priority, TierRecords};

mod breaker;
pub use breaker::CircuitBreaker;

mod plan;
pub use plan::{ExecutionPlan, SourcePlan};

mod cold;
pub use cold::{ColumnarEngine, MemoryColumnarEngine};

mod objects;
pub use objects::{build_object_store, probe_object_store, render_object_path, ObjectStoreConfig};

mod coordinator;
pub use coordinator::{Coordinator, FederatedRequest, DEFAULT_MAX_ROWS};
