// Core data model of the strata engine: schemas and their attribute
// metadata, the hybrid persistent record representation, condition trees,
// relation descriptors, and the shared error taxonomy.

mod error;
pub use error::{Error, ErrorKind, Result};

mod schema;
pub use schema::{
    AttrId, AttributeCache, AttributeMetadata, ColumnBinding, ColumnFamily, Encoding, Schema,
    SchemaId, ValueType,
};

mod record;
pub use record::{ChangeLogRow, EavRecord, PersistentRecord, RowKey};

mod condition;
pub use condition::{CompareOp, Condition, Logic};

mod relation;
pub use relation::RelationDescriptor;

mod scalar;
pub use scalar::{ms_to_rfc3339, MainValue, Scalar};

// Row ids are UUID v7 rendered as URL-safe base32 strings.
pub mod id;

mod query;
pub use query::{AttributeOrder, Page, RecordQuery, ResultPage};
