//! Bidirectional conversion between JSON documents and the hybrid
//! [`models::PersistentRecord`] representation, plus the document-level
//! helpers the entity façade builds on: deep merge, projection, and
//! JSON-Schema validation.

mod transform;
pub use transform::{parse_row_id, Transformer};

mod splice;

mod merge;
pub use merge::deep_merge;

mod project;
pub use project::project;

mod validate;
pub use validate::validate_document;
