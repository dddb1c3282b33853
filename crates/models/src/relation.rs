use serde::{Deserialize, Serialize};

/// A declared parent/child relation, derived from a child schema's `$ref`
/// and `x-relation` annotations. Enrichment expands a single hop: the
/// parent subtree at `parent_path` is copied into the child at
/// `child_path`, joined on `foreign_key_attr = parent_id_attr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub child_schema: String,
    /// Dotted path in the child document that receives the parent subtree.
    pub child_path: String,
    pub parent_schema: String,
    /// Dotted path in the parent document to extract.
    pub parent_path: String,
    /// Child attribute holding the parent's key.
    pub foreign_key_attr: String,
    /// Parent attribute matched against the foreign key.
    pub parent_id_attr: String,
    pub required: bool,
}
