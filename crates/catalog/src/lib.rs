//! Schema registry and metadata cache.
//!
//! Attribute catalogs are loaded once at startup, either from a directory of
//! schema files alone or from a registry table joined with on-disk catalogs.
//! After load the registry performs no further I/O; lookups are served from
//! memory behind a reader/writer lock and always return deep copies.

use models::{AttributeCache, Error, RelationDescriptor, Result, Schema, SchemaId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

mod load;
mod relations;

pub use load::ATTRIBUTES_SUFFIX;

/// First id handed out when a directory is loaded without a registry table.
pub const FIRST_ASSIGNED_ID: SchemaId = 100;

#[derive(Debug, Default)]
struct Inner {
    by_name: BTreeMap<String, SchemaId>,
    by_id: BTreeMap<SchemaId, String>,
    attributes: BTreeMap<SchemaId, AttributeCache>,
    /// Child schema name to its declared relations.
    relations: BTreeMap<String, Vec<RelationDescriptor>>,
    /// Optional JSON-Schema documents, by schema name.
    documents: BTreeMap<String, serde_json::Value>,
}

/// The process-wide schema registry. Immutable after construction.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Load schemas from a directory alone. Every `<name>_attributes.json`
    /// file defines a schema; ids are assigned from [`FIRST_ASSIGNED_ID`]
    /// upward in lexical order of schema name. A `<name>.json` JSON-Schema
    /// document beside it is honored for validation and relations.
    pub fn from_directory(dir: &Path) -> Result<Registry> {
        let inner = load::load_directory(dir, None)?;
        Ok(Registry {
            inner: RwLock::new(inner),
        })
    }

    /// Load schemas named by a registry table in the row store, with
    /// attribute catalogs read from `dir`. The table supplies the stable
    /// name↔id assignment.
    pub async fn from_store(
        pool: &sqlx::PgPool,
        registry_table: &str,
        dir: &Path,
    ) -> Result<Registry> {
        let assigned = load::fetch_assignments(pool, registry_table).await?;
        let inner = load::load_directory(dir, Some(assigned))?;
        Ok(Registry {
            inner: RwLock::new(inner),
        })
    }

    /// Resolve a schema by name, returning its id and a deep copy of its
    /// attribute cache.
    pub fn by_name(&self, name: &str) -> Result<(SchemaId, AttributeCache)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let id = *inner
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("schema {name:?}")).with_entity(name))?;
        Ok((id, inner.attributes[&id].clone()))
    }

    /// Resolve a schema by id, returning its name and a deep copy of its
    /// attribute cache.
    pub fn by_id(&self, id: SchemaId) -> Result<(String, AttributeCache)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let name = inner
            .by_id
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("schema id {id}")))?;
        Ok((name.clone(), inner.attributes[&id].clone()))
    }

    /// All schema names in sorted order.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_name.keys().cloned().collect()
    }

    /// The full [`Schema`] for a name.
    pub fn schema(&self, name: &str) -> Result<Schema> {
        let (schema_id, attributes) = self.by_name(name)?;
        Ok(Schema {
            schema_id,
            schema_name: name.to_string(),
            attributes,
        })
    }

    /// Relations declared by `child_schema`. Empty when none are declared.
    pub fn relations(&self, child_schema: &str) -> Vec<RelationDescriptor> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .relations
            .get(child_schema)
            .cloned()
            .unwrap_or_default()
    }

    /// The JSON-Schema document of a schema, when one was provided.
    pub fn document(&self, name: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.documents.get(name).cloned()
    }
}
