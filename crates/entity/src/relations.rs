//! Single-hop relation enrichment: parent subtrees are inlined into child
//! documents at query time, joined through the declared foreign key.
//! Relations never expand transitively, so cyclic declarations are benign.

use crate::paths::{get_path, get_path_key, remove_path, set_path};
use catalog::Registry;
use models::{Condition, Error, Page, RecordQuery, RelationDescriptor, Result};
use record::Transformer;
use serde_json::Value;
use std::collections::BTreeMap;
use store::RecordRepository;

/// Strip relation-owned child paths from a write payload; the
/// authoritative value lives in the parent only.
pub fn strip_relation_fields(doc: &mut Value, relations: &[RelationDescriptor]) {
    for relation in relations {
        remove_path(doc, &relation.child_path);
    }
}

/// Enrich child documents in place with every relation their schema
/// declares.
pub async fn enrich(
    registry: &Registry,
    repository: &dyn RecordRepository,
    child_schema: &str,
    docs: &mut [Value],
) -> Result<()> {
    for relation in registry.relations(child_schema) {
        enrich_one(registry, repository, &relation, docs).await?;
    }
    Ok(())
}

async fn enrich_one(
    registry: &Registry,
    repository: &dyn RecordRepository,
    relation: &RelationDescriptor,
    docs: &mut [Value],
) -> Result<()> {
    // Bucket children by their foreign-key value.
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, doc) in docs.iter().enumerate() {
        match get_path_key(doc, &relation.foreign_key_attr) {
            Some(fk) => buckets.entry(fk).or_default().push(i),
            None if relation.required => {
                return Err(Error::reference(format!(
                    "record is missing required relation key {}",
                    relation.foreign_key_attr
                ))
                .with_entity(&relation.child_schema)
                .with_field(&relation.foreign_key_attr));
            }
            None => {}
        }
    }
    if buckets.is_empty() {
        return Ok(());
    }

    // One parent fetch per bucket set, as an OR-composite of equalities.
    let (parent_schema_id, parent_attrs) = registry.by_name(&relation.parent_schema)?;
    let mut leaves: Vec<Condition> = buckets
        .keys()
        .map(|fk| Condition::kv(&relation.parent_id_attr, format!("equals:{fk}")))
        .collect();
    let condition = if leaves.len() == 1 {
        leaves.remove(0)
    } else {
        Condition::or(leaves)
    };

    let parents = repository
        .query(
            &RecordQuery {
                schema_id: parent_schema_id,
                condition: Some(condition),
                order: Vec::new(),
                page: Page {
                    page: 1,
                    items_per_page: buckets.len() as u32,
                },
            },
            &parent_attrs,
        )
        .await?;

    // Extract the subtree of each parent, keyed by its id attribute.
    let transformer = Transformer::new(parent_schema_id, &parent_attrs);
    let mut subtrees: BTreeMap<String, Value> = BTreeMap::new();
    for parent in &parents.data {
        if parent.is_deleted() {
            continue;
        }
        let parent_doc = transformer.from_record(parent)?;
        let Some(key) = get_path_key(&parent_doc, &relation.parent_id_attr) else {
            continue;
        };
        let subtree = if relation.parent_path.is_empty() {
            parent_doc
        } else {
            match get_path(&parent_doc, &relation.parent_path) {
                Some(subtree) => subtree.clone(),
                None => continue,
            }
        };
        subtrees.insert(key, subtree);
    }

    for (fk, children) in buckets {
        match subtrees.get(&fk) {
            Some(subtree) => {
                for i in children {
                    set_path(&mut docs[i], &relation.child_path, subtree.clone());
                }
            }
            None if relation.required => {
                return Err(Error::reference(format!(
                    "no {} record with {} = {fk}",
                    relation.parent_schema, relation.parent_id_attr
                ))
                .with_entity(&relation.child_schema)
                .with_field(&relation.foreign_key_attr));
            }
            None => {
                tracing::debug!(
                    parent = %relation.parent_schema,
                    fk = %fk,
                    "relation target missing; leaving child unenriched"
                );
            }
        }
    }
    Ok(())
}
