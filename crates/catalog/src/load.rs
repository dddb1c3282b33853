use crate::{relations, Inner, FIRST_ASSIGNED_ID};
use models::{AttributeCache, Error, Result, SchemaId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Attribute catalog files are named `<schema>_attributes.json`.
pub const ATTRIBUTES_SUFFIX: &str = "_attributes.json";

/// Read the `(schema_name, schema_id)` assignments from the registry table.
pub async fn fetch_assignments(
    pool: &sqlx::PgPool,
    registry_table: &str,
) -> Result<BTreeMap<String, SchemaId>> {
    if !is_safe_ident(registry_table) {
        return Err(Error::validation(format!(
            "registry table name {registry_table:?} is not a valid identifier"
        )));
    }
    let rows: Vec<(String, i16)> = sqlx::query_as(&format!(
        "SELECT schema_name, schema_id FROM {registry_table} ORDER BY schema_name"
    ))
    .fetch_all(pool)
    .await
    .map_err(|err| {
        Error::execution("failed to read schema registry table").with_source(err)
    })?;

    Ok(rows.into_iter().collect())
}

fn is_safe_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Scan `dir` for attribute catalogs and assemble the registry state.
/// With `assigned` ids (from the registry table) those drive membership;
/// otherwise every catalog file defines a schema and ids are assigned
/// from [`FIRST_ASSIGNED_ID`] upward in lexical order.
pub fn load_directory(
    dir: &Path,
    assigned: Option<BTreeMap<String, SchemaId>>,
) -> Result<Inner> {
    let mut found = BTreeSet::new();
    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::validation(format!("cannot read schema directory {}", dir.display()))
            .with_source(err)
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::validation("failed to scan schema directory").with_source(err)
        })?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(schema_name) = file_name.strip_suffix(ATTRIBUTES_SUFFIX) {
            if !schema_name.is_empty() {
                found.insert(schema_name.to_string());
            }
        }
    }

    // Pair each schema with its id. BTree iteration keeps lexical order.
    let with_ids: Vec<(String, SchemaId)> = match assigned {
        Some(assigned) => {
            for name in assigned.keys() {
                if !found.contains(name) {
                    return Err(Error::validation(format!(
                        "registry table names schema {name:?} but {name}{ATTRIBUTES_SUFFIX} \
                         is missing from {}",
                        dir.display()
                    )));
                }
            }
            for name in &found {
                if !assigned.contains_key(name) {
                    tracing::warn!(schema = %name, "catalog file has no registry table entry; skipping");
                }
            }
            assigned.into_iter().collect()
        }
        None => found
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, FIRST_ASSIGNED_ID + i as SchemaId))
            .collect(),
    };

    if with_ids.is_empty() {
        return Err(Error::validation(format!(
            "schema directory {} contains no attribute catalogs",
            dir.display()
        )));
    }

    let mut inner = Inner::default();
    for (schema_name, schema_id) in with_ids {
        let attributes = load_attributes(dir, &schema_name)?;
        tracing::debug!(
            schema = %schema_name,
            id = schema_id,
            attributes = attributes.len(),
            "loaded schema catalog"
        );

        let doc_path = dir.join(format!("{schema_name}.json"));
        if doc_path.is_file() {
            let doc = read_json(&doc_path)?;
            let declared = relations::derive(&schema_name, &doc)?;
            if !declared.is_empty() {
                inner.relations.insert(schema_name.clone(), declared);
            }
            inner.documents.insert(schema_name.clone(), doc);
        }

        inner.by_name.insert(schema_name.clone(), schema_id);
        inner.by_id.insert(schema_id, schema_name);
        inner.attributes.insert(schema_id, attributes);
    }
    Ok(inner)
}

fn load_attributes(dir: &Path, schema_name: &str) -> Result<AttributeCache> {
    let path = dir.join(format!("{schema_name}{ATTRIBUTES_SUFFIX}"));
    let raw = read_json(&path)?;
    let attributes: AttributeCache = serde_json::from_value(raw).map_err(|err| {
        Error::validation(format!("malformed attribute catalog {}", path.display()))
            .with_entity(schema_name)
            .with_source(err)
    })?;

    let mut seen_ids = BTreeSet::new();
    for (attr_name, meta) in &attributes {
        // Attribute names become quoted logical columns downstream, so
        // their character set is pinned at load time.
        if attr_name.is_empty()
            || !attr_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
        {
            return Err(Error::validation(format!(
                "attribute name {attr_name:?} contains unsupported characters"
            ))
            .with_entity(schema_name));
        }
        meta.validate(attr_name)?;
        if !seen_ids.insert(meta.attr_id) {
            return Err(Error::validation(format!(
                "attribute id {} is used twice in schema {schema_name:?}",
                meta.attr_id
            ))
            .with_field(attr_name));
        }
    }
    Ok(attributes)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::validation(format!("cannot read {}", path.display())).with_source(err)
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        Error::validation(format!("{} is not valid JSON", path.display())).with_source(err)
    })
}
