//! Relation derivation from JSON-Schema documents.
//!
//! A property subschema carrying an `x-relation` annotation declares that
//! the property is populated from a parent schema at read time. The parent
//! schema defaults to the basename of a sibling `$ref`; the annotation may
//! override it and names the join attributes:
//!
//! ```json
//! "manager": {
//!   "$ref": "person.json#/$defs/summary",
//!   "x-relation": {"foreignKey": "manager_id", "parentID": "id", "path": "summary"}
//! }
//! ```

use models::{Error, RelationDescriptor, Result};
use serde_json::Value;

/// Walk a schema document and collect every declared relation.
pub fn derive(child_schema: &str, doc: &Value) -> Result<Vec<RelationDescriptor>> {
    let mut out = Vec::new();
    if let Some(properties) = doc.get("properties") {
        let required = required_set(doc);
        walk_properties(child_schema, properties, &required, "", &mut out)?;
    }
    Ok(out)
}

fn required_set(node: &Value) -> Vec<String> {
    node.get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn walk_properties(
    child_schema: &str,
    properties: &Value,
    required: &[String],
    prefix: &str,
    out: &mut Vec<RelationDescriptor>,
) -> Result<()> {
    let Some(properties) = properties.as_object() else {
        return Ok(());
    };
    for (name, subschema) in properties {
        let child_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        if let Some(annotation) = subschema.get("x-relation") {
            out.push(parse_relation(
                child_schema,
                &child_path,
                subschema,
                annotation,
                required.iter().any(|r| r == name),
            )?);
        }

        if let Some(nested) = subschema.get("properties") {
            let nested_required = required_set(subschema);
            walk_properties(child_schema, nested, &nested_required, &child_path, out)?;
        }
    }
    Ok(())
}

fn parse_relation(
    child_schema: &str,
    child_path: &str,
    subschema: &Value,
    annotation: &Value,
    required_by_schema: bool,
) -> Result<RelationDescriptor> {
    let annotation = annotation.as_object().ok_or_else(|| {
        Error::validation(format!(
            "x-relation at {child_path:?} must be an object"
        ))
        .with_entity(child_schema)
    })?;

    let foreign_key_attr = annotation
        .get("foreignKey")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::validation(format!(
                "x-relation at {child_path:?} is missing foreignKey"
            ))
            .with_entity(child_schema)
        })?;

    let parent_schema = match annotation.get("schema").and_then(Value::as_str) {
        Some(schema) => schema.to_string(),
        None => ref_basename(subschema).ok_or_else(|| {
            Error::validation(format!(
                "x-relation at {child_path:?} names no schema and has no $ref"
            ))
            .with_entity(child_schema)
        })?,
    };

    Ok(RelationDescriptor {
        child_schema: child_schema.to_string(),
        child_path: child_path.to_string(),
        parent_schema,
        parent_path: annotation
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        foreign_key_attr: foreign_key_attr.to_string(),
        parent_id_attr: annotation
            .get("parentID")
            .and_then(Value::as_str)
            .unwrap_or("id")
            .to_string(),
        required: required_by_schema
            || annotation
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false),
    })
}

/// `"company.json#/$defs/summary"` names the parent schema `company`.
/// A bare fragment (`"#/$defs/x"`) refers to the document itself.
fn ref_basename(subschema: &Value) -> Option<String> {
    let reference = subschema.get("$ref")?.as_str()?;
    let path = reference.split('#').next()?;
    let file = path.rsplit('/').next()?;
    let name = file.strip_suffix(".json").unwrap_or(file);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_from_ref_and_annotation() {
        let doc = json!({
            "type": "object",
            "required": ["employer"],
            "properties": {
                "name": {"type": "string"},
                "employer": {
                    "$ref": "company.json#/$defs/summary",
                    "x-relation": {"foreignKey": "employer_id", "path": "summary"}
                },
                "contact": {
                    "type": "object",
                    "properties": {
                        "region": {
                            "x-relation": {
                                "schema": "region",
                                "foreignKey": "contact.region_code",
                                "parentID": "code"
                            }
                        }
                    }
                }
            }
        });

        let relations = derive("person", &doc).unwrap();
        assert_eq!(relations.len(), 2);

        let employer = relations
            .iter()
            .find(|r| r.child_path == "employer")
            .unwrap();
        assert_eq!(employer.child_path, "employer");
        assert_eq!(employer.parent_schema, "company");
        assert_eq!(employer.parent_path, "summary");
        assert_eq!(employer.foreign_key_attr, "employer_id");
        assert_eq!(employer.parent_id_attr, "id");
        assert!(employer.required);

        let region = relations
            .iter()
            .find(|r| r.child_path == "contact.region")
            .unwrap();
        assert_eq!(region.child_path, "contact.region");
        assert_eq!(region.parent_schema, "region");
        assert_eq!(region.parent_id_attr, "code");
        assert!(!region.required);
    }

    #[test]
    fn test_missing_foreign_key_fails() {
        let doc = json!({
            "properties": {
                "employer": {"x-relation": {"schema": "company"}}
            }
        });
        let err = derive("person", &doc).unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Validation);
    }
}
