//! Splicing of flattened scalars back into a JSON tree.
//!
//! A flattened leaf is addressed by its dotted path segments plus the array
//! positions collected on the way down. The reverse direction is ambiguous
//! for interior segments (an index may belong to the segment itself or to a
//! later one); the rule is: a segment that already exists as a map keeps the
//! indices for later segments, otherwise the segment becomes an array of
//! objects and consumes the next index.

use models::{Error, Result};
use serde_json::{Map, Value};

/// Insert `value` at `segments` under `indices` within `root`.
pub fn splice(
    root: &mut Map<String, Value>,
    segments: &[&str],
    indices: &[usize],
    value: Value,
) -> Result<()> {
    let (seg, rest) = segments
        .split_first()
        .ok_or_else(|| Error::internal("splice requires at least one path segment"))?;

    if rest.is_empty() {
        let slot = root.entry(seg.to_string()).or_insert(Value::Null);
        return place_leaf(slot, indices, value);
    }

    if !root.contains_key(*seg) {
        // A pending index builds an array of objects; otherwise a map.
        let empty = if indices.is_empty() {
            Value::Object(Map::new())
        } else {
            Value::Array(Vec::new())
        };
        root.insert(seg.to_string(), empty);
    }

    match root.get_mut(*seg) {
        Some(Value::Object(map)) => splice(map, rest, indices, value),
        Some(Value::Array(items)) => {
            let Some((&index, remaining)) = indices.split_first() else {
                return Err(conflict(seg));
            };
            splice_into_item(items, index, rest, remaining, value)
        }
        _ => Err(conflict(seg)),
    }
}

fn splice_into_item(
    items: &mut Vec<Value>,
    index: usize,
    segments: &[&str],
    indices: &[usize],
    value: Value,
) -> Result<()> {
    while items.len() <= index {
        items.push(Value::Object(Map::new()));
    }
    match &mut items[index] {
        Value::Object(map) => splice(map, segments, indices, value),
        _ => Err(Error::internal(format!(
            "array position {index} is not an object"
        ))),
    }
}

/// Place a leaf value, nesting any remaining indices as arrays.
fn place_leaf(slot: &mut Value, indices: &[usize], value: Value) -> Result<()> {
    let Some((&index, remaining)) = indices.split_first() else {
        *slot = value;
        return Ok(());
    };
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(items) = slot else {
        return Err(Error::internal("leaf array position occupied by a non-array"));
    };
    while items.len() <= index {
        items.push(Value::Null);
    }
    place_leaf(&mut items[index], remaining, value)
}

fn conflict(segment: &str) -> Error {
    Error::internal(format!(
        "path segment {segment:?} conflicts with an existing value"
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn run(entries: Vec<(&str, Vec<usize>, Value)>) -> Value {
        let mut root = Map::new();
        for (path, indices, value) in entries {
            let segments: Vec<&str> = path.split('.').collect();
            splice(&mut root, &segments, &indices, value).unwrap();
        }
        Value::Object(root)
    }

    #[test]
    fn test_scalar_array() {
        let got = run(vec![
            ("tags", vec![0], json!("a")),
            ("tags", vec![1], json!("b")),
        ]);
        assert_eq!(got, json!({"tags": ["a", "b"]}));
    }

    #[test]
    fn test_array_of_objects() {
        let got = run(vec![
            ("jobs.title", vec![0], json!("x")),
            ("jobs.title", vec![1], json!("y")),
        ]);
        assert_eq!(got, json!({"jobs": [{"title": "x"}, {"title": "y"}]}));
    }

    #[test]
    fn test_existing_map_keeps_indices_for_leaf() {
        // "jobs" is created as a plain object first, so the index attaches
        // to the leaf segment instead.
        let got = run(vec![
            ("jobs.name", vec![], json!("n")),
            ("jobs.title", vec![0], json!("x")),
        ]);
        assert_eq!(got, json!({"jobs": {"name": "n", "title": ["x"]}}));
    }

    #[test]
    fn test_nested_arrays() {
        let got = run(vec![
            ("grid", vec![0, 0], json!(1)),
            ("grid", vec![0, 1], json!(2)),
            ("grid", vec![1, 0], json!(3)),
        ]);
        assert_eq!(got, json!({"grid": [[1, 2], [3]]}));
    }

    #[test]
    fn test_deep_mixed_nesting() {
        let got = run(vec![
            ("teams.members.name", vec![0, 0], json!("ann")),
            ("teams.members.name", vec![0, 1], json!("bob")),
            ("teams.members.name", vec![1, 0], json!("cyd")),
            ("teams.label", vec![0], json!("core")),
        ]);
        assert_eq!(
            got,
            json!({"teams": [
                {"label": "core", "members": [{"name": "ann"}, {"name": "bob"}]},
                {"members": [{"name": "cyd"}]}
            ]})
        );
    }

    #[test]
    fn test_scalar_conflict_is_error() {
        let mut root = Map::new();
        splice(&mut root, &["a"], &[], json!(1)).unwrap();
        let err = splice(&mut root, &["a", "b"], &[], json!(2)).unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Internal);
    }
}
