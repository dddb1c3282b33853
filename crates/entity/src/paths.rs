//! Dotted-path helpers over JSON objects, used by relation enrichment and
//! write-payload stripping. These walk object keys only; array traversal
//! belongs to the transformer.

use serde_json::{Map, Value};

/// Read the value at a dotted path.
pub fn get_path<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    let mut node = doc;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Read the value at a dotted path as a join-key string.
pub fn get_path_key(doc: &Value, path: &str) -> Option<String> {
    match get_path(doc, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Write `value` at a dotted path, creating intermediate objects.
/// A non-object in the middle of the path is replaced.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let mut node = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = node.as_object_mut().expect("node forced to an object");
        if i + 1 == segments.len() {
            map.insert(segment.to_string(), value);
            return;
        }
        let next = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            *next = Value::Object(Map::new());
        }
        node = next;
    }
}

/// Remove the value at a dotted path, pruning now-empty parents.
pub fn remove_path(doc: &mut Value, path: &str) {
    fn recurse(node: &mut Value, segments: &[&str]) {
        let Some(map) = node.as_object_mut() else {
            return;
        };
        let Some((segment, rest)) = segments.split_first() else {
            return;
        };
        if rest.is_empty() {
            map.remove(*segment);
            return;
        }
        if let Some(child) = map.get_mut(*segment) {
            recurse(child, rest);
            if child.as_object().is_some_and(|m| m.is_empty()) {
                map.remove(*segment);
            }
        }
    }
    let segments: Vec<&str> = path.split('.').collect();
    recurse(doc, &segments);
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_get_and_key() {
        let doc = json!({"a": {"b": 7}, "s": "x"});
        assert_eq!(get_path(&doc, "a.b"), Some(&json!(7)));
        assert_eq!(get_path(&doc, "a.c"), None);
        assert_eq!(get_path_key(&doc, "a.b"), Some("7".to_string()));
        assert_eq!(get_path_key(&doc, "s"), Some("x".to_string()));
        assert_eq!(get_path_key(&doc, "a"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({"keep": 1});
        set_path(&mut doc, "a.b.c", json!(2));
        assert_eq!(doc, json!({"keep": 1, "a": {"b": {"c": 2}}}));

        set_path(&mut doc, "a.b", json!("flat"));
        assert_eq!(doc, json!({"keep": 1, "a": {"b": "flat"}}));
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let mut doc = json!({"a": {"b": {"c": 1}, "d": 2}});
        remove_path(&mut doc, "a.b.c");
        assert_eq!(doc, json!({"a": {"d": 2}}));
        remove_path(&mut doc, "a.d");
        assert_eq!(doc, json!({}));
        // Unknown paths are a no-op.
        remove_path(&mut doc, "x.y");
        assert_eq!(doc, json!({}));
    }
}
