use serde_json::{Map, Value};

/// Filter a document down to the given dotted attribute paths. Paths are
/// trimmed; unknown paths are silently dropped. An empty path list returns
/// the document unchanged.
pub fn project(doc: &Value, attrs: &[String]) -> Value {
    let paths: Vec<Vec<&str>> = attrs
        .iter()
        .map(|attr| attr.trim())
        .filter(|attr| !attr.is_empty())
        .map(|attr| attr.split('.').collect())
        .collect();
    if paths.is_empty() {
        return doc.clone();
    }

    let mut out = Value::Object(Map::new());
    for path in paths {
        if let Some(partial) = project_path(doc, &path) {
            out = union(out, partial);
        }
    }
    out
}

/// Extract the subtree at one path, rebuilt under its enclosing keys.
/// Arrays along the way are traversed element-wise.
fn project_path(node: &Value, path: &[&str]) -> Option<Value> {
    let Some((seg, rest)) = path.split_first() else {
        return Some(node.clone());
    };
    match node {
        Value::Object(map) => {
            let sub = project_path(map.get(*seg)?, rest)?;
            let mut out = Map::new();
            out.insert(seg.to_string(), sub);
            Some(Value::Object(out))
        }
        Value::Array(items) => {
            let projected: Vec<Value> = items
                .iter()
                .filter_map(|item| project_path(item, path))
                .collect();
            if projected.is_empty() {
                None
            } else {
                Some(Value::Array(projected))
            }
        }
        _ => None,
    }
}

/// Union two projected partial trees: objects merge per key, parallel
/// arrays zip element-wise.
fn union(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(mut left), Value::Object(right)) => {
            for (key, value) in right {
                match left.remove(&key) {
                    Some(existing) => {
                        left.insert(key, union(existing, value));
                    }
                    None => {
                        left.insert(key, value);
                    }
                }
            }
            Value::Object(left)
        }
        (Value::Array(left), Value::Array(right)) => {
            let mut items: Vec<Value> = Vec::with_capacity(left.len().max(right.len()));
            let mut right = right.into_iter();
            for l in left {
                match right.next() {
                    Some(r) => items.push(union(l, r)),
                    None => items.push(l),
                }
            }
            items.extend(right);
            Value::Array(items)
        }
        (_, right) => right,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn attrs(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_single_leaf() {
        let doc = json!({"id": "1", "contact": {"name": "A", "phone": "B"}});
        assert_eq!(
            project(&doc, &attrs(&["contact.name"])),
            json!({"contact": {"name": "A"}})
        );
    }

    #[test]
    fn test_multiple_paths_union() {
        let doc = json!({"id": "1", "contact": {"name": "A", "phone": "B"}, "status": "open"});
        assert_eq!(
            project(&doc, &attrs(&["status", "contact.phone"])),
            json!({"status": "open", "contact": {"phone": "B"}})
        );
    }

    #[test]
    fn test_subtree_projection() {
        let doc = json!({"contact": {"name": "A", "phone": "B"}, "status": "open"});
        assert_eq!(
            project(&doc, &attrs(&["contact"])),
            json!({"contact": {"name": "A", "phone": "B"}})
        );
    }

    #[test]
    fn test_arrays_are_traversed() {
        let doc = json!({"jobs": [{"title": "x", "pay": 1}, {"title": "y", "pay": 2}]});
        assert_eq!(
            project(&doc, &attrs(&["jobs.title"])),
            json!({"jobs": [{"title": "x"}, {"title": "y"}]})
        );
        assert_eq!(
            project(&doc, &attrs(&["jobs.title", "jobs.pay"])),
            json!({"jobs": [{"title": "x", "pay": 1}, {"title": "y", "pay": 2}]})
        );
    }

    #[test]
    fn test_unknown_and_blank_paths_dropped() {
        let doc = json!({"a": 1});
        assert_eq!(project(&doc, &attrs(&["nope", "  ", "a "])), json!({"a": 1}));
    }

    #[test]
    fn test_empty_attr_list_returns_unchanged() {
        let doc = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(project(&doc, &[]), doc);
    }
}
