use serde_json::Value;

/// Deep-merge `update` into `base`: objects merge recursively, while
/// scalars and arrays from the update replace the base value wholesale.
pub fn deep_merge(base: Value, update: Value) -> Value {
    match (base, update) {
        (Value::Object(mut base), Value::Object(update)) => {
            for (key, value) in update {
                match base.remove(&key) {
                    Some(existing) => {
                        base.insert(key, deep_merge(existing, value));
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (_, update) => update,
    }
}
