use models::{Error, Result};
use serde_json::Value;

/// Validate a document against a JSON-Schema document. Pure: both inputs
/// are plain JSON values, and all violations are reported together.
pub fn validate_document(schema: &Value, doc: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|err| Error::validation(format!("schema document is invalid: {err}")))?;

    let violations: Vec<String> = validator
        .iter_errors(doc)
        .map(|err| format!("{}: {err}", err.instance_path))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::validation("document failed schema validation")
            .with_details(serde_json::json!(violations)))
    }
}
