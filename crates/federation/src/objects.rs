use models::{Error, Result, SchemaId};
use object_store::aws::AmazonS3Builder;
use object_store::{path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Object-store settings for the columnar snapshot files. Credentials not
/// present here are taken from the ambient environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Render a snapshot path from its template. The template language is a
/// single `{{.SchemaID}}` substitution.
pub fn render_object_path(template: &str, schema_id: SchemaId) -> String {
    template.replace("{{.SchemaID}}", &schema_id.to_string())
}

/// Build the S3-compatible client from configuration plus environment
/// credentials.
pub fn build_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    let store = builder
        .build()
        .map_err(|err| Error::validation("object store configuration is invalid").with_source(err))?;
    Ok(Arc::new(store))
}

/// Best-effort HEAD probe against the snapshot prefix with its own
/// deadline. An absent object still proves the store is reachable.
pub async fn probe_object_store(
    store: &dyn ObjectStore,
    prefix: &str,
    deadline: Duration,
) -> Result<()> {
    let path = Path::from(prefix);
    let head = tokio::time::timeout(deadline, store.head(&path)).await;
    match head {
        Err(_) => Err(Error::timeout(format!(
            "object store probe exceeded {}ms",
            deadline.as_millis()
        ))),
        Ok(Ok(_)) | Ok(Err(object_store::Error::NotFound { .. })) => Ok(()),
        Ok(Err(err)) => Err(Error::execution("object store probe failed").with_source(err)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_render_object_path() {
        assert_eq!(
            render_object_path("snapshots/{{.SchemaID}}/part.parquet", 104),
            "snapshots/104/part.parquet"
        );
        // Templates without the marker pass through unchanged.
        assert_eq!(render_object_path("snapshots/all", 104), "snapshots/all");
    }
}
