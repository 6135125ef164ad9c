//! The Describer fetches and caches per-object schema, resolving object
//! names with namespace fallback at build time and field names with
//! namespace fallback at lookup time.

use futures::future::join_all;
use indexmap::IndexMap;

use crate::client::{ClientError, SchemaClient};
use crate::error::EngineError;
use crate::model::{FieldDescription, ObjectDescription, ObjectName};
use crate::namespace;

/// Immutable after construction: built once via [`Describer::build`], then
/// only read. No interior mutability, so concurrent reads need no lock.
#[derive(Debug)]
pub struct Describer {
    objects: IndexMap<String, ObjectDescription>,
    default_namespace: Option<String>,
}

impl Describer {
    pub async fn build(
        schema_client: &dyn SchemaClient,
        object_names: &[ObjectName],
        default_namespace: Option<&str>,
    ) -> Result<Self, EngineError> {
        let fetches = object_names
            .iter()
            .map(|name| fetch_one(schema_client, name, default_namespace));
        let results = join_all(fetches).await;

        let mut objects = IndexMap::new();
        for result in results {
            let description = result?;
            objects.insert(description.name.lower().to_string(), description);
        }

        Ok(Self {
            objects,
            default_namespace: default_namespace.map(str::to_string),
        })
    }

    pub fn find_object(&self, name: &str) -> Option<&ObjectDescription> {
        namespace::lookup_map_ci(&self.objects, name, self.default_namespace.as_deref())
    }

    pub fn find_field(&self, object: &str, field: &str) -> Option<&FieldDescription> {
        self.find_object(object)?.field(field, self.default_namespace.as_deref())
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDescription> {
        self.objects.values()
    }
}

async fn fetch_one(
    schema_client: &dyn SchemaClient,
    name: &ObjectName,
    default_namespace: Option<&str>,
) -> Result<ObjectDescription, EngineError> {
    match schema_client.describe(name.as_str()).await {
        Ok(description) => Ok(description),
        Err(ClientError::NotFound) => {
            if let Some(ns) = default_namespace {
                let stripped = namespace::strip(name.as_str(), ns);
                if stripped != name.as_str() {
                    if let Ok(description) = schema_client.describe(&stripped).await {
                        return Ok(description);
                    }
                }
            }
            Err(EngineError::SchemaNotFound(name.clone()))
        }
        Err(ClientError::Transport(message)) => Err(EngineError::Transport(message)),
    }
}
