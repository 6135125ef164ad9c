//! Concrete `SchemaClient`/`DataClient` implementations. `HttpClient` talks
//! to a real record-management service over JSON; `fake::FakeClient` is an
//! in-memory stand-in for wiring tests and local experimentation.

use std::time::Duration;

use async_trait::async_trait;
use engine::{ClientError, CreateResult, DataClient, FieldDescription, FieldType, ObjectDescription, ObjectName, QueryOptions, Record, SchemaClient};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            bearer_token: String::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct HttpClient {
    http: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct WireFieldDescription {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    createable: bool,
    #[serde(default)]
    reference_to: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireObjectDescription {
    name: String,
    fields: Vec<WireFieldDescription>,
}

fn parse_field_type(raw: &str) -> FieldType {
    match raw.to_ascii_lowercase().as_str() {
        "id" => FieldType::Id,
        "reference" => FieldType::Reference,
        "int" | "integer" => FieldType::Int,
        "double" | "number" => FieldType::Double,
        "currency" => FieldType::Currency,
        "percent" => FieldType::Percent,
        "date" => FieldType::Date,
        "datetime" => FieldType::DateTime,
        "boolean" => FieldType::Boolean,
        other => FieldType::Other(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    fields: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orderby: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct CreateResultWire {
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

async fn map_transport_error(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }
    response.error_for_status().map_err(|e| ClientError::Transport(e.to_string()))
}

#[async_trait]
impl SchemaClient for HttpClient {
    async fn describe(&self, object: &str) -> Result<ObjectDescription, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("services/data/objects/{object}/describe")))
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = map_transport_error(response).await?;
        let wire: WireObjectDescription = response.json().await.map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(ObjectDescription {
            name: ObjectName::new(wire.name),
            fields: wire
                .fields
                .into_iter()
                .map(|f| FieldDescription {
                    name: f.name,
                    field_type: parse_field_type(&f.field_type),
                    createable: f.createable,
                    reference_to: f.reference_to.into_iter().map(ObjectName::new).collect(),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl DataClient for HttpClient {
    async fn query(&self, object: &str, options: QueryOptions) -> Result<Vec<Record>, ClientError> {
        let request = QueryRequest {
            fields: &options.fields,
            condition: options.condition.as_deref(),
            orderby: options.orderby.as_deref(),
            limit: options.limit,
            offset: options.offset,
            scope: options.scope.as_deref(),
        };
        let response = self
            .http
            .post(self.url(&format!("services/data/objects/{object}/query")))
            .bearer_auth(&self.config.bearer_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = map_transport_error(response).await?;
        let parsed: QueryResponse = response.json().await.map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(parsed.records)
    }

    async fn create(&self, object: &str, records: Vec<Record>) -> Result<Vec<CreateResult>, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("services/data/objects/{object}")))
            .bearer_auth(&self.config.bearer_token)
            .json(&records)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = map_transport_error(response).await?;
        let wire: Vec<CreateResultWire> = response.json().await.map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(wire
            .into_iter()
            .map(|r| CreateResult {
                success: r.success,
                id: r.id,
                errors: r.errors,
            })
            .collect())
    }
}

/// In-memory stand-in for the HTTP client, used by `migrator`'s own
/// integration tests and for local dry-runs without a live service.
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use engine::{ClientError, CreateResult, DataClient, FieldValue, ObjectDescription, QueryOptions, Record, SchemaClient};

    #[derive(Default)]
    pub struct FakeClient {
        schemas: Mutex<HashMap<String, ObjectDescription>>,
        records: Mutex<HashMap<String, Vec<Record>>>,
        next_id: Mutex<u64>,
    }

    impl FakeClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register_object(&self, description: ObjectDescription) {
            self.schemas.lock().unwrap().insert(description.name.lower().to_string(), description);
        }

        pub fn seed_records(&self, object: &str, records: Vec<Record>) {
            self.records.lock().unwrap().insert(object.to_lowercase(), records);
        }
    }

    #[async_trait]
    impl SchemaClient for FakeClient {
        async fn describe(&self, object: &str) -> Result<ObjectDescription, ClientError> {
            self.schemas
                .lock()
                .unwrap()
                .get(&object.to_lowercase())
                .cloned()
                .ok_or(ClientError::NotFound)
        }
    }

    #[async_trait]
    impl DataClient for FakeClient {
        async fn query(&self, object: &str, options: QueryOptions) -> Result<Vec<Record>, ClientError> {
            let records = self.records.lock().unwrap().get(&object.to_lowercase()).cloned().unwrap_or_default();
            let offset = options.offset.unwrap_or(0) as usize;
            let limit = options.limit.map(|l| l as usize).unwrap_or(records.len());
            Ok(records.into_iter().skip(offset).take(limit).collect())
        }

        async fn create(&self, object: &str, records: Vec<Record>) -> Result<Vec<CreateResult>, ClientError> {
            let mut store = self.records.lock().unwrap();
            let mut next_id = self.next_id.lock().unwrap();
            let bucket = store.entry(object.to_lowercase()).or_default();
            let mut results = Vec::with_capacity(records.len());
            for mut record in records {
                *next_id += 1;
                let id = format!("{object}-{}", *next_id);
                record.insert("Id".to_string(), FieldValue::String(id.clone()));
                bucket.push(record);
                results.push(CreateResult {
                    success: true,
                    id: Some(id),
                    errors: vec![],
                });
            }
            Ok(results)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use engine::ObjectName;

        #[tokio::test]
        async fn create_then_query_round_trips() {
            let client = FakeClient::new();
            let mut record = Record::new();
            record.insert("Name".to_string(), FieldValue::String("Account 01".to_string()));

            let results = client.create("Account", vec![record]).await.unwrap();
            assert_eq!(results.len(), 1);
            assert!(results[0].success);

            let queried = client
                .query("Account", QueryOptions { fields: vec!["Id".into(), "Name".into()], ..Default::default() })
                .await
                .unwrap();
            assert_eq!(queried.len(), 1);
        }

        #[tokio::test]
        async fn describe_unregistered_object_is_not_found() {
            let client = FakeClient::new();
            let err = client.describe("Ghost").await.unwrap_err();
            assert!(matches!(err, ClientError::NotFound));
        }

        #[tokio::test]
        async fn describe_returns_registered_schema_case_insensitively() {
            let client = FakeClient::new();
            client.register_object(ObjectDescription {
                name: ObjectName::new("Account"),
                fields: vec![],
            });
            assert!(client.describe("account").await.is_ok());
        }
    }
}
