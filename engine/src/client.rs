//! The external collaborators the engine talks to: `SchemaClient` and
//! `DataClient`. The engine depends only on these traits; `restclient`
//! supplies the one concrete (HTTP) implementation and an in-memory fake
//! for tests.

use async_trait::async_trait;

use crate::model::{ObjectDescription, Record};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("not found")]
    NotFound,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Options accompanying a `query` call: `target="query"`/`"related"`
/// selection, filtering and paging all collapse to this at the client
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub fields: Vec<String>,
    pub condition: Option<String>,
    pub orderby: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub success: bool,
    pub id: Option<String>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait SchemaClient: Send + Sync {
    async fn describe(&self, object: &str) -> Result<ObjectDescription, ClientError>;
}

#[async_trait]
pub trait DataClient: Send + Sync {
    async fn query(&self, object: &str, options: QueryOptions) -> Result<Vec<Record>, ClientError>;

    /// Positional: `results[i]` corresponds to `records[i]`.
    async fn create(&self, object: &str, records: Vec<Record>) -> Result<Vec<CreateResult>, ClientError>;
}
