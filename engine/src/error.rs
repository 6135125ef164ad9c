//! Error kinds raised across the engine. `SchemaNotFound`, `MissingIdColumn`,
//! `UnknownMappingObject` and `CsvParse` abort the run before any upload
//! happens; `Transport` aborts mid-run at the call site. Per-record
//! upload failures and blocked rows are data, not errors — they never
//! appear here.

use thiserror::Error;

use crate::model::ObjectName;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("schema not found for object '{0}'")]
    SchemaNotFound(ObjectName),

    #[error("object '{object}', row {row_index}: no field of type `id` in header")]
    MissingIdColumn { object: ObjectName, row_index: usize },

    #[error("mapping policy refers to object '{0}' with no matching input dataset")]
    UnknownMappingObject(ObjectName),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("csv error: {0}")]
    CsvParse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<crate::client::ClientError> for EngineError {
    fn from(error: crate::client::ClientError) -> Self {
        match error {
            crate::client::ClientError::NotFound => EngineError::Transport("not found".to_string()),
            crate::client::ClientError::Transport(message) => EngineError::Transport(message),
        }
    }
}

impl From<csvio::CsvIoError> for EngineError {
    fn from(error: csvio::CsvIoError) -> Self {
        EngineError::CsvParse(error.to_string())
    }
}
