mod classifier;
mod client;
mod converter;
mod describer;
mod dump;
mod error;
mod facade;
mod model;
mod namespace;
mod resolver;
mod upload;

pub use client::{ClientError, CreateResult, DataClient, QueryOptions, SchemaClient};
pub use describer::Describer;
pub use dump::{DumpProgress, DumpProgressSink, NullDumpProgressSink};
pub use error::EngineError;
pub use facade::{dump_as_csv, load_csv_data, NullProgressSink, ProgressEvent, ProgressSink};
pub use model::{
    field_value_to_cell, BlockedRow, DefaultMapping, DumpOptions, DumpQuery, DumpTarget, FieldDescription,
    FieldSelection, FieldType, FieldValue, IdMap, LoadDataset, MappingPolicy, ObjectDescription, ObjectName, Record,
    RecordIdPair, TargetIdSet, UploadFailure, UploadOptions, UploadStatus, UploadSuccess,
};
pub use resolver::resolve_all;
pub use upload::{NullProgressSink as NullUploadProgressSink, UploadProgress};
