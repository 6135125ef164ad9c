//! Upload fixpoint driver: repeatedly classifies, converts, submits
//! batches, merges new ids, and emits progress until an unproductive pass
//! defines the fixpoint.

use futures::future::join_all;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::client::DataClient;
use crate::converter::convert;
use crate::describer::Describer;
use crate::error::EngineError;
use crate::model::{
    BlockedRow, IdMap, LoadDataset, ObjectName, Record, TargetIdSet, UploadFailure, UploadStatus, UploadSuccess,
};

#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

/// One trait object, invoked synchronously between passes.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: UploadProgress);
}

pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _progress: UploadProgress) {}
}

pub struct UploadDriver<'a> {
    describer: &'a Describer,
    data_client: &'a dyn DataClient,
    default_namespace: Option<&'a str>,
}

impl<'a> UploadDriver<'a> {
    pub fn new(describer: &'a Describer, data_client: &'a dyn DataClient, default_namespace: Option<&'a str>) -> Self {
        Self {
            describer,
            data_client,
            default_namespace,
        }
    }

    pub async fn run(
        &self,
        mut datasets: IndexMap<String, LoadDataset>,
        mut targets: TargetIdSet,
        mut id_map: IdMap,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<UploadStatus, EngineError> {
        let total_count: usize = datasets.values().map(|dataset| dataset.rows.len()).sum();
        let mut status = UploadStatus {
            total_count,
            ..Default::default()
        };

        let mut pass = 0usize;
        loop {
            pass += 1;

            if let Some(token) = cancel {
                if token.is_cancelled() {
                    info!(pass, "upload cancelled between passes, returning partial status");
                    status.id_map = id_map;
                    return Ok(status);
                }
            }

            let mut uploadings: IndexMap<String, Vec<(String, Record)>> = IndexMap::new();
            let mut blocked_this_pass = Vec::new();

            for dataset in datasets.values_mut() {
                let object = self
                    .describer
                    .find_object(dataset.object.as_str())
                    .ok_or_else(|| EngineError::SchemaNotFound(dataset.object.clone()))?;

                let classification = classify(
                    dataset,
                    object,
                    self.describer,
                    &mut targets,
                    &id_map,
                    self.default_namespace,
                );

                let mut pairs = Vec::with_capacity(classification.uploadables.len());
                for (index, row) in classification.uploadables.iter().enumerate() {
                    let pair = convert(row, &dataset.headers, index, object, &id_map, self.default_namespace)?;
                    pairs.push((pair.orig_id, pair.record));
                }
                if !pairs.is_empty() {
                    uploadings.insert(dataset.object.as_str().to_string(), pairs);
                }

                for waiting in &classification.waitings {
                    blocked_this_pass.push(BlockedRow {
                        object: dataset.object.clone(),
                        orig_id: waiting.orig_id.clone(),
                        blocking_field: waiting.blocking_field.clone(),
                        blocking_id: waiting.blocking_id.clone(),
                    });
                }

                dataset.rows = classification.waitings.into_iter().map(|w| w.row).collect();
            }

            if uploadings.is_empty() {
                debug!(pass, blocked = blocked_this_pass.len(), "unproductive pass, this is the fixpoint");
                status.blocked = blocked_this_pass;
                status.id_map = id_map;
                return Ok(status);
            }

            let creates = uploadings
                .iter()
                .map(|(object, pairs)| {
                    let records = pairs.iter().map(|(_, record)| record.clone()).collect();
                    self.data_client.create(object, records)
                })
                .collect::<Vec<_>>();
            let results = join_all(creates).await;

            for ((object, pairs), result) in uploadings.into_iter().zip(results) {
                let create_results = result?;
                for ((orig_id, _record), create_result) in pairs.into_iter().zip(create_results) {
                    if create_result.success {
                        let target_id = create_result.id.unwrap_or_default();
                        id_map.insert_if_absent(orig_id.clone(), target_id.clone());
                        status.successes.push(UploadSuccess {
                            object: ObjectName::new(object.clone()),
                            orig_id,
                            target_id,
                        });
                    } else {
                        status.failures.push(UploadFailure {
                            object: ObjectName::new(object.clone()),
                            orig_id,
                            errors: create_result.errors,
                        });
                    }
                }
            }

            if pass > total_count + datasets.len() + 1 {
                warn!(pass, "upload driver exceeded its safety bound; terminating defensively");
                status.blocked = blocked_this_pass;
                status.id_map = id_map;
                return Ok(status);
            }

            progress.report(UploadProgress {
                total_count,
                success_count: status.successes.len(),
                failure_count: status.failures.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, CreateResult, SchemaClient};
    use crate::model::{FieldDescription, FieldType, FieldValue, ObjectDescription};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedSchemaClient(Vec<ObjectDescription>);

    #[async_trait]
    impl SchemaClient for FixedSchemaClient {
        async fn describe(&self, object: &str) -> Result<ObjectDescription, ClientError> {
            self.0
                .iter()
                .find(|o| o.name.lower() == object.to_lowercase())
                .cloned()
                .ok_or(ClientError::NotFound)
        }
    }

    /// Creates every record it's handed, minting `<object>-<n>` ids.
    struct AcceptingDataClient {
        counter: Mutex<usize>,
        reject: Vec<String>,
    }

    impl AcceptingDataClient {
        fn new() -> Self {
            Self {
                counter: Mutex::new(0),
                reject: vec![],
            }
        }

        fn rejecting(ids: Vec<String>) -> Self {
            Self {
                counter: Mutex::new(0),
                reject: ids,
            }
        }
    }

    #[async_trait]
    impl DataClient for AcceptingDataClient {
        async fn query(&self, _object: &str, _options: crate::client::QueryOptions) -> Result<Vec<Record>, ClientError> {
            Ok(vec![])
        }

        async fn create(&self, object: &str, records: Vec<Record>) -> Result<Vec<CreateResult>, ClientError> {
            let mut counter = self.counter.lock().unwrap();
            Ok(records
                .into_iter()
                .map(|record| {
                    let name = match record.get("Name") {
                        Some(FieldValue::String(s)) => s.clone(),
                        _ => String::new(),
                    };
                    if self.reject.contains(&name) {
                        CreateResult {
                            success: false,
                            id: None,
                            errors: vec!["REQUIRED_FIELD_MISSING".to_string()],
                        }
                    } else {
                        *counter += 1;
                        CreateResult {
                            success: true,
                            id: Some(format!("{object}-{counter}")),
                            errors: vec![],
                        }
                    }
                })
                .collect())
        }
    }

    fn account_desc() -> ObjectDescription {
        ObjectDescription {
            name: ObjectName::new("Account"),
            fields: vec![
                FieldDescription {
                    name: "Id".into(),
                    field_type: FieldType::Id,
                    createable: false,
                    reference_to: vec![],
                },
                FieldDescription {
                    name: "Name".into(),
                    field_type: FieldType::Other("string".into()),
                    createable: true,
                    reference_to: vec![],
                },
                FieldDescription {
                    name: "OwnerId".into(),
                    field_type: FieldType::Reference,
                    createable: true,
                    reference_to: vec![ObjectName::new("User")],
                },
            ],
        }
    }

    fn user_desc() -> ObjectDescription {
        ObjectDescription {
            name: ObjectName::new("User"),
            fields: vec![
                FieldDescription {
                    name: "Id".into(),
                    field_type: FieldType::Id,
                    createable: false,
                    reference_to: vec![],
                },
                FieldDescription {
                    name: "Name".into(),
                    field_type: FieldType::Other("string".into()),
                    createable: true,
                    reference_to: vec![],
                },
            ],
        }
    }

    fn datasets(rows: Vec<(&str, Vec<String>, Vec<Vec<String>>)>) -> IndexMap<String, LoadDataset> {
        let mut map = IndexMap::new();
        for (object, headers, data) in rows {
            let name = ObjectName::new(object);
            let dataset = LoadDataset::new(name.clone(), headers, data).unwrap();
            map.insert(name.lower().to_string(), dataset);
        }
        map
    }

    #[tokio::test]
    async fn empty_input_produces_empty_status() {
        let describer = Describer::build(&FixedSchemaClient(vec![]), &[], None).await.unwrap();
        let client = AcceptingDataClient::new();
        let driver = UploadDriver::new(&describer, &client, None);
        let status = driver
            .run(IndexMap::new(), TargetIdSet::new(), IdMap::new(), &NullProgressSink, None)
            .await
            .unwrap();
        assert_eq!(status.total_count, 0);
        assert!(status.successes.is_empty());
        assert!(status.failures.is_empty());
        assert!(status.blocked.is_empty());
        assert_eq!(status.id_map.len(), 0);
    }

    #[tokio::test]
    async fn blocked_by_missing_dependency() {
        let describer = Describer::build(
            &FixedSchemaClient(vec![account_desc(), user_desc()]),
            &[ObjectName::new("Account"), ObjectName::new("User")],
            None,
        )
        .await
        .unwrap();
        let client = AcceptingDataClient::new();
        let driver = UploadDriver::new(&describer, &client, None);

        let input = datasets(vec![
            (
                "Account",
                vec!["Id".into(), "Name".into(), "OwnerId".into()],
                vec![vec!["A1".into(), "Account 01".into(), "U1".into()]],
            ),
            ("User", vec!["Id".into(), "Name".into()], vec![]),
        ]);

        let status = driver
            .run(input, TargetIdSet::new(), IdMap::new(), &NullProgressSink, None)
            .await
            .unwrap();

        assert!(status.successes.is_empty());
        assert!(status.failures.is_empty());
        assert_eq!(status.blocked.len(), 1);
        assert_eq!(status.blocked[0].object, ObjectName::new("Account"));
        assert_eq!(status.blocked[0].orig_id, "A1");
        assert_eq!(status.blocked[0].blocking_field, "OwnerId");
        assert_eq!(status.blocked[0].blocking_id, "U1");
    }

    #[tokio::test]
    async fn blocked_by_failed_parent() {
        let describer = Describer::build(
            &FixedSchemaClient(vec![account_desc()]),
            &[ObjectName::new("Account")],
            None,
        )
        .await
        .unwrap();
        let client = AcceptingDataClient::rejecting(vec!["".to_string()]);
        let driver = UploadDriver::new(&describer, &client, None);

        // Account row "A1" has no Name (rejected by the fake client);
        // "C1" piggybacks OwnerId on A1 purely to exercise the blocked path.
        let input = datasets(vec![(
            "Account",
            vec!["Id".into(), "Name".into(), "OwnerId".into()],
            vec![
                vec!["A1".into(), "".into(), "".into()],
                vec!["C1".into(), "Child".into(), "A1".into()],
            ],
        )]);

        let status = driver
            .run(input, TargetIdSet::new(), IdMap::new(), &NullProgressSink, None)
            .await
            .unwrap();

        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].orig_id, "A1");
        assert_eq!(status.blocked.len(), 1);
        assert_eq!(status.blocked[0].orig_id, "C1");
        assert_eq!(status.blocked[0].blocking_id, "A1");
    }

    #[tokio::test]
    async fn seeded_id_map_passes_through_and_grows() {
        let describer = Describer::build(
            &FixedSchemaClient(vec![account_desc(), user_desc()]),
            &[ObjectName::new("Account"), ObjectName::new("User")],
            None,
        )
        .await
        .unwrap();
        let client = AcceptingDataClient::new();
        let driver = UploadDriver::new(&describer, &client, None);

        let mut seeded = IdMap::new();
        seeded.insert_if_absent("U1", "005SeededUser");

        let input = datasets(vec![(
            "Account",
            vec!["Id".into(), "Name".into(), "OwnerId".into()],
            vec![vec!["A1".into(), "Account 01".into(), "U1".into()]],
        )]);

        let status = driver
            .run(input, TargetIdSet::new(), seeded, &NullProgressSink, None)
            .await
            .unwrap();

        assert_eq!(status.successes.len(), 1);
        assert_eq!(status.id_map.len(), 2);
        assert_eq!(status.id_map.get("U1"), Some("005SeededUser"));
    }

    #[tokio::test]
    async fn rerun_with_prior_idmap_is_idempotent() {
        let describer = Describer::build(
            &FixedSchemaClient(vec![account_desc(), user_desc()]),
            &[ObjectName::new("Account"), ObjectName::new("User")],
            None,
        )
        .await
        .unwrap();
        let client = AcceptingDataClient::new();
        let driver = UploadDriver::new(&describer, &client, None);

        let input = datasets(vec![(
            "Account",
            vec!["Id".into(), "Name".into(), "OwnerId".into()],
            vec![vec!["A1".into(), "Account 01".into(), "".into()]],
        )]);

        let first = driver
            .run(input.clone(), TargetIdSet::new(), IdMap::new(), &NullProgressSink, None)
            .await
            .unwrap();
        assert_eq!(first.successes.len(), 1);

        let second = driver
            .run(input, TargetIdSet::new(), first.id_map.clone(), &NullProgressSink, None)
            .await
            .unwrap();

        assert!(second.successes.is_empty());
        assert!(second.failures.is_empty());
        assert!(second.blocked.is_empty());
        assert_eq!(second.id_map.len(), first.id_map.len());
    }
}
