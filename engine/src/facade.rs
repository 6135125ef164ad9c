//! Top-level entry points: wires the Describer, the mapping-policy
//! resolver, and the two fixpoint drivers together in the order a caller
//! actually needs them — build schema, resolve seed ids, then drive.

use indexmap::IndexMap;

use crate::client::{DataClient, SchemaClient};
use crate::describer::Describer;
use crate::dump::{self, DumpDriver};
use crate::error::EngineError;
use crate::model::{DumpOptions, DumpQuery, IdMap, LoadDataset, MappingPolicy, ObjectName, UploadOptions, UploadStatus};
use crate::resolver;
use crate::upload::{self, UploadDriver};

/// One event stream for both directions, so a single implementation (a
/// progress bar, a channel forwarder) can back both `load_csv_data` and
/// `dump_as_csv`.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Upload(upload::UploadProgress),
    Dump(dump::DumpProgress),
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _event: ProgressEvent) {}
}

struct UploadSinkAdapter<'a>(&'a dyn ProgressSink);

impl upload::ProgressSink for UploadSinkAdapter<'_> {
    fn report(&self, progress: upload::UploadProgress) {
        self.0.report(ProgressEvent::Upload(progress));
    }
}

struct DumpSinkAdapter<'a>(&'a dyn ProgressSink);

impl dump::DumpProgressSink for DumpSinkAdapter<'_> {
    fn report(&self, progress: dump::DumpProgress) {
        self.0.report(ProgressEvent::Dump(progress));
    }
}

pub async fn load_csv_data(
    inputs: Vec<LoadDataset>,
    mapping_policies: Vec<MappingPolicy>,
    options: UploadOptions,
    schema_client: &dyn SchemaClient,
    data_client: &dyn DataClient,
    progress: &dyn ProgressSink,
) -> Result<UploadStatus, EngineError> {
    let default_namespace = options.default_namespace.as_deref();

    let object_names: Vec<ObjectName> = inputs.iter().map(|dataset| dataset.object.clone()).collect();
    let describer = Describer::build(schema_client, &object_names, default_namespace).await?;

    let mut datasets: IndexMap<String, LoadDataset> = IndexMap::new();
    for dataset in inputs {
        datasets.insert(dataset.object.lower().to_string(), dataset);
    }

    let mut id_map = options.id_map.unwrap_or_default();
    let resolved = resolver::resolve_all(&mapping_policies, &datasets, data_client, default_namespace).await?;
    id_map.merge_fragment(resolved);

    let driver = UploadDriver::new(&describer, data_client, default_namespace);
    let adapter = UploadSinkAdapter(progress);
    driver.run(datasets, options.target_ids, id_map, &adapter, None).await
}

pub async fn dump_as_csv(
    queries: Vec<DumpQuery>,
    options: DumpOptions,
    schema_client: &dyn SchemaClient,
    data_client: &dyn DataClient,
    progress: &dyn ProgressSink,
) -> Result<Vec<String>, EngineError> {
    let default_namespace = options.default_namespace.as_deref();

    let object_names: Vec<ObjectName> = queries.iter().map(|query| query.object.clone()).collect();
    let describer = Describer::build(schema_client, &object_names, default_namespace).await?;

    let reverse_id_map: Option<IndexMap<String, String>> = options.id_map.as_ref().map(IdMap::reversed);

    let driver = DumpDriver::new(&describer, data_client, options.max_fetch_size);
    let adapter = DumpSinkAdapter(progress);
    driver.run(&queries, reverse_id_map.as_ref(), &adapter).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, CreateResult, QueryOptions};
    use crate::model::{FieldDescription, FieldType, FieldValue, ObjectDescription, Record};
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

    struct RecordingDataClient {
        created: Mutex<Vec<(String, Record)>>,
    }

    #[async_trait]
    impl DataClient for RecordingDataClient {
        async fn query(&self, _object: &str, _options: QueryOptions) -> Result<Vec<Record>, ClientError> {
            Ok(vec![])
        }

        async fn create(&self, object: &str, records: Vec<Record>) -> Result<Vec<CreateResult>, ClientError> {
            let mut created = self.created.lock().unwrap();
            let results = records
                .into_iter()
                .enumerate()
                .map(|(i, record)| {
                    let id = format!("{object}-{}", created.len() + i + 1);
                    created.push((object.to_string(), record));
                    CreateResult {
                        success: true,
                        id: Some(id),
                        errors: vec![],
                    }
                })
                .collect();
            Ok(results)
        }
    }

    fn account_desc() -> ObjectDescription {
        ObjectDescription {
            name: ObjectName::new("Account"),
            fields: vec![
                FieldDescription { name: "Id".into(), field_type: FieldType::Id, createable: false, reference_to: vec![] },
                FieldDescription { name: "Name".into(), field_type: FieldType::Other("string".into()), createable: true, reference_to: vec![] },
            ],
        }
    }

    #[tokio::test]
    async fn load_csv_data_runs_end_to_end() {
        let schema_client = FixedSchemaClient(vec![account_desc()]);
        let data_client = RecordingDataClient { created: Mutex::new(vec![]) };

        let dataset = LoadDataset::new(
            ObjectName::new("Account"),
            vec!["Id".into(), "Name".into()],
            vec![vec!["A1".into(), "Account 01".into()]],
        )
        .unwrap();

        let status = load_csv_data(
            vec![dataset],
            vec![],
            UploadOptions::default(),
            &schema_client,
            &data_client,
            &NullProgressSink,
        )
        .await
        .unwrap();

        assert_eq!(status.successes.len(), 1);
        assert_eq!(status.id_map.get("A1"), Some("Account-1"));
        assert_eq!(data_client.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_csv_data_honors_seeded_target_ids() {
        use crate::model::TargetIdSet;

        let schema_client = FixedSchemaClient(vec![account_desc()]);
        let data_client = RecordingDataClient { created: Mutex::new(vec![]) };

        let dataset = LoadDataset::new(
            ObjectName::new("Account"),
            vec!["Id".into(), "Name".into()],
            vec![vec!["A1".into(), "Targeted".into()], vec!["A2".into(), "Untargeted".into()]],
        )
        .unwrap();

        let options = UploadOptions {
            target_ids: TargetIdSet::seeded(["A1".to_string()]),
            ..Default::default()
        };

        let status = load_csv_data(vec![dataset], vec![], options, &schema_client, &data_client, &NullProgressSink)
            .await
            .unwrap();

        assert_eq!(status.successes.len(), 1);
        assert_eq!(status.successes[0].orig_id, "A1");
        assert_eq!(status.blocked.len(), 1);
        assert_eq!(status.blocked[0].orig_id, "A2");
    }

    #[tokio::test]
    async fn dump_as_csv_emits_one_csv_per_query() {
        let schema_client = FixedSchemaClient(vec![account_desc()]);
        let data_client = RecordingDataClient { created: Mutex::new(vec![]) };

        let queries = vec![DumpQuery::seed(ObjectName::new("Account"))];
        let outputs = dump_as_csv(queries, DumpOptions::default(), &schema_client, &data_client, &NullProgressSink)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].starts_with("Id,Name"));
    }

    #[derive(Default)]
    struct CountingSink {
        uploads: Mutex<usize>,
        dumps: Mutex<usize>,
    }

    impl ProgressSink for CountingSink {
        fn report(&self, event: ProgressEvent) {
            match event {
                ProgressEvent::Upload(_) => *self.uploads.lock().unwrap() += 1,
                ProgressEvent::Dump(_) => *self.dumps.lock().unwrap() += 1,
            }
        }
    }

    #[tokio::test]
    async fn a_single_sink_backs_both_directions() {
        let schema_client = FixedSchemaClient(vec![account_desc()]);
        let data_client = RecordingDataClient { created: Mutex::new(vec![]) };
        let sink = CountingSink::default();

        let dataset = LoadDataset::new(
            ObjectName::new("Account"),
            vec!["Id".into(), "Name".into()],
            vec![vec!["A1".into(), "Account 01".into()]],
        )
        .unwrap();
        load_csv_data(vec![dataset], vec![], UploadOptions::default(), &schema_client, &data_client, &sink)
            .await
            .unwrap();
        assert!(*sink.uploads.lock().unwrap() > 0);

        let queries = vec![DumpQuery::seed(ObjectName::new("Account"))];
        dump_as_csv(queries, DumpOptions::default(), &schema_client, &data_client, &sink)
            .await
            .unwrap();
    }
}
