//! Dump fixpoint driver: runs seed queries, then alternates related and
//! dependent expansion across the fetched record graph until a round adds
//! nothing new, then emits one CSV per input query.

use futures::future::join_all;
use indexmap::IndexMap;

use crate::client::{DataClient, QueryOptions};
use crate::describer::Describer;
use crate::error::EngineError;
use crate::model::{field_value_to_cell, DumpQuery, DumpTarget, FieldSelection, FieldType, FieldValue, ObjectName, Record};
use csvio::Column;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DumpProgress {
    pub round: usize,
    pub total_fetched: usize,
}

pub trait DumpProgressSink: Send + Sync {
    fn report(&self, progress: DumpProgress);
}

pub struct NullDumpProgressSink;

impl DumpProgressSink for NullDumpProgressSink {
    fn report(&self, _progress: DumpProgress) {}
}

struct ResolvedQuery {
    object: ObjectName,
    object_lower: String,
    fields: Vec<String>,
    target: DumpTarget,
    condition: Option<String>,
    orderby: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    scope: Option<String>,
}

fn extract_id(record: &Record) -> Option<String> {
    match record.get("Id") {
        Some(FieldValue::String(id)) => Some(id.clone()),
        _ => None,
    }
}

fn id_list_literal(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id.replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(",")
}

fn merge_new(bucket: &mut IndexMap<String, Record>, records: Vec<Record>) -> Vec<String> {
    let mut added = Vec::new();
    for record in records {
        if let Some(id) = extract_id(&record) {
            if !bucket.contains_key(&id) {
                bucket.insert(id.clone(), record);
                added.push(id);
            }
        }
    }
    added
}

pub struct DumpDriver<'a> {
    describer: &'a Describer,
    data_client: &'a dyn DataClient,
    max_fetch_size: u64,
}

impl<'a> DumpDriver<'a> {
    pub fn new(describer: &'a Describer, data_client: &'a dyn DataClient, max_fetch_size: u64) -> Self {
        Self {
            describer,
            data_client,
            max_fetch_size,
        }
    }

    fn resolve_query(&self, query: &DumpQuery) -> Result<ResolvedQuery, EngineError> {
        let object = self
            .describer
            .find_object(query.object.as_str())
            .ok_or_else(|| EngineError::SchemaNotFound(query.object.clone()))?;

        let mut fields: Vec<String> = match &query.fields {
            FieldSelection::All => object.fields.iter().map(|f| f.name.clone()).collect(),
            FieldSelection::Explicit(names) => names.clone(),
            FieldSelection::AllExcept(excluded) => object
                .fields
                .iter()
                .map(|f| f.name.clone())
                .filter(|name| !excluded.iter().any(|e| e.eq_ignore_ascii_case(name)))
                .collect(),
        };
        if !fields.iter().any(|f| f.eq_ignore_ascii_case("Id")) {
            fields.insert(0, "Id".to_string());
        }

        Ok(ResolvedQuery {
            object: object.name.clone(),
            object_lower: object.name.lower().to_string(),
            fields,
            target: query.target,
            condition: query.condition.clone(),
            orderby: query.orderby.clone(),
            limit: query.limit,
            offset: query.offset,
            scope: query.scope.clone(),
        })
    }

    async fn execute(&self, query: &ResolvedQuery, extra_condition: Option<String>) -> Result<Vec<Record>, EngineError> {
        let condition = match (&query.condition, extra_condition) {
            (Some(c), Some(e)) => Some(format!("({e}) AND ({c})")),
            (Some(c), None) => Some(c.clone()),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        };
        let options = QueryOptions {
            fields: query.fields.clone(),
            condition,
            orderby: query.orderby.clone(),
            limit: Some(query.limit.unwrap_or(self.max_fetch_size)),
            offset: query.offset,
            scope: query.scope.clone(),
        };
        let mut records = self.data_client.query(query.object.as_str(), options).await?;
        if records.len() as u64 > self.max_fetch_size {
            records.truncate(self.max_fetch_size as usize);
        }
        Ok(records)
    }

    /// Related-expansion predicates: fields on `query`'s object whose
    /// `referenceTo` intersects an object that grew last round.
    fn related_predicate(&self, query: &ResolvedQuery, new_ids: &IndexMap<String, Vec<String>>) -> Option<String> {
        let object = self.describer.find_object(&query.object_lower)?;
        let mut predicates = Vec::new();
        for field in &object.fields {
            if !matches!(field.field_type, FieldType::Reference) {
                continue;
            }
            let mut ids = Vec::new();
            for target in &field.reference_to {
                if let Some(grown) = new_ids.get(target.lower()) {
                    ids.extend(grown.iter().cloned());
                }
            }
            if !ids.is_empty() {
                predicates.push(format!("{} IN ({})", field.name, id_list_literal(&ids)));
            }
        }
        if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" OR "))
        }
    }

    /// Dependent-expansion predicate: ids referenced by already-fetched
    /// records of any object, via a field pointing at `query`'s object,
    /// that haven't been fetched for that object yet.
    fn dependent_predicate(
        &self,
        query: &ResolvedQuery,
        fetched: &IndexMap<String, IndexMap<String, Record>>,
    ) -> Option<String> {
        let mut referenced_ids = Vec::new();
        for (source_object_lower, bucket) in fetched.iter() {
            let Some(source_object) = self.describer.find_object(source_object_lower) else {
                continue;
            };
            for field in &source_object.fields {
                if !matches!(field.field_type, FieldType::Reference) {
                    continue;
                }
                if !field.reference_to.iter().any(|t| t.lower() == query.object_lower) {
                    continue;
                }
                for record in bucket.values() {
                    if let Some(FieldValue::String(id)) = record.get(&field.name) {
                        let already_fetched = fetched
                            .get(&query.object_lower)
                            .map(|b| b.contains_key(id))
                            .unwrap_or(false);
                        if !already_fetched && !referenced_ids.contains(id) {
                            referenced_ids.push(id.clone());
                        }
                    }
                }
            }
        }
        if referenced_ids.is_empty() {
            None
        } else {
            Some(format!("Id IN ({})", id_list_literal(&referenced_ids)))
        }
    }

    pub async fn run(
        &self,
        queries: &[DumpQuery],
        reverse_id_map: Option<&IndexMap<String, String>>,
        progress: &dyn DumpProgressSink,
    ) -> Result<Vec<String>, EngineError> {
        let resolved: Vec<ResolvedQuery> = queries.iter().map(|q| self.resolve_query(q)).collect::<Result<_, _>>()?;

        let mut fetched: IndexMap<String, IndexMap<String, Record>> = IndexMap::new();
        let mut new_ids: IndexMap<String, Vec<String>> = IndexMap::new();

        let seeds: Vec<&ResolvedQuery> = resolved.iter().filter(|q| q.target == DumpTarget::Query).collect();
        let seed_futs = seeds.iter().map(|query| self.execute(query, None));
        let seed_results = join_all(seed_futs).await;
        for (query, result) in seeds.iter().zip(seed_results) {
            let records = result?;
            let bucket = fetched.entry(query.object_lower.clone()).or_default();
            let added = merge_new(bucket, records);
            new_ids.entry(query.object_lower.clone()).or_default().extend(added);
        }

        let related: Vec<&ResolvedQuery> = resolved.iter().filter(|q| q.target == DumpTarget::Related).collect();

        let mut round = 0usize;
        loop {
            if new_ids.values().all(Vec::is_empty) {
                break;
            }
            round += 1;

            let total_so_far: usize = fetched.values().map(IndexMap::len).sum();
            let safety_cap = total_so_far + resolved.len() + 1;
            if round > safety_cap {
                warn!(round, total_so_far, "dump closure loop exceeded its safety bound; stopping");
                break;
            }

            let mut round_added: IndexMap<String, Vec<String>> = IndexMap::new();

            let related_work: Vec<(&ResolvedQuery, String)> = related
                .iter()
                .filter_map(|query| self.related_predicate(query, &new_ids).map(|predicate| (*query, predicate)))
                .collect();
            let futs = related_work.iter().map(|(query, predicate)| self.execute(query, Some(predicate.clone())));
            let results = join_all(futs).await;
            for ((query, _), result) in related_work.iter().zip(results) {
                let records = result?;
                let bucket = fetched.entry(query.object_lower.clone()).or_default();
                let added = merge_new(bucket, records);
                round_added.entry(query.object_lower.clone()).or_default().extend(added);
            }

            let dependent_work: Vec<(&ResolvedQuery, String)> = related
                .iter()
                .filter_map(|query| self.dependent_predicate(query, &fetched).map(|predicate| (*query, predicate)))
                .collect();
            let futs = dependent_work.iter().map(|(query, predicate)| self.execute(query, Some(predicate.clone())));
            let results = join_all(futs).await;
            for ((query, _), result) in dependent_work.iter().zip(results) {
                let records = result?;
                let bucket = fetched.entry(query.object_lower.clone()).or_default();
                let added = merge_new(bucket, records);
                round_added.entry(query.object_lower.clone()).or_default().extend(added);
            }

            let total_fetched: usize = fetched.values().map(IndexMap::len).sum();
            debug!(round, total_fetched, "dump closure round complete");
            progress.report(DumpProgress { round, total_fetched });

            new_ids = round_added;
        }

        let mut outputs = Vec::with_capacity(resolved.len());
        for query in &resolved {
            let bucket = fetched.get(&query.object_lower);
            let csv_records: Vec<csvio::CsvRecord> = bucket
                .map(|bucket| {
                    bucket
                        .values()
                        .map(|record| to_csv_record(record, reverse_id_map, self.describer, &query.object_lower))
                        .collect()
                })
                .unwrap_or_default();
            let columns: Vec<Column> = query.fields.iter().map(|field| Column::same(field.clone())).collect();
            let csv = csvio::write_csv(&csv_records, &columns)?;
            outputs.push(csv);
        }

        Ok(outputs)
    }
}

fn to_csv_record(
    record: &Record,
    reverse_id_map: Option<&IndexMap<String, String>>,
    describer: &Describer,
    object_lower: &str,
) -> csvio::CsvRecord {
    let object = describer.find_object(object_lower);
    let mut csv_record = csvio::CsvRecord::new();
    for (key, value) in record {
        let is_id_like = object
            .and_then(|o| o.fields.iter().find(|f| f.name.eq_ignore_ascii_case(key)))
            .map(|f| matches!(f.field_type, FieldType::Id | FieldType::Reference))
            .unwrap_or(key.eq_ignore_ascii_case("Id"));

        let cell = field_value_to_cell(value);
        let cell = if is_id_like {
            reverse_id_map
                .and_then(|map| map.get(&cell))
                .cloned()
                .unwrap_or(cell)
        } else {
            cell
        };
        csv_record.insert(key.clone(), cell);
    }
    csv_record
}
