//! Mapping-policy resolver: builds the initial source→target id map from
//! composite business keys, falling back to a default mapping for rows
//! that don't match any remote record.

use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};

use crate::client::{DataClient, QueryOptions};
use crate::error::EngineError;
use crate::model::{DefaultMapping, LoadDataset, MappingPolicy};
use crate::namespace;

/// `row[K1] \t row[K2] \t ...`, trimmed. Shared by both the local and
/// remote sides of step 2/3 so the two maps agree on what a "match" is.
fn key_tuple(values: &[&str]) -> String {
    values.join("\t").trim().to_string()
}

fn id_list_literal(values: &IndexSet<String>) -> String {
    values
        .iter()
        .map(|value| format!("'{}'", value.replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds `K1 IN (v1,v2,…) AND K2 IN (…) AND …` from the values actually
/// present in `local_key_to_source`'s rows, so the remote query is scoped
/// to candidates that could possibly match instead of fetching everything.
fn key_filter_condition(key_fields: &[String], value_sets: &[IndexSet<String>]) -> String {
    key_fields
        .iter()
        .zip(value_sets)
        .map(|(field, values)| format!("{field} IN ({})", id_list_literal(values)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Resolves one policy against its dataset, returning the id-map fragment
/// it contributes. Distinct policies never write the same source id, so
/// callers can fold fragments with a plain union.
pub async fn resolve_policy(
    policy: &MappingPolicy,
    dataset: &LoadDataset,
    data_client: &dyn DataClient,
    default_namespace: Option<&str>,
) -> Result<IndexMap<String, String>, EngineError> {
    let mut fragment = IndexMap::new();

    let Some(id_index) = namespace::lookup_header_index(&dataset.headers, "Id", default_namespace) else {
        return Ok(fragment);
    };

    let key_indices: Vec<usize> = policy
        .key_fields
        .iter()
        .filter_map(|field| namespace::lookup_header_index(&dataset.headers, field, default_namespace))
        .collect();

    let mut local_key_to_source: IndexMap<String, String> = IndexMap::new();
    let mut value_sets: Vec<IndexSet<String>> = vec![IndexSet::new(); key_indices.len()];
    if key_indices.len() == policy.key_fields.len() && !policy.key_fields.is_empty() {
        for row in &dataset.rows {
            let source_id = row[id_index].clone();
            if source_id.is_empty() {
                continue;
            }
            let values: Vec<&str> = key_indices.iter().map(|&i| row[i].as_str()).collect();
            for (set, value) in value_sets.iter_mut().zip(&values) {
                set.insert((*value).to_string());
            }
            local_key_to_source.insert(key_tuple(&values), source_id);
        }

        if !local_key_to_source.is_empty() {
            let records = data_client
                .query(
                    policy.object.as_str(),
                    QueryOptions {
                        fields: {
                            let mut fields = vec!["Id".to_string()];
                            fields.extend(policy.key_fields.iter().cloned());
                            fields
                        },
                        condition: Some(key_filter_condition(&policy.key_fields, &value_sets)),
                        ..Default::default()
                    },
                )
                .await?;

            for record in records {
                let target_id = match record.get("Id") {
                    Some(crate::model::FieldValue::String(value)) => value.clone(),
                    _ => continue,
                };
                let mut values = Vec::with_capacity(policy.key_fields.len());
                for key_field in &policy.key_fields {
                    let value = match record.get(key_field) {
                        Some(crate::model::FieldValue::String(value)) => value.clone(),
                        Some(other) => format_field_value(other),
                        None => String::new(),
                    };
                    values.push(value);
                }
                let remote_tuple = key_tuple(&values.iter().map(String::as_str).collect::<Vec<_>>());
                if let Some(source_id) = local_key_to_source.get(&remote_tuple) {
                    fragment.insert(source_id.clone(), target_id);
                }
            }
        }
    }

    if let Some(default_mapping) = &policy.default_mapping {
        let fallback_target = match default_mapping {
            DefaultMapping::Literal(literal) => Some(literal.clone()),
            DefaultMapping::Query { condition, orderby, offset } => {
                let records = data_client
                    .query(
                        policy.object.as_str(),
                        QueryOptions {
                            fields: vec!["Id".to_string()],
                            condition: condition.clone(),
                            orderby: orderby.clone(),
                            limit: Some(1),
                            offset: *offset,
                            scope: None,
                        },
                    )
                    .await?;
                records.first().and_then(|record| match record.get("Id") {
                    Some(crate::model::FieldValue::String(value)) => Some(value.clone()),
                    _ => None,
                })
            }
        };

        if let Some(target_id) = fallback_target {
            for row in &dataset.rows {
                let source_id = &row[id_index];
                if source_id.is_empty() || fragment.contains_key(source_id) {
                    continue;
                }
                fragment.insert(source_id.clone(), target_id.clone());
            }
        }
    }

    Ok(fragment)
}

fn format_field_value(value: &crate::model::FieldValue) -> String {
    use crate::model::FieldValue;
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Int(n) => n.to_string(),
        FieldValue::Float(n) => n.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::String(s) => s.clone(),
    }
}

/// Resolves every policy concurrently and unions the fragments.
pub async fn resolve_all(
    policies: &[MappingPolicy],
    datasets: &IndexMap<String, LoadDataset>,
    data_client: &dyn DataClient,
    default_namespace: Option<&str>,
) -> Result<IndexMap<String, String>, EngineError> {
    for policy in policies {
        if !datasets.contains_key(policy.object.lower()) {
            return Err(EngineError::UnknownMappingObject(policy.object.clone()));
        }
    }

    let fetches = policies.iter().map(|policy| {
        let dataset = &datasets[policy.object.lower()];
        resolve_policy(policy, dataset, data_client, default_namespace)
    });

    let fragments = join_all(fetches).await;

    let mut merged = IndexMap::new();
    for fragment in fragments {
        for (source_id, target_id) in fragment? {
            merged.insert(source_id, target_id);
        }
    }
    Ok(merged)
}
