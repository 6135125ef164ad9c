//! Row classifier: partitions a dataset's rows into uploadable, waiting,
//! and not-loadable, and mutates the `TargetIdSet` in place as it walks
//! reference columns.

use crate::describer::Describer;
use crate::model::{IdMap, LoadDataset, ObjectDescription, TargetIdSet};
use crate::namespace;

#[derive(Debug, Clone)]
pub struct WaitingRow {
    pub row: Vec<String>,
    pub orig_id: String,
    pub blocking_field: String,
    pub blocking_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub uploadables: Vec<Vec<String>>,
    pub waitings: Vec<WaitingRow>,
    pub not_loadables: Vec<String>,
}

struct ReferenceColumn {
    index: usize,
    field_name: String,
}

/// Reference columns whose `referenceTo` intersects at least one object
/// the Describer also knows about.
fn reference_columns(
    headers: &[String],
    object: &ObjectDescription,
    describer: &Describer,
    default_namespace: Option<&str>,
) -> Vec<ReferenceColumn> {
    headers
        .iter()
        .enumerate()
        .filter_map(|(index, header)| {
            let field = object.field(header, default_namespace)?;
            if !matches!(field.field_type, crate::model::FieldType::Reference) {
                return None;
            }
            let known = field
                .reference_to
                .iter()
                .any(|target| describer.find_object(target.as_str()).is_some());
            known.then(|| ReferenceColumn {
                index,
                field_name: field.name.clone(),
            })
        })
        .collect()
}

pub fn classify(
    dataset: &LoadDataset,
    object: &ObjectDescription,
    describer: &Describer,
    targets: &mut TargetIdSet,
    id_map: &IdMap,
    default_namespace: Option<&str>,
) -> Classification {
    let mut classification = Classification::default();

    let Some(id_index) = namespace::lookup_header_index(&dataset.headers, "Id", default_namespace) else {
        return classification;
    };

    let ref_columns = reference_columns(&dataset.headers, object, describer, default_namespace);

    for row in &dataset.rows {
        let id = row[id_index].clone();

        // Rows already mapped (id present in the seeded/growing id map)
        // do not participate in target-set propagation.
        if id_map.has(&id) {
            classification.not_loadables.push(id);
            continue;
        }

        let mut uploadable = targets.is_empty() || targets.contains(&id);
        let mut blocker: Option<(String, String)> = None;

        for reference in &ref_columns {
            let ref_id = row[reference.index].clone();
            if ref_id.is_empty() {
                continue;
            }

            // Target-set propagation mutates `targets` regardless of
            // whether this reference ends up being the blocker.
            if targets.contains(&ref_id) {
                targets.insert(id.clone());
                uploadable = true;
            } else if targets.contains(&id) {
                targets.insert(ref_id.clone());
            }

            if !id_map.has(&ref_id) {
                uploadable = false;
                // Only the first unresolved reference is recorded as the
                // blocker, even if more than one is missing.
                if blocker.is_none() {
                    blocker = Some((reference.field_name.clone(), ref_id.clone()));
                }
            }
        }

        if uploadable {
            classification.uploadables.push(row.clone());
        } else {
            let (blocking_field, blocking_id) = blocker.unwrap_or_default();
            classification.waitings.push(WaitingRow {
                row: row.clone(),
                orig_id: id,
                blocking_field,
                blocking_id,
            });
        }
    }

    classification
}
