//! Row→record converter: coerces string cells to typed field values and
//! rewrites reference cells through the id map.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;
use crate::model::{coerce_numeric, FieldType, FieldValue, IdMap, ObjectDescription, Record, RecordIdPair};
use crate::namespace;

static FALSY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(|0|n|f|false)$").unwrap());

pub fn convert(
    row: &[String],
    headers: &[String],
    row_index: usize,
    object: &ObjectDescription,
    id_map: &IdMap,
    default_namespace: Option<&str>,
) -> Result<RecordIdPair, EngineError> {
    let mut orig_id: Option<String> = None;
    let mut record = Record::new();

    for (cell, header) in row.iter().zip(headers.iter()) {
        let Some(field) = object.field(header, default_namespace) else {
            continue;
        };

        match &field.field_type {
            FieldType::Id => {
                orig_id = Some(cell.clone());
                // Never written to the outgoing record.
            }
            FieldType::Reference => {
                if field.createable {
                    let value = if cell.is_empty() {
                        FieldValue::Null
                    } else {
                        id_map
                            .get(cell)
                            .map(|target| FieldValue::String(target.to_string()))
                            .unwrap_or(FieldValue::Null)
                    };
                    record.insert(field.name.clone(), value);
                }
            }
            FieldType::Date | FieldType::DateTime => {
                if field.createable && !cell.is_empty() {
                    record.insert(field.name.clone(), FieldValue::String(cell.clone()));
                }
            }
            FieldType::Boolean => {
                if field.createable {
                    let value = !FALSY.is_match(cell);
                    record.insert(field.name.clone(), FieldValue::Bool(value));
                }
            }
            numeric @ (FieldType::Int | FieldType::Double | FieldType::Currency | FieldType::Percent) => {
                if field.createable {
                    if let Some(value) = coerce_numeric(numeric, cell) {
                        record.insert(field.name.clone(), value);
                    }
                }
            }
            FieldType::Other(_) => {
                if field.createable {
                    record.insert(field.name.clone(), FieldValue::String(cell.clone()));
                }
            }
        }
    }

    let orig_id = orig_id.ok_or_else(|| EngineError::MissingIdColumn {
        object: object.name.clone(),
        row_index,
    })?;

    Ok(RecordIdPair { orig_id, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDescription, ObjectName};

    fn object() -> ObjectDescription {
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
                FieldDescription {
                    name: "AnnualRevenue".into(),
                    field_type: FieldType::Currency,
                    createable: true,
                    reference_to: vec![],
                },
                FieldDescription {
                    name: "IsActive".into(),
                    field_type: FieldType::Boolean,
                    createable: true,
                    reference_to: vec![],
                },
                FieldDescription {
                    name: "ReadOnlyFormula".into(),
                    field_type: FieldType::Other("string".into()),
                    createable: false,
                    reference_to: vec![],
                },
            ],
        }
    }

    #[test]
    fn converts_typed_cells_and_rewrites_reference() {
        let headers = vec![
            "Id".into(),
            "Name".into(),
            "OwnerId".into(),
            "AnnualRevenue".into(),
            "IsActive".into(),
            "ReadOnlyFormula".into(),
        ];
        let row = vec![
            "A1".into(),
            "Account 01".into(),
            "U1".into(),
            "1234.50".into(),
            "true".into(),
            "ignored".into(),
        ];
        let mut id_map = IdMap::new();
        id_map.insert_if_absent("U1", "005U1");

        let pair = convert(&row, &headers, 0, &object(), &id_map, None).unwrap();
        assert_eq!(pair.orig_id, "A1");
        assert_eq!(pair.record.get("Name"), Some(&FieldValue::String("Account 01".into())));
        assert_eq!(pair.record.get("OwnerId"), Some(&FieldValue::String("005U1".into())));
        assert_eq!(pair.record.get("AnnualRevenue"), Some(&FieldValue::Float(1234.50)));
        assert_eq!(pair.record.get("IsActive"), Some(&FieldValue::Bool(true)));
        assert!(!pair.record.contains_key("ReadOnlyFormula"), "non-createable fields are omitted");
    }

    #[test]
    fn unresolved_reference_is_written_null_not_dropped() {
        let headers = vec!["Id".into(), "OwnerId".into()];
        let row = vec!["A1".into(), "U-unknown".into()];
        let id_map = IdMap::new();
        let pair = convert(&row, &headers, 0, &object(), &id_map, None).unwrap();
        assert_eq!(pair.record.get("OwnerId"), Some(&FieldValue::Null));
    }

    #[test]
    fn falsy_regex_covers_spec_cases() {
        for truthy_false in ["", "0", "n", "N", "f", "F", "false", "FALSE"] {
            assert!(FALSY.is_match(truthy_false), "{truthy_false:?} should be falsy");
        }
        for truthy in ["1", "y", "t", "true", "yes"] {
            assert!(!FALSY.is_match(truthy), "{truthy:?} should be truthy");
        }
    }

    #[test]
    fn missing_id_column_is_an_error() {
        let headers = vec!["Name".into()];
        let row = vec!["Account 01".into()];
        let id_map = IdMap::new();
        let err = convert(&row, &headers, 3, &object(), &id_map, None).unwrap_err();
        assert!(matches!(err, EngineError::MissingIdColumn { row_index: 3, .. }));
    }
}
