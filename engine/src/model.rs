//! Core data model: `ObjectName`, field/object descriptions,
//! `LoadDataset`, the id map, the target-id set, mapping policies,
//! upload status, and dump queries.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::namespace;

/// Case-insensitive object/field identifier. Two `ObjectName`s are equal
/// iff their lowercased forms are equal; the original literal is kept for
/// display and for namespace add/strip, which are case-preserving.
#[derive(Debug, Clone)]
pub struct ObjectName {
    raw: String,
    lower: String,
}

impl ObjectName {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let lower = raw.to_lowercase();
        Self { raw, lower }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn lower(&self) -> &str {
        &self.lower
    }
}

impl From<&str> for ObjectName {
    fn from(value: &str) -> Self {
        ObjectName::new(value)
    }
}

impl From<String> for ObjectName {
    fn from(value: String) -> Self {
        ObjectName::new(value)
    }
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.lower == other.lower
    }
}

impl Eq for ObjectName {}

impl Hash for ObjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lower.hash(state);
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Field types recognized by the converter. `Other` preserves
/// unrecognized schema types instead of rejecting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Id,
    Reference,
    Int,
    Double,
    Currency,
    Percent,
    Date,
    DateTime,
    Boolean,
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "id" => FieldType::Id,
            "reference" => FieldType::Reference,
            "int" | "integer" => FieldType::Int,
            "double" => FieldType::Double,
            "currency" => FieldType::Currency,
            "percent" => FieldType::Percent,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "boolean" | "bool" => FieldType::Boolean,
            other => FieldType::Other(other.to_string()),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Int | FieldType::Double | FieldType::Currency | FieldType::Percent
        )
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub field_type: FieldType,
    pub createable: bool,
    pub reference_to: Vec<ObjectName>,
}

#[derive(Debug, Clone)]
pub struct ObjectDescription {
    pub name: ObjectName,
    pub fields: Vec<FieldDescription>,
}

impl ObjectDescription {
    /// Namespace-tolerant, case-insensitive field lookup.
    pub fn field(&self, name: &str, default_namespace: Option<&str>) -> Option<&FieldDescription> {
        namespace::lookup(
            |candidate| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(candidate)),
            name,
            default_namespace,
        )
    }
}

/// One CSV-derived dataset for a single object. Invariant: every row has
/// `headers.len()` cells, enforced at construction.
#[derive(Debug, Clone)]
pub struct LoadDataset {
    pub object: ObjectName,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LoadDataset {
    pub fn new(object: ObjectName, headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, EngineError> {
        for (index, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(EngineError::CsvParse(format!(
                    "{object}: row {index} has {} cells, expected {} (header count)",
                    row.len(),
                    headers.len()
                )));
            }
        }
        Ok(Self { object, headers, rows })
    }

    pub fn from_parsed(object: ObjectName, parsed: csvio::ParsedCsv) -> Result<Self, EngineError> {
        Self::new(object, parsed.headers, parsed.rows)
    }
}

/// A single field value, tagged so the transport layer can serialize per
/// field type without the engine knowing anything about JSON. Dates flow
/// through as plain strings rather than a dedicated variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

pub type Record = BTreeMap<String, FieldValue>;

/// Renders a field value as a CSV cell. `Null` becomes an empty string,
/// matching how an absent/omitted field round-trips through a load.
pub fn field_value_to_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Int(n) => n.to_string(),
        FieldValue::Float(n) => n.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::String(s) => s.clone(),
    }
}

/// A row converted into an outgoing record, still carrying its source id
/// so the driver can merge the id map once the create call returns.
#[derive(Debug, Clone)]
pub struct RecordIdPair {
    pub orig_id: String,
    pub record: Record,
}

/// Source id → target id, grown only, never overwritten. Backed by
/// `IndexMap` so reverse lookups (dump's reverse-rewrite) are
/// deterministic by insertion order.
#[derive(Debug, Clone, Default)]
pub struct IdMap(IndexMap<String, String>);

impl IdMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn seeded(initial: IndexMap<String, String>) -> Self {
        Self(initial)
    }

    pub fn has(&self, source_id: &str) -> bool {
        self.0.contains_key(source_id)
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.0.get(source_id).map(String::as_str)
    }

    /// Returns `true` iff the entry was newly inserted; an existing entry
    /// is left untouched, enforcing the "never overwritten" invariant.
    pub fn insert_if_absent(&mut self, source_id: impl Into<String>, target_id: impl Into<String>) -> bool {
        let source_id = source_id.into();
        if self.0.contains_key(&source_id) {
            false
        } else {
            self.0.insert(source_id, target_id.into());
            true
        }
    }

    pub fn merge_fragment(&mut self, fragment: IndexMap<String, String>) {
        for (source_id, target_id) in fragment {
            self.insert_if_absent(source_id, target_id);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Reverse of the forward map. When two source ids map to the same
    /// target id (possible via `defaultMapping`), the first one inserted
    /// into the forward map wins — see DESIGN.md.
    pub fn reversed(&self) -> IndexMap<String, String> {
        let mut reverse = IndexMap::new();
        for (source_id, target_id) in self.0.iter() {
            reverse.entry(target_id.clone()).or_insert_with(|| source_id.clone());
        }
        reverse
    }
}

/// Explicitly targeted source ids for an upload; empty means "everything
/// in scope". Mutated in place as propagation pulls in parents/children.
#[derive(Debug, Clone, Default)]
pub struct TargetIdSet(IndexSet<String>);

impl TargetIdSet {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    pub fn seeded(ids: impl IntoIterator<Item = String>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns `true` iff `id` was newly added.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }
}

#[derive(Debug, Clone)]
pub enum DefaultMapping {
    Literal(String),
    Query {
        condition: Option<String>,
        orderby: Option<String>,
        offset: Option<u64>,
    },
}

#[derive(Debug, Clone)]
pub struct MappingPolicy {
    pub object: ObjectName,
    pub key_fields: Vec<String>,
    pub default_mapping: Option<DefaultMapping>,
}

impl MappingPolicy {
    /// `{keyField: K}` is shorthand for a single-element `{keyFields: [K]}`.
    pub fn with_key_field(object: ObjectName, key_field: impl Into<String>) -> Self {
        Self {
            object,
            key_fields: vec![key_field.into()],
            default_mapping: None,
        }
    }

    pub fn with_key_fields(object: ObjectName, key_fields: Vec<String>) -> Self {
        Self {
            object,
            key_fields,
            default_mapping: None,
        }
    }

    pub fn with_default_mapping(mut self, default_mapping: DefaultMapping) -> Self {
        self.default_mapping = Some(default_mapping);
        self
    }
}

#[derive(Debug, Clone)]
pub struct BlockedRow {
    pub object: ObjectName,
    pub orig_id: String,
    pub blocking_field: String,
    pub blocking_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadSuccess {
    pub object: ObjectName,
    pub orig_id: String,
    pub target_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub object: ObjectName,
    pub orig_id: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadStatus {
    pub total_count: usize,
    pub successes: Vec<UploadSuccess>,
    pub failures: Vec<UploadFailure>,
    pub blocked: Vec<BlockedRow>,
    pub id_map: IdMap,
}

#[derive(Debug, Clone)]
pub enum FieldSelection {
    All,
    Explicit(Vec<String>),
    AllExcept(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTarget {
    Query,
    Related,
}

#[derive(Debug, Clone)]
pub struct DumpQuery {
    pub object: ObjectName,
    pub fields: FieldSelection,
    pub target: DumpTarget,
    pub condition: Option<String>,
    pub orderby: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub scope: Option<String>,
}

impl DumpQuery {
    pub fn seed(object: ObjectName) -> Self {
        Self {
            object,
            fields: FieldSelection::All,
            target: DumpTarget::Query,
            condition: None,
            orderby: None,
            limit: None,
            offset: None,
            scope: None,
        }
    }

    pub fn related(object: ObjectName) -> Self {
        Self {
            target: DumpTarget::Related,
            ..Self::seed(object)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub default_namespace: Option<String>,
    pub csv_parse_options: csvio::CsvParseOptions,
    pub id_map: Option<IdMap>,
    /// Explicitly targeted source ids; empty means "everything in scope".
    /// Seeds the driver's `TargetIdSet`, which then grows via propagation.
    pub target_ids: TargetIdSet,
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub default_namespace: Option<String>,
    pub max_fetch_size: u64,
    pub id_map: Option<IdMap>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            default_namespace: None,
            max_fetch_size: 10_000,
            id_map: None,
        }
    }
}

/// Coerces a cell through `FieldType`'s numeric policy; shared by the
/// converter. Returns `None` when the cell does not parse, signalling
/// "field omitted".
pub(crate) fn coerce_numeric(field_type: &FieldType, cell: &str) -> Option<FieldValue> {
    if !field_type.is_numeric() {
        return None;
    }
    match field_type {
        FieldType::Int => cell.trim().parse::<i64>().ok().map(FieldValue::Int),
        _ => cell.trim().parse::<f64>().ok().map(FieldValue::Float),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_equality_is_case_insensitive() {
        assert_eq!(ObjectName::new("Account"), ObjectName::new("account"));
        assert_ne!(ObjectName::new("Account"), ObjectName::new("Contact"));
    }

    #[test]
    fn id_map_never_overwrites() {
        let mut map = IdMap::new();
        assert!(map.insert_if_absent("A1", "001"));
        assert!(!map.insert_if_absent("A1", "002"));
        assert_eq!(map.get("A1"), Some("001"));
    }

    #[test]
    fn id_map_reverse_first_source_wins() {
        let mut map = IdMap::new();
        map.insert_if_absent("A1", "target-1");
        map.insert_if_absent("A2", "target-1");
        let reversed = map.reversed();
        assert_eq!(reversed.get("target-1"), Some(&"A1".to_string()));
    }

    #[test]
    fn mapping_policy_key_field_shorthand_matches_key_fields() {
        let a = MappingPolicy::with_key_field(ObjectName::new("Account"), "Name");
        let b = MappingPolicy::with_key_fields(ObjectName::new("Account"), vec!["Name".to_string()]);
        assert_eq!(a.key_fields, b.key_fields);
    }

    #[test]
    fn load_dataset_rejects_ragged_rows() {
        let err = LoadDataset::new(
            ObjectName::new("Account"),
            vec!["Id".to_string(), "Name".to_string()],
            vec![vec!["A1".to_string()]],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CsvParse(_)));
    }
}
