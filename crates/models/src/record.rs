use crate::{AttrId, MainValue, SchemaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Composite key identifying one entity row across storage tiers.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RowKey {
    pub schema_id: SchemaId,
    pub row_id: Uuid,
}

/// One scalar leaf routed to the overflow EAV table.
/// `(schema_id, row_id, attr_id, array_indices)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EavRecord {
    pub schema_id: SchemaId,
    pub row_id: Uuid,
    pub attr_id: AttrId,
    /// Comma-joined array positions on the path to this leaf.
    /// Empty when no arrays were traversed.
    #[serde(default)]
    pub array_indices: String,
    #[serde(default)]
    pub value_text: Option<String>,
    #[serde(default)]
    pub value_numeric: Option<f64>,
}

impl EavRecord {
    /// Dedup key of this row within its record.
    pub fn attr_key(&self) -> (AttrId, &str) {
        (self.attr_id, &self.array_indices)
    }
}

/// One entity in its dual physical representation: typed main-column maps
/// plus overflow EAV rows. Exactly one of the two holds any given value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    pub schema_id: SchemaId,
    pub row_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub text_items: BTreeMap<String, String>,
    pub int16_items: BTreeMap<String, i16>,
    pub int32_items: BTreeMap<String, i32>,
    pub int64_items: BTreeMap<String, i64>,
    pub float64_items: BTreeMap<String, f64>,
    pub other_attributes: Vec<EavRecord>,
}

impl PersistentRecord {
    pub fn new(schema_id: SchemaId, row_id: Uuid) -> Self {
        Self {
            schema_id,
            row_id,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            text_items: BTreeMap::new(),
            int16_items: BTreeMap::new(),
            int32_items: BTreeMap::new(),
            int64_items: BTreeMap::new(),
            float64_items: BTreeMap::new(),
            other_attributes: Vec::new(),
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey {
            schema_id: self.schema_id,
            row_id: self.row_id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Route a coerced main-column value into its typed map.
    pub fn insert_main(&mut self, col_name: impl Into<String>, value: MainValue) {
        match value {
            MainValue::Text(v) => {
                self.text_items.insert(col_name.into(), v);
            }
            MainValue::I16(v) => {
                self.int16_items.insert(col_name.into(), v);
            }
            MainValue::I32(v) => {
                self.int32_items.insert(col_name.into(), v);
            }
            MainValue::I64(v) => {
                self.int64_items.insert(col_name.into(), v);
            }
            MainValue::F64(v) => {
                self.float64_items.insert(col_name.into(), v);
            }
        }
    }

    /// Total count of populated main columns.
    pub fn main_len(&self) -> usize {
        self.text_items.len()
            + self.int16_items.len()
            + self.int32_items.len()
            + self.int64_items.len()
            + self.float64_items.len()
    }
}

/// Mutation journal row. `flushed_at = 0` marks the mutation as dirty:
/// not yet rolled into the columnar tier, so the hot row is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogRow {
    pub schema_id: SchemaId,
    pub row_id: Uuid,
    pub changed_at: i64,
    pub deleted_at: Option<i64>,
    pub flushed_at: i64,
}

impl ChangeLogRow {
    pub fn is_dirty(&self) -> bool {
        self.flushed_at == 0
    }
}
