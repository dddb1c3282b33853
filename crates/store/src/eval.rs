//! In-memory evaluation of condition trees and sort keys, mirroring the
//! SQL the compiler emits so the memory backend and the row store agree.

use models::{
    AttributeCache, AttributeMetadata, ColumnFamily, CompareOp, Condition, Encoding, Error,
    PersistentRecord, Result, Scalar, ValueType,
};
use sqlgen::SortKey;
use std::cmp::Ordering;

/// Whether `record` satisfies `condition`. A key-value leaf is satisfied
/// when any stored value of its attribute passes the comparison, matching
/// the EXISTS shape of the compiled SQL.
pub fn matches(
    condition: &Condition,
    record: &PersistentRecord,
    attributes: &AttributeCache,
) -> Result<bool> {
    match condition {
        Condition::Composite { logic, children } => {
            // An empty composite is trivially true.
            if children.is_empty() {
                return Ok(true);
            }
            let mut verdict = matches!(logic, models::Logic::And);
            for child in children {
                let hit = matches(child, record, attributes)?;
                match logic {
                    models::Logic::And => verdict = verdict && hit,
                    models::Logic::Or => verdict = verdict || hit,
                }
            }
            Ok(verdict)
        }
        Condition::Kv { attr, value } => eval_leaf(attr, value, record, attributes),
    }
}

fn eval_leaf(
    attr: &str,
    value: &str,
    record: &PersistentRecord,
    attributes: &AttributeCache,
) -> Result<bool> {
    let meta = attributes
        .get(attr)
        .ok_or_else(|| Error::query("unknown attribute in condition").with_field(attr))?;
    let (op, literal) = CompareOp::parse(value);

    if op.is_like() && meta.value_type != ValueType::Text {
        return Err(Error::query(format!(
            "operator {} requires a text attribute",
            op.token()
        ))
        .with_field(attr));
    }
    if meta.value_type == ValueType::Bool
        && !matches!(op, CompareOp::Equals | CompareOp::NotEquals)
    {
        return Err(
            Error::query("bool attributes support only equals and not_equals").with_field(attr),
        );
    }

    if text_channel(meta) {
        let expect = text_literal(meta, literal).map_err(|err| err.with_field(attr))?;
        Ok(stored_texts(record, meta)
            .iter()
            .any(|stored| compare_text(op, stored, &expect)))
    } else {
        let expect = numeric_literal(meta, literal).map_err(|err| err.with_field(attr))?;
        Ok(stored_numbers(record, meta)
            .iter()
            .any(|stored| compare_num(op, *stored, expect)))
    }
}

/// Whether comparisons for this attribute run over text values.
fn text_channel(meta: &AttributeMetadata) -> bool {
    match &meta.binding {
        Some(binding) => matches!(
            binding.family(),
            Some(ColumnFamily::Text) | Some(ColumnFamily::Uuid)
        ),
        None => meta.value_type.eav_slot_is_text(),
    }
}

fn text_literal(meta: &AttributeMetadata, literal: &str) -> Result<String> {
    let encoding = meta
        .binding
        .as_ref()
        .map(|b| b.encoding)
        .unwrap_or(Encoding::Default);
    Ok(match (meta.value_type, encoding) {
        (ValueType::Text, _) => literal.to_string(),
        (ValueType::Uuid, _) => match Scalar::coerce(
            &serde_json::Value::String(literal.to_string()),
            ValueType::Uuid,
        )? {
            Scalar::Uuid(u) => u.hyphenated().to_string(),
            _ => literal.to_string(),
        },
        (ValueType::Date | ValueType::DateTime, _) => match Scalar::coerce(
            &serde_json::Value::String(literal.to_string()),
            meta.value_type,
        )? {
            Scalar::Date(ms) => models::ms_to_rfc3339(ms)?,
            _ => literal.to_string(),
        },
        (ValueType::Bool, _) => match Scalar::coerce(
            &serde_json::Value::String(literal.to_string()),
            ValueType::Bool,
        )? {
            Scalar::Bool(b) => if b { "1" } else { "0" }.to_string(),
            _ => literal.to_string(),
        },
        _ => literal.to_string(),
    })
}

fn numeric_literal(meta: &AttributeMetadata, literal: &str) -> Result<f64> {
    let scalar = Scalar::coerce(
        &serde_json::Value::String(literal.to_string()),
        meta.value_type,
    )?;
    match scalar.encode_eav() {
        (_, Some(numeric)) => Ok(numeric),
        _ => Err(Error::query(format!("{literal:?} is not comparable numerically"))),
    }
}

fn stored_texts(record: &PersistentRecord, meta: &AttributeMetadata) -> Vec<String> {
    match &meta.binding {
        Some(binding) => record
            .text_items
            .get(&binding.col_name)
            .cloned()
            .into_iter()
            .collect(),
        None => record
            .other_attributes
            .iter()
            .filter(|row| row.attr_id == meta.attr_id)
            .filter_map(|row| row.value_text.clone())
            .collect(),
    }
}

fn stored_numbers(record: &PersistentRecord, meta: &AttributeMetadata) -> Vec<f64> {
    match &meta.binding {
        Some(binding) => {
            let col = binding.col_name.as_str();
            match binding.family() {
                Some(ColumnFamily::SmallInt) => {
                    record.int16_items.get(col).map(|v| *v as f64)
                }
                Some(ColumnFamily::Integer) => {
                    record.int32_items.get(col).map(|v| *v as f64)
                }
                Some(ColumnFamily::BigInt) => record.int64_items.get(col).map(|v| *v as f64),
                Some(ColumnFamily::Double) => record.float64_items.get(col).copied(),
                _ => None,
            }
            .into_iter()
            .collect()
        }
        None => record
            .other_attributes
            .iter()
            .filter(|row| row.attr_id == meta.attr_id)
            .filter_map(|row| row.value_numeric)
            .collect(),
    }
}

fn compare_text(op: CompareOp, stored: &str, expect: &str) -> bool {
    match op {
        CompareOp::Equals => stored == expect,
        CompareOp::NotEquals => stored != expect,
        CompareOp::Gt => stored > expect,
        CompareOp::Gte => stored >= expect,
        CompareOp::Lt => stored < expect,
        CompareOp::Lte => stored <= expect,
        CompareOp::StartsWith => stored.starts_with(expect),
        CompareOp::Contains => stored.contains(expect),
    }
}

fn compare_num(op: CompareOp, stored: f64, expect: f64) -> bool {
    match op {
        CompareOp::Equals => stored == expect,
        CompareOp::NotEquals => stored != expect,
        CompareOp::Gt => stored > expect,
        CompareOp::Gte => stored >= expect,
        CompareOp::Lt => stored < expect,
        CompareOp::Lte => stored <= expect,
        CompareOp::StartsWith | CompareOp::Contains => false,
    }
}

/// One record's value for a sort key, with SQL null ordering semantics.
#[derive(Debug, Clone, PartialEq)]
enum SortVal {
    Text(String),
    Num(f64),
    Null,
}

fn sort_value(record: &PersistentRecord, key: &SortKey) -> SortVal {
    match key {
        SortKey::Main { col_name, .. } => match ColumnFamily::of(col_name) {
            Some(ColumnFamily::Text) | Some(ColumnFamily::Uuid) => record
                .text_items
                .get(col_name)
                .map(|v| SortVal::Text(v.clone()))
                .unwrap_or(SortVal::Null),
            Some(ColumnFamily::SmallInt) => record
                .int16_items
                .get(col_name)
                .map(|v| SortVal::Num(*v as f64))
                .unwrap_or(SortVal::Null),
            Some(ColumnFamily::Integer) => record
                .int32_items
                .get(col_name)
                .map(|v| SortVal::Num(*v as f64))
                .unwrap_or(SortVal::Null),
            Some(ColumnFamily::BigInt) => record
                .int64_items
                .get(col_name)
                .map(|v| SortVal::Num(*v as f64))
                .unwrap_or(SortVal::Null),
            Some(ColumnFamily::Double) => record
                .float64_items
                .get(col_name)
                .map(|v| SortVal::Num(*v))
                .unwrap_or(SortVal::Null),
            None => SortVal::Null,
        },
        SortKey::Eav {
            attr_id, text_slot, ..
        } => {
            // First row by array position, as the SQL subquery does.
            let row = record
                .other_attributes
                .iter()
                .filter(|row| row.attr_id == *attr_id)
                .min_by(|a, b| a.array_indices.cmp(&b.array_indices));
            match row {
                Some(row) if *text_slot => row
                    .value_text
                    .clone()
                    .map(SortVal::Text)
                    .unwrap_or(SortVal::Null),
                Some(row) => row
                    .value_numeric
                    .map(SortVal::Num)
                    .unwrap_or(SortVal::Null),
                None => SortVal::Null,
            }
        }
    }
}

fn compare_sort_vals(a: &SortVal, b: &SortVal) -> Ordering {
    match (a, b) {
        // NULLS LAST.
        (SortVal::Null, SortVal::Null) => Ordering::Equal,
        (SortVal::Null, _) => Ordering::Greater,
        (_, SortVal::Null) => Ordering::Less,
        (SortVal::Text(a), SortVal::Text(b)) => a.cmp(b),
        (SortVal::Num(a), SortVal::Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        // Mixed channels cannot arise from one key; order arbitrarily.
        (SortVal::Text(_), SortVal::Num(_)) => Ordering::Greater,
        (SortVal::Num(_), SortVal::Text(_)) => Ordering::Less,
    }
}

/// Order records by the resolved sort keys with `row_id` as the final
/// tie-break, matching the hot query template.
pub fn sort_records(records: &mut [PersistentRecord], sort: &[SortKey]) {
    records.sort_by(|a, b| {
        for key in sort {
            let descending = match key {
                SortKey::Main { descending, .. } | SortKey::Eav { descending, .. } => *descending,
            };
            let (va, vb) = (sort_value(a, key), sort_value(b, key));
            // Nulls stay last regardless of direction.
            let ordering = match (&va, &vb, descending) {
                (SortVal::Null, _, _) | (_, SortVal::Null, _) | (_, _, false) => {
                    compare_sort_vals(&va, &vb)
                }
                (_, _, true) => compare_sort_vals(&vb, &va),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.row_id.cmp(&b.row_id)
    });
}
