use crate::splice::splice;
use itertools::Itertools;
use models::{
    id, AttrId, AttributeCache, AttributeMetadata, ColumnBinding, EavRecord, Encoding, Error,
    PersistentRecord, Result, Scalar, SchemaId, ValueType,
};
use serde_json::{Map, Number, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Converts JSON documents into [`PersistentRecord`]s and back, driven by
/// one schema's attribute catalog.
///
/// The forward direction walks the document depth-first in sorted key
/// order, so a given document always flattens to the same rows.
pub struct Transformer<'a> {
    schema_id: SchemaId,
    attributes: &'a AttributeCache,
}

impl<'a> Transformer<'a> {
    pub fn new(schema_id: SchemaId, attributes: &'a AttributeCache) -> Self {
        Self {
            schema_id,
            attributes,
        }
    }

    /// Flatten a JSON document into its dual physical representation.
    /// Null leaves are dropped; every other leaf must resolve to a known
    /// attribute.
    pub fn to_record(&self, row_id: Uuid, doc: &Value) -> Result<PersistentRecord> {
        let Value::Object(map) = doc else {
            return Err(Error::validation("document must be a JSON object"));
        };
        let mut record = PersistentRecord::new(self.schema_id, row_id);
        let mut path = Vec::new();
        let mut indices = Vec::new();
        self.flatten_object(map, &mut path, &mut indices, &mut record)?;
        Ok(record)
    }

    fn flatten_object<'v>(
        &self,
        map: &'v Map<String, Value>,
        path: &mut Vec<&'v str>,
        indices: &mut Vec<usize>,
        record: &mut PersistentRecord,
    ) -> Result<()> {
        let mut keys: Vec<&'v String> = map.keys().collect();
        keys.sort();
        for key in keys {
            path.push(key.as_str());
            self.flatten_value(&map[key.as_str()], path, indices, record)?;
            path.pop();
        }
        Ok(())
    }

    fn flatten_value<'v>(
        &self,
        value: &'v Value,
        path: &mut Vec<&'v str>,
        indices: &mut Vec<usize>,
        record: &mut PersistentRecord,
    ) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Object(map) => self.flatten_object(map, path, indices, record),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    indices.push(i);
                    self.flatten_value(item, path, indices, record)?;
                    indices.pop();
                }
                Ok(())
            }
            scalar => self.flatten_scalar(scalar, path, indices, record),
        }
    }

    fn flatten_scalar(
        &self,
        value: &Value,
        path: &[&str],
        indices: &[usize],
        record: &mut PersistentRecord,
    ) -> Result<()> {
        let attr_name = path.join(".");
        let meta = self.attributes.get(&attr_name).ok_or_else(|| {
            Error::validation("unknown attribute").with_field(&attr_name)
        })?;
        let scalar = Scalar::coerce(value, meta.value_type)
            .map_err(|err| err.with_field(&attr_name))?;

        match &meta.binding {
            Some(binding) if indices.is_empty() => {
                let main = scalar
                    .encode_main(meta.value_type, binding)
                    .map_err(|err| err.with_field(&attr_name))?;
                record.insert_main(binding.col_name.clone(), main);
            }
            Some(_) => {
                return Err(Error::validation(
                    "attribute is bound to a main column and cannot repeat inside arrays",
                )
                .with_field(&attr_name));
            }
            None => {
                let (value_text, value_numeric) = scalar.encode_eav();
                record.other_attributes.push(EavRecord {
                    schema_id: self.schema_id,
                    row_id: record.row_id,
                    attr_id: meta.attr_id,
                    array_indices: indices.iter().join(","),
                    value_text,
                    value_numeric,
                });
            }
        }
        Ok(())
    }

    /// Rebuild the JSON document of a record: main columns are decoded per
    /// their encoding, EAV rows are spliced back through their recorded
    /// array positions.
    pub fn from_record(&self, record: &PersistentRecord) -> Result<Value> {
        let mut root = Map::new();

        for (attr_name, meta) in self.attributes {
            let Some(binding) = &meta.binding else {
                continue;
            };
            let Some(decoded) = decode_main(record, meta, binding)? else {
                continue;
            };
            let segments: Vec<&str> = attr_name.split('.').collect();
            splice(&mut root, &segments, &[], decoded)
                .map_err(|err| err.with_field(attr_name))?;
        }

        let by_id = self.attrs_by_id();
        let mut rows = Vec::with_capacity(record.other_attributes.len());
        for row in &record.other_attributes {
            let (attr_name, meta) = by_id.get(&row.attr_id).ok_or_else(|| {
                Error::validation(format!(
                    "EAV row references unknown attribute id {}",
                    row.attr_id
                ))
            })?;
            let indices = parse_indices(&row.array_indices)
                .map_err(|err| err.with_field(*attr_name))?;
            rows.push((*attr_name, indices, row, *meta));
        }
        // Deterministic splice order: by attribute, then by position.
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        for (attr_name, indices, row, meta) in rows {
            let decoded = decode_eav(row, meta).map_err(|err| err.with_field(attr_name))?;
            let segments: Vec<&str> = attr_name.split('.').collect();
            splice(&mut root, &segments, &indices, decoded)
                .map_err(|err| err.with_field(attr_name))?;
        }
        Ok(Value::Object(root))
    }

    /// Transform a batch of documents. Each row id comes from a top-level
    /// `id` holding a UUID (canonical or base32), else a fresh v7 id.
    /// An undeclared `id` field is consumed by the addressing and not
    /// stored as an attribute.
    pub fn batch_to(&self, docs: &[Value]) -> Result<Vec<PersistentRecord>> {
        docs.iter()
            .map(|doc| {
                let mut doc = doc.clone();
                let row_id = doc
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(parse_row_id)
                    .unwrap_or_else(id::new_row_id);
                if !self.attributes.contains_key("id") {
                    if let Value::Object(map) = &mut doc {
                        map.remove("id");
                    }
                }
                self.to_record(row_id, &doc)
            })
            .collect()
    }

    /// Transform records back to documents, grouping duplicates of the
    /// same row id first and keeping the freshest copy of each.
    pub fn batch_from(&self, records: &[PersistentRecord]) -> Result<Vec<Value>> {
        let mut order: Vec<Uuid> = Vec::new();
        let mut freshest: BTreeMap<Uuid, &PersistentRecord> = BTreeMap::new();
        for record in records {
            match freshest.entry(record.row_id) {
                Entry::Vacant(entry) => {
                    order.push(record.row_id);
                    entry.insert(record);
                }
                Entry::Occupied(mut entry) => {
                    if record.updated_at > entry.get().updated_at {
                        entry.insert(record);
                    }
                }
            }
        }
        order
            .into_iter()
            .map(|row_id| self.from_record(freshest[&row_id]))
            .collect()
    }

    fn attrs_by_id(&self) -> BTreeMap<AttrId, (&'a String, &'a AttributeMetadata)> {
        self.attributes
            .iter()
            .map(|(name, meta)| (meta.attr_id, (name, meta)))
            .collect()
    }
}

/// Accept a row id in canonical UUID or base32 form.
pub fn parse_row_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw)
        .ok()
        .or_else(|| id::decode_uuid(raw).ok())
}

fn parse_indices(raw: &str) -> Result<Vec<usize>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|part| {
            part.parse::<usize>().map_err(|_| {
                Error::validation(format!("malformed array indices {raw:?}"))
            })
        })
        .collect()
}

fn decode_main(
    record: &PersistentRecord,
    meta: &AttributeMetadata,
    binding: &ColumnBinding,
) -> Result<Option<Value>> {
    let col = binding.col_name.as_str();
    let decoded = match (meta.value_type, binding.encoding) {
        (ValueType::Text | ValueType::Uuid, Encoding::Default) => {
            record.text_items.get(col).cloned().map(Value::String)
        }
        (ValueType::SmallInt, Encoding::Default) => record
            .int16_items
            .get(col)
            .map(|v| Value::Number(Number::from(*v))),
        (ValueType::Integer, Encoding::Default) => record
            .int32_items
            .get(col)
            .map(|v| Value::Number(Number::from(*v))),
        (ValueType::BigInt, Encoding::Default) => record
            .int64_items
            .get(col)
            .map(|v| Value::Number(Number::from(*v))),
        (ValueType::Numeric, Encoding::Default) => match record.float64_items.get(col) {
            Some(v) => Some(Value::Number(Number::from_f64(*v).ok_or_else(|| {
                Error::internal(format!("column {col} holds a non-finite number"))
            })?)),
            None => None,
        },
        (ValueType::Date | ValueType::DateTime, Encoding::UnixMs) => {
            match record.int64_items.get(col) {
                Some(ms) => Some(Value::String(models::ms_to_rfc3339(*ms)?)),
                None => None,
            }
        }
        (ValueType::Date | ValueType::DateTime, Encoding::Iso8601) => {
            record.text_items.get(col).cloned().map(Value::String)
        }
        (ValueType::Bool, Encoding::BoolSmallInt) => record
            .int16_items
            .get(col)
            .map(|v| Value::Bool(*v != 0)),
        (ValueType::Bool, Encoding::BoolText) => record
            .text_items
            .get(col)
            .map(|v| Value::Bool(v == "1")),
        (value_type, encoding) => {
            return Err(Error::internal(format!(
                "column {col} has unsupported decode ({}, {encoding:?})",
                value_type.as_str()
            )));
        }
    };
    Ok(decoded)
}

fn decode_eav(row: &EavRecord, meta: &AttributeMetadata) -> Result<Value> {
    let text = || {
        row.value_text.clone().ok_or_else(|| {
            Error::internal("EAV row is missing its text slot")
        })
    };
    let numeric = || {
        row.value_numeric.ok_or_else(|| {
            Error::internal("EAV row is missing its numeric slot")
        })
    };

    Ok(match meta.value_type {
        ValueType::Text | ValueType::Uuid => Value::String(text()?),
        ValueType::SmallInt | ValueType::Integer | ValueType::BigInt => {
            Value::Number(Number::from(numeric()? as i64))
        }
        ValueType::Numeric => {
            let v = numeric()?;
            Value::Number(Number::from_f64(v).ok_or_else(|| {
                Error::internal("EAV row holds a non-finite number")
            })?)
        }
        ValueType::Date | ValueType::DateTime => {
            Value::String(models::ms_to_rfc3339(numeric()? as i64)?)
        }
        ValueType::Bool => Value::Bool(numeric()? > 0.5),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn person_attributes() -> AttributeCache {
        fn main(
            attr_id: AttrId,
            value_type: ValueType,
            col: &str,
            encoding: Encoding,
        ) -> AttributeMetadata {
            AttributeMetadata {
                attr_id,
                value_type,
                binding: Some(ColumnBinding {
                    col_name: col.to_string(),
                    encoding,
                }),
            }
        }
        fn eav(attr_id: AttrId, value_type: ValueType) -> AttributeMetadata {
            AttributeMetadata {
                attr_id,
                value_type,
                binding: None,
            }
        }

        [
            ("name", main(1, ValueType::Text, "text_01", Encoding::Default)),
            ("active", main(2, ValueType::Bool, "text_02", Encoding::BoolText)),
            ("contact.name", main(3, ValueType::Text, "text_03", Encoding::Default)),
            ("age", main(4, ValueType::Integer, "integer_01", Encoding::Default)),
            ("born", main(5, ValueType::DateTime, "bigint_01", Encoding::UnixMs)),
            ("score", main(6, ValueType::Numeric, "double_01", Encoding::Default)),
            ("flag", main(7, ValueType::Bool, "smallint_01", Encoding::BoolSmallInt)),
            ("device", main(8, ValueType::Uuid, "uuid_01", Encoding::Default)),
            ("tags", eav(20, ValueType::Text)),
            ("jobs.title", eav(21, ValueType::Text)),
            ("jobs.level", eav(22, ValueType::Integer)),
            ("notes", eav(23, ValueType::Text)),
            ("visits", eav(24, ValueType::DateTime)),
        ]
        .into_iter()
        .map(|(name, meta)| (name.to_string(), meta))
        .collect()
    }

    fn row_id() -> Uuid {
        Uuid::parse_str("01890a5d-ac96-774b-bcce-b302099a8057").unwrap()
    }

    #[test]
    fn test_flatten_nested_arrays() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let doc = json!({
            "tags": ["a", "b"],
            "jobs": [{"title": "x"}, {"title": "y"}],
        });
        let record = transformer.to_record(row_id(), &doc).unwrap();

        assert_eq!(record.main_len(), 0);
        let rows: Vec<(AttrId, &str, Option<&str>)> = record
            .other_attributes
            .iter()
            .map(|r| (r.attr_id, r.array_indices.as_str(), r.value_text.as_deref()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (21, "0", Some("x")),
                (21, "1", Some("y")),
                (20, "0", Some("a")),
                (20, "1", Some("b")),
            ]
        );

        // Reverse yields the original object exactly.
        assert_eq!(transformer.from_record(&record).unwrap(), doc);
    }

    #[test]
    fn test_main_column_routing() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let doc = json!({
            "name": "Alice",
            "active": true,
            "age": 30,
            "born": "2021-03-04T05:06:07.000Z",
            "score": 9.5,
            "flag": false,
            "device": "f81d4fae-7dec-11d0-a765-00a0c91e6bf6",
            "contact": {"name": "desk"},
        });
        let record = transformer.to_record(row_id(), &doc).unwrap();

        assert_eq!(record.text_items["text_01"], "Alice");
        assert_eq!(record.text_items["text_02"], "1");
        assert_eq!(record.text_items["text_03"], "desk");
        assert_eq!(
            record.text_items["uuid_01"],
            "f81d4fae-7dec-11d0-a765-00a0c91e6bf6"
        );
        assert_eq!(record.int32_items["integer_01"], 30);
        assert_eq!(record.int64_items["bigint_01"], 1614834367000);
        assert_eq!(record.float64_items["double_01"], 9.5);
        assert_eq!(record.int16_items["smallint_01"], 0);
        assert!(record.other_attributes.is_empty());

        // Dates come back formatted per the bound encoding; bools as bools.
        assert_eq!(transformer.from_record(&record).unwrap(), doc);
    }

    #[test]
    fn test_mixed_main_and_eav_round_trip() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let doc = json!({
            "name": "Bo",
            "jobs": [{"level": 1, "title": "x"}, {"level": 2, "title": "y"}],
            "notes": "n",
            "visits": ["2021-03-04T00:00:00.000Z", "2022-05-06T00:00:00.000Z"],
        });
        let record = transformer.to_record(row_id(), &doc).unwrap();
        assert_eq!(record.main_len(), 1);
        assert_eq!(record.other_attributes.len(), 7);

        // Date-typed EAV values land in the numeric slot as epoch ms.
        let visit = record
            .other_attributes
            .iter()
            .find(|r| r.attr_id == 24 && r.array_indices == "0")
            .unwrap();
        assert_eq!(visit.value_numeric, Some(1614816000000.0));
        assert_eq!(visit.value_text, None);

        assert_eq!(transformer.from_record(&record).unwrap(), doc);
    }

    #[test]
    fn test_unknown_attribute_fails_with_context() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let err = transformer
            .to_record(row_id(), &json!({"contact": {"fax": "1"}}))
            .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Validation);
        assert_eq!(err.field(), Some("contact.fax"));
    }

    #[test]
    fn test_null_leaves_are_dropped() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let record = transformer
            .to_record(row_id(), &json!({"name": "A", "notes": null}))
            .unwrap();
        assert_eq!(record.main_len(), 1);
        assert!(record.other_attributes.is_empty());
    }

    #[test]
    fn test_main_bound_attribute_rejected_inside_array() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let err = transformer
            .to_record(row_id(), &json!({"name": ["A", "B"]}))
            .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Validation);
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_type_mismatch_fails_with_context() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let err = transformer
            .to_record(row_id(), &json!({"age": "not a number"}))
            .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Validation);
        assert_eq!(err.field(), Some("age"));
    }

    #[test]
    fn test_batch_to_derives_row_ids() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let canonical = "01890a5d-ac96-774b-bcce-b302099a8057";
        let base32 = id::encode_uuid(&Uuid::parse_str(canonical).unwrap());
        let docs = vec![
            json!({"id": canonical, "name": "A"}),
            json!({"id": base32, "name": "B"}),
            json!({"name": "C"}),
            json!({"id": "not-an-id", "name": "D"}),
        ];
        let records = transformer.batch_to(&docs).unwrap();

        assert_eq!(records[0].row_id, Uuid::parse_str(canonical).unwrap());
        assert_eq!(records[1].row_id, records[0].row_id);
        // Underivable ids get fresh v7 ids; the id field is never stored.
        assert_eq!(records[2].row_id.get_version_num(), 7);
        assert_eq!(records[3].row_id.get_version_num(), 7);
        for record in &records {
            assert_eq!(record.main_len(), 1);
            assert!(record.other_attributes.is_empty());
        }
    }

    #[test]
    fn test_batch_from_groups_by_row_id() {
        let attributes = person_attributes();
        let transformer = Transformer::new(100, &attributes);

        let mut stale = transformer
            .to_record(row_id(), &json!({"name": "old"}))
            .unwrap();
        stale.updated_at = 100;
        let mut fresh = transformer
            .to_record(row_id(), &json!({"name": "new"}))
            .unwrap();
        fresh.updated_at = 200;
        let other = transformer
            .to_record(Uuid::nil(), &json!({"name": "other"}))
            .unwrap();

        let docs = transformer
            .batch_from(&[stale, other, fresh])
            .unwrap();
        assert_eq!(
            docs,
            vec![json!({"name": "new"}), json!({"name": "other"})]
        );
    }
}
