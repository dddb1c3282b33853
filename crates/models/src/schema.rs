use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier of a schema. Assigned once and never re-used.
pub type SchemaId = i16;

/// Stable identifier of an attribute within its schema.
pub type AttrId = i16;

/// Logical type of an attribute value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Date,
    DateTime,
    Uuid,
    Bool,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::SmallInt => "smallint",
            ValueType::Integer => "integer",
            ValueType::BigInt => "bigint",
            ValueType::Numeric => "numeric",
            ValueType::Date => "date",
            ValueType::DateTime => "datetime",
            ValueType::Uuid => "uuid",
            ValueType::Bool => "bool",
        }
    }

    /// Whether EAV rows carry this type in `value_text` (true) or
    /// `value_numeric` (false).
    pub fn eav_slot_is_text(&self) -> bool {
        matches!(self, ValueType::Text | ValueType::Uuid)
    }
}

/// How a logical value maps into a column whose natural type differs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Default,
    UnixMs,
    Iso8601,
    BoolSmallInt,
    BoolText,
}

/// Families of the fixed physical column pool in the hot table.
/// Column names are `<family>_NN`, e.g. `text_01` or `bigint_04`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnFamily {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Uuid,
}

impl ColumnFamily {
    /// Parse the family out of a physical column name.
    pub fn of(col_name: &str) -> Option<ColumnFamily> {
        let (prefix, suffix) = col_name.rsplit_once('_')?;
        if suffix.len() != 2 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match prefix {
            "text" => Some(ColumnFamily::Text),
            "smallint" => Some(ColumnFamily::SmallInt),
            "integer" => Some(ColumnFamily::Integer),
            "bigint" => Some(ColumnFamily::BigInt),
            "double" => Some(ColumnFamily::Double),
            "uuid" => Some(ColumnFamily::Uuid),
            _ => None,
        }
    }
}

/// Binding of an attribute to one column of the physical pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub col_name: String,
    #[serde(default)]
    pub encoding: Encoding,
}

impl ColumnBinding {
    pub fn family(&self) -> Option<ColumnFamily> {
        ColumnFamily::of(&self.col_name)
    }
}

/// Per-attribute metadata from a schema's attribute catalog file.
/// The wire shape matches `<schema>_attributes.json` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    #[serde(rename = "attributeID")]
    pub attr_id: AttrId,
    #[serde(rename = "valueType")]
    pub value_type: ValueType,
    #[serde(rename = "column_binding", default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<ColumnBinding>,
}

impl AttributeMetadata {
    /// Whether values of this attribute land in a main column (vs EAV rows).
    pub fn is_main(&self) -> bool {
        self.binding.is_some()
    }

    /// Verify that the binding targets a real pool column whose family is
    /// compatible with `(value_type, encoding)`. An encoding is required
    /// exactly when the natural type does not match the column family.
    pub fn validate(&self, attr_name: &str) -> Result<()> {
        let Some(binding) = &self.binding else {
            return Ok(());
        };
        let Some(family) = binding.family() else {
            return Err(Error::validation(format!(
                "column binding {:?} is not a pool column",
                binding.col_name
            ))
            .with_field(attr_name));
        };

        use ColumnFamily as F;
        use Encoding as E;
        use ValueType as V;

        let ok = match (self.value_type, family, binding.encoding) {
            (V::Text, F::Text, E::Default) => true,
            (V::SmallInt, F::SmallInt, E::Default) => true,
            (V::Integer, F::Integer, E::Default) => true,
            (V::BigInt, F::BigInt, E::Default) => true,
            (V::Numeric, F::Double, E::Default) => true,
            (V::Uuid, F::Uuid, E::Default) => true,
            (V::Uuid, F::Text, E::Default) => true,
            (V::Date | V::DateTime, F::BigInt, E::UnixMs) => true,
            (V::Date | V::DateTime, F::Text, E::Iso8601) => true,
            (V::Bool, F::SmallInt, E::BoolSmallInt) => true,
            (V::Bool, F::Text, E::BoolText) => true,
            _ => false,
        };
        if !ok {
            return Err(Error::validation(format!(
                "value type {} cannot bind to column {:?} with encoding {:?}",
                self.value_type.as_str(),
                binding.col_name,
                binding.encoding,
            ))
            .with_field(attr_name));
        }
        Ok(())
    }
}

/// Maps dotted attribute names to their metadata for one schema.
pub type AttributeCache = BTreeMap<String, AttributeMetadata>;

/// A named schema and its attribute catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: SchemaId,
    pub schema_name: String,
    pub attributes: AttributeCache,
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta(value_type: ValueType, col: &str, encoding: Encoding) -> AttributeMetadata {
        AttributeMetadata {
            attr_id: 1,
            value_type,
            binding: Some(ColumnBinding {
                col_name: col.to_string(),
                encoding,
            }),
        }
    }

    #[test]
    fn test_column_family_parse() {
        assert_eq!(ColumnFamily::of("text_01"), Some(ColumnFamily::Text));
        assert_eq!(ColumnFamily::of("bigint_12"), Some(ColumnFamily::BigInt));
        assert_eq!(ColumnFamily::of("double_07"), Some(ColumnFamily::Double));
        assert_eq!(ColumnFamily::of("uuid_02"), Some(ColumnFamily::Uuid));
        assert_eq!(ColumnFamily::of("text_1"), None);
        assert_eq!(ColumnFamily::of("text01"), None);
        assert_eq!(ColumnFamily::of("varchar_01"), None);
    }

    #[test]
    fn test_binding_validation() {
        // Natural bindings require no encoding.
        assert!(meta(ValueType::Text, "text_01", Encoding::Default)
            .validate("a")
            .is_ok());
        assert!(meta(ValueType::Numeric, "double_01", Encoding::Default)
            .validate("a")
            .is_ok());
        // A date in a bigint column requires unix_ms.
        assert!(meta(ValueType::Date, "bigint_01", Encoding::UnixMs)
            .validate("a")
            .is_ok());
        assert!(meta(ValueType::Date, "bigint_01", Encoding::Default)
            .validate("a")
            .is_err());
        // Bools bind through either encoded form, never bare.
        assert!(meta(ValueType::Bool, "smallint_01", Encoding::BoolSmallInt)
            .validate("a")
            .is_ok());
        assert!(meta(ValueType::Bool, "text_01", Encoding::BoolText)
            .validate("a")
            .is_ok());
        assert!(meta(ValueType::Bool, "smallint_01", Encoding::Default)
            .validate("a")
            .is_err());
        // Type and family must agree.
        assert!(meta(ValueType::Integer, "bigint_01", Encoding::Default)
            .validate("a")
            .is_err());
    }

    #[test]
    fn test_attribute_metadata_wire_shape() {
        let parsed: AttributeMetadata = serde_json::from_str(
            r#"{"attributeID": 7, "valueType": "datetime",
                "column_binding": {"col_name": "bigint_02", "encoding": "unix_ms"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.attr_id, 7);
        assert_eq!(parsed.value_type, ValueType::DateTime);
        assert_eq!(
            parsed.binding.as_ref().unwrap().encoding,
            Encoding::UnixMs
        );

        // Unbound attributes omit the binding entirely.
        let parsed: AttributeMetadata =
            serde_json::from_str(r#"{"attributeID": 8, "valueType": "text"}"#).unwrap();
        assert!(parsed.binding.is_none());
    }
}
