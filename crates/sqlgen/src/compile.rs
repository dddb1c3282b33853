use crate::{quote_attr, Dialect, Fragment, SqlBuilder, SqlValue};
use models::{
    ms_to_rfc3339, AttributeCache, AttributeMetadata, ColumnBinding, CompareOp, Condition,
    Encoding, Error, Logic, Result, Scalar, ValueType,
};

/// Pushdown accounting, reported to the execution plan.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct PushdownStats {
    pub pushdown_leaves: usize,
    pub total_leaves: usize,
}

impl PushdownStats {
    pub fn ratio(&self) -> f64 {
        if self.total_leaves == 0 {
            1.0
        } else {
            self.pushdown_leaves as f64 / self.total_leaves as f64
        }
    }
}

/// Both fragments produced by one compilation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub hot: Fragment,
    pub cold: Fragment,
    pub stats: PushdownStats,
}

/// Compile a condition against one schema's catalog into the hot (`$n`)
/// and cold (`?`) WHERE fragments.
pub fn compile_pair(
    condition: &Condition,
    attributes: &AttributeCache,
    eav_table: &str,
) -> Result<CompiledCondition> {
    let compiler = ConditionCompiler::new(attributes, eav_table);

    let mut hot = SqlBuilder::new(Dialect::Pg);
    let stats = compiler.hot(condition, &mut hot)?;
    let mut cold = SqlBuilder::new(Dialect::Duck);
    compile_cold(condition, attributes, &mut cold)?;

    Ok(CompiledCondition {
        hot: hot.finish(),
        cold: cold.finish(),
        stats,
    })
}

/// Compiles condition trees for one schema. Classification is metadata
/// directed and deterministic: a leaf pushes down exactly when its
/// attribute is bound to a main column, and falls back to an EAV
/// existence predicate otherwise.
pub struct ConditionCompiler<'a> {
    attributes: &'a AttributeCache,
    eav_table: &'a str,
}

impl<'a> ConditionCompiler<'a> {
    pub fn new(attributes: &'a AttributeCache, eav_table: &'a str) -> Self {
        Self {
            attributes,
            eav_table,
        }
    }

    /// Render the hot-tier predicate into `builder`. Main-table columns
    /// are referenced through the `e` alias of the query template.
    pub fn hot(&self, condition: &Condition, builder: &mut SqlBuilder) -> Result<PushdownStats> {
        let mut stats = PushdownStats::default();
        self.hot_node(condition, builder, &mut stats)?;
        Ok(stats)
    }

    fn hot_node(
        &self,
        condition: &Condition,
        builder: &mut SqlBuilder,
        stats: &mut PushdownStats,
    ) -> Result<()> {
        match condition {
            Condition::Composite { logic, children } => {
                if children.is_empty() {
                    builder.push("TRUE");
                    return Ok(());
                }
                builder.push("(");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        builder.push(connective(*logic));
                    }
                    self.hot_node(child, builder, stats)?;
                }
                builder.push(")");
                Ok(())
            }
            Condition::Kv { attr, value } => {
                let (meta, op, literal) = classify(self.attributes, attr, value)?;
                stats.total_leaves += 1;

                match &meta.binding {
                    Some(binding) => {
                        stats.pushdown_leaves += 1;
                        let bound = encode_pushdown_literal(op, literal, meta, binding)
                            .map_err(|err| err.with_field(attr))?;
                        builder
                            .push("e.")
                            .push_ident(&binding.col_name)
                            .push(" ")
                            .push(op.sql())
                            .push(" ")
                            .param(bound);
                    }
                    None => {
                        let bound = encode_eav_literal(op, literal, meta)
                            .map_err(|err| err.with_field(attr))?;
                        let slot = if meta.value_type.eav_slot_is_text() {
                            "value_text"
                        } else {
                            "value_numeric"
                        };
                        builder
                            .push("EXISTS (SELECT 1 FROM ")
                            .push_ident(self.eav_table)
                            .push(" x WHERE x.schema_id = e.schema_id AND x.row_id = e.row_id")
                            .push(" AND x.attr_id = ")
                            .push(&meta.attr_id.to_string())
                            .push(" AND x.")
                            .push(slot)
                            .push(" ")
                            .push(op.sql())
                            .push(" ")
                            .param(bound);
                        builder.push(")");
                    }
                }
                Ok(())
            }
        }
    }

}

/// Render the cold-tier predicate into `builder`. Every attribute is a
/// logical column there; literals carry the same physical encodings as
/// the hot tier so the two result sets agree.
pub fn compile_cold(
    condition: &Condition,
    attributes: &AttributeCache,
    builder: &mut SqlBuilder,
) -> Result<()> {
    match condition {
        Condition::Composite { logic, children } => {
            if children.is_empty() {
                builder.push("TRUE");
                return Ok(());
            }
            builder.push("(");
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    builder.push(connective(*logic));
                }
                compile_cold(child, attributes, builder)?;
            }
            builder.push(")");
            Ok(())
        }
        Condition::Kv { attr, value } => {
            let (meta, op, literal) = classify(attributes, attr, value)?;
            let bound = match &meta.binding {
                Some(binding) => encode_pushdown_literal(op, literal, meta, binding),
                None => encode_eav_literal(op, literal, meta),
            }
            .map_err(|err| err.with_field(attr))?;

            builder
                .push(&quote_attr(attr))
                .push(" ")
                .push(op.sql())
                .push(" ")
                .param(bound);
            Ok(())
        }
    }
}

/// Count pushdown-eligible leaves without rendering SQL, for callers that
/// only need the classification outcome.
pub fn pushdown_stats(
    condition: &Condition,
    attributes: &AttributeCache,
) -> Result<PushdownStats> {
    fn walk(
        condition: &Condition,
        attributes: &AttributeCache,
        stats: &mut PushdownStats,
    ) -> Result<()> {
        match condition {
            Condition::Composite { children, .. } => children
                .iter()
                .try_for_each(|child| walk(child, attributes, stats)),
            Condition::Kv { attr, value } => {
                let (meta, _, _) = classify(attributes, attr, value)?;
                stats.total_leaves += 1;
                if meta.binding.is_some() {
                    stats.pushdown_leaves += 1;
                }
                Ok(())
            }
        }
    }

    let mut stats = PushdownStats::default();
    walk(condition, attributes, &mut stats)?;
    Ok(stats)
}

/// Shared leaf classification: resolve metadata and check the operator
/// against the attribute's logical type.
fn classify<'a, 'c>(
    attributes: &'a AttributeCache,
    attr: &str,
    value: &'c str,
) -> Result<(&'a AttributeMetadata, CompareOp, &'c str)> {
    let meta = attributes.get(attr).ok_or_else(|| {
        Error::query("unknown attribute in condition").with_field(attr)
    })?;
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
            Error::query("bool attributes support only equals and not_equals")
                .with_field(attr),
        );
    }
    Ok((meta, op, literal))
}

fn connective(logic: Logic) -> &'static str {
    match logic {
        Logic::And => " AND ",
        Logic::Or => " OR ",
    }
}

fn coerce_literal(literal: &str, value_type: ValueType) -> Result<Scalar> {
    Scalar::coerce(
        &serde_json::Value::String(literal.to_string()),
        value_type,
    )
}

/// Encode a condition literal for a bound main column.
fn encode_pushdown_literal(
    op: CompareOp,
    literal: &str,
    meta: &AttributeMetadata,
    binding: &ColumnBinding,
) -> Result<SqlValue> {
    use Encoding as E;
    use ValueType as V;

    Ok(match (meta.value_type, binding.encoding) {
        (V::Text, E::Default) => SqlValue::Text(op.shape_literal(literal)),
        (V::Uuid, E::Default) => match coerce_literal(literal, V::Uuid)? {
            Scalar::Uuid(u) => SqlValue::Uuid(u),
            _ => unreachable!("uuid coercion yields a uuid"),
        },
        (V::SmallInt | V::Integer | V::BigInt, E::Default) => {
            match coerce_literal(literal, meta.value_type)? {
                Scalar::Int(i) => SqlValue::I64(i),
                _ => unreachable!("int coercion yields an int"),
            }
        }
        (V::Numeric, E::Default) => match coerce_literal(literal, V::Numeric)? {
            Scalar::Float(f) => SqlValue::F64(f),
            _ => unreachable!("numeric coercion yields a float"),
        },
        (V::Date | V::DateTime, E::UnixMs) => match coerce_literal(literal, meta.value_type)? {
            Scalar::Date(ms) => SqlValue::I64(ms),
            _ => unreachable!("date coercion yields a date"),
        },
        (V::Date | V::DateTime, E::Iso8601) => match coerce_literal(literal, meta.value_type)? {
            Scalar::Date(ms) => SqlValue::Text(ms_to_rfc3339(ms)?),
            _ => unreachable!("date coercion yields a date"),
        },
        (V::Bool, E::BoolSmallInt) => match coerce_literal(literal, V::Bool)? {
            Scalar::Bool(b) => SqlValue::I64(b as i64),
            _ => unreachable!("bool coercion yields a bool"),
        },
        (V::Bool, E::BoolText) => match coerce_literal(literal, V::Bool)? {
            Scalar::Bool(b) => SqlValue::Text(if b { "1" } else { "0" }.to_string()),
            _ => unreachable!("bool coercion yields a bool"),
        },
        (value_type, encoding) => {
            return Err(Error::internal(format!(
                "no literal encoding for ({}, {encoding:?})",
                value_type.as_str()
            )));
        }
    })
}

/// Encode a condition literal for the EAV value slots.
fn encode_eav_literal(
    op: CompareOp,
    literal: &str,
    meta: &AttributeMetadata,
) -> Result<SqlValue> {
    if meta.value_type == ValueType::Text {
        return Ok(SqlValue::Text(op.shape_literal(literal)));
    }
    let scalar = coerce_literal(literal, meta.value_type)?;
    Ok(match scalar.encode_eav() {
        (Some(text), None) => SqlValue::Text(text),
        (None, Some(numeric)) => SqlValue::F64(numeric),
        _ => return Err(Error::internal("EAV encoding yielded no slot")),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use models::AttrId;
    use pretty_assertions::assert_eq;

    fn attributes() -> AttributeCache {
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
            ("born", main(3, ValueType::DateTime, "bigint_01", Encoding::UnixMs)),
            ("age", main(4, ValueType::Integer, "integer_01", Encoding::Default)),
            ("notes", eav(20, ValueType::Text)),
            ("visits", eav(21, ValueType::DateTime)),
            ("level", eav(22, ValueType::Integer)),
        ]
        .into_iter()
        .map(|(name, meta)| (name.to_string(), meta))
        .collect()
    }

    #[test]
    fn test_pushdown_routing() {
        let attributes = attributes();
        let condition = Condition::and(vec![
            Condition::kv("name", "starts_with:Al"),
            Condition::kv("active", "equals:1"),
        ]);
        let compiled = compile_pair(&condition, &attributes, "eav_data").unwrap();

        assert_eq!(compiled.hot.sql, "(e.text_01 LIKE $1 AND e.text_02 = $2)");
        assert_eq!(
            compiled.hot.args,
            vec![
                SqlValue::Text("Al%".to_string()),
                SqlValue::Text("1".to_string())
            ]
        );
        assert_eq!(compiled.cold.sql, "(\"name\" LIKE ? AND \"active\" = ?)");
        assert_eq!(compiled.cold.args, compiled.hot.args);
        assert_eq!(compiled.stats.pushdown_leaves, 2);
        assert_eq!(compiled.stats.total_leaves, 2);
    }

    #[test]
    fn test_missing_binding_forces_eav() {
        let attributes = attributes();
        let condition = Condition::kv("notes", "foo");
        let compiled = compile_pair(&condition, &attributes, "eav_data").unwrap();

        assert_eq!(
            compiled.hot.sql,
            "EXISTS (SELECT 1 FROM eav_data x \
             WHERE x.schema_id = e.schema_id AND x.row_id = e.row_id \
             AND x.attr_id = 20 AND x.value_text = $1)"
        );
        assert_eq!(compiled.hot.args, vec![SqlValue::Text("foo".to_string())]);
        assert_eq!(compiled.cold.sql, "\"notes\" = ?");
        assert_eq!(compiled.stats.pushdown_leaves, 0);
        assert_eq!(compiled.stats.ratio(), 0.0);
    }

    #[test]
    fn test_date_literals_bind_encoded() {
        let attributes = attributes();
        let condition = Condition::and(vec![
            Condition::kv("born", "gte:2021-03-04T05:06:07Z"),
            Condition::kv("visits", "lt:1614834367000"),
        ]);
        let compiled = compile_pair(&condition, &attributes, "eav_data").unwrap();

        // Main pushdown binds epoch ms; the EAV fallback binds the numeric slot.
        assert_eq!(
            compiled.hot.args,
            vec![SqlValue::I64(1614834367000), SqlValue::F64(1614834367000.0)]
        );
        assert!(compiled.hot.sql.starts_with("(e.bigint_01 >= $1 AND EXISTS"));
        assert!(compiled.hot.sql.contains("x.value_numeric < $2"));
        assert_eq!(
            compiled.cold.sql,
            "(\"born\" >= ? AND \"visits\" < ?)"
        );
    }

    #[test]
    fn test_nested_composites_parenthesize() {
        let attributes = attributes();
        let condition = Condition::or(vec![
            Condition::kv("age", "gt:30"),
            Condition::and(vec![
                Condition::kv("name", "A"),
                Condition::kv("level", "lte:5"),
            ]),
        ]);
        let compiled = compile_pair(&condition, &attributes, "eav_data").unwrap();

        assert_eq!(
            compiled.hot.sql,
            "(e.integer_01 > $1 OR (e.text_01 = $2 AND \
             EXISTS (SELECT 1 FROM eav_data x \
             WHERE x.schema_id = e.schema_id AND x.row_id = e.row_id \
             AND x.attr_id = 22 AND x.value_numeric <= $3)))"
        );
        assert_eq!(
            compiled.hot.args,
            vec![
                SqlValue::I64(30),
                SqlValue::Text("A".to_string()),
                SqlValue::F64(5.0)
            ]
        );
    }

    #[test]
    fn test_empty_composite_is_trivially_true() {
        let attributes = attributes();
        let compiled = compile_pair(&Condition::and(vec![]), &attributes, "eav_data").unwrap();
        assert_eq!(compiled.hot.sql, "TRUE");
        assert!(compiled.hot.args.is_empty());
        assert_eq!(compiled.cold.sql, "TRUE");
    }

    #[test]
    fn test_unknown_attribute_fails() {
        let attributes = attributes();
        let err = compile_pair(&Condition::kv("ghost", "1"), &attributes, "eav_data")
            .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Query);
        assert_eq!(err.field(), Some("ghost"));
    }

    #[test]
    fn test_operator_type_checks() {
        let attributes = attributes();
        // LIKE-style operators are accepted only for text attributes.
        let err = compile_pair(
            &Condition::kv("age", "contains:3"),
            &attributes,
            "eav_data",
        )
        .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Query);

        // Bool columns accept only equality.
        let err = compile_pair(
            &Condition::kv("active", "gt:0"),
            &attributes,
            "eav_data",
        )
        .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Query);

        // Unparseable literals cannot be represented in either tier.
        let err = compile_pair(
            &Condition::kv("age", "gt:abc"),
            &attributes,
            "eav_data",
        )
        .unwrap_err();
        assert_eq!(err.kind(), models::ErrorKind::Validation);
    }
}
