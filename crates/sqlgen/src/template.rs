use crate::{compile_cold, ConditionCompiler, Dialect, Fragment, PushdownStats, SqlBuilder, SqlValue};
use models::{AttrId, AttributeCache, AttributeOrder, Condition, Error, Page, Result, SchemaId};
use uuid::Uuid;

/// Physical table names of the hot tier. Values come from configuration
/// and are pinned to bare identifiers at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TableNames {
    pub entity_main: String,
    pub eav_data: String,
    pub change_log: String,
    pub schema_registry: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            entity_main: "entity_main".to_string(),
            eav_data: "eav_data".to_string(),
            change_log: "change_log".to_string(),
            schema_registry: "schema_registry".to_string(),
        }
    }
}

impl TableNames {
    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.entity_main,
            &self.eav_data,
            &self.change_log,
            &self.schema_registry,
        ] {
            if name.is_empty()
                || !name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                return Err(Error::validation(format!(
                    "table name {name:?} is not a valid identifier"
                )));
            }
        }
        Ok(())
    }
}

/// One resolved sort key of a paginated query.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Direct read of a bound main column.
    Main { col_name: String, descending: bool },
    /// EAV lookup taking the first row by array position.
    Eav {
        attr_id: AttrId,
        text_slot: bool,
        descending: bool,
    },
}

/// Resolve requested orderings against the catalog: a bound attribute
/// sorts on its main column, anything else through its EAV rows.
pub fn resolve_sort(
    order: &[AttributeOrder],
    attributes: &AttributeCache,
) -> Result<Vec<SortKey>> {
    order
        .iter()
        .map(|requested| {
            let meta = attributes.get(&requested.attr).ok_or_else(|| {
                Error::query("unknown attribute in sort").with_field(&requested.attr)
            })?;
            Ok(match &meta.binding {
                Some(binding) => SortKey::Main {
                    col_name: binding.col_name.clone(),
                    descending: requested.descending,
                },
                None => SortKey::Eav {
                    attr_id: meta.attr_id,
                    text_slot: meta.value_type.eav_slot_is_text(),
                    descending: requested.descending,
                },
            })
        })
        .collect()
}

/// Render the paginated hot-tier query.
///
/// Three CTEs feed the final projection: `anchor` collects candidate row
/// ids (predicate matches unioned with unflushed change-log rows), `keys`
/// computes the sort keys and the running total, `ordered` applies the
/// deterministic ordering and the page window. The final select returns
/// each main row with its EAV rows aggregated as JSON.
pub fn build_hot_query(
    tables: &TableNames,
    schema_id: SchemaId,
    condition: Option<&Condition>,
    attributes: &AttributeCache,
    sort: &[SortKey],
    page: &Page,
) -> Result<(Fragment, PushdownStats)> {
    let mut b = SqlBuilder::new(Dialect::Pg);

    b.push("WITH anchor AS (\n  SELECT DISTINCT e.row_id\n  FROM ");
    b.push_ident(&tables.entity_main);
    b.push(" e\n  WHERE e.schema_id = ");
    b.param(SqlValue::I16(schema_id));
    b.push(" AND e.deleted_at IS NULL");
    let stats = match condition {
        Some(condition) => {
            b.push(" AND ");
            ConditionCompiler::new(attributes, &tables.eav_data).hot(condition, &mut b)?
        }
        None => PushdownStats::default(),
    };
    b.push("\n  UNION\n  SELECT c.row_id\n  FROM ");
    b.push_ident(&tables.change_log);
    b.push(" c\n  WHERE c.schema_id = ");
    b.param(SqlValue::I16(schema_id));
    b.push(" AND c.flushed_at = 0\n)");

    b.push(",\nkeys AS (\n  SELECT a.row_id, COUNT(*) OVER () AS total_rows");
    for (i, key) in sort.iter().enumerate() {
        b.push(",\n    ");
        match key {
            SortKey::Main { col_name, .. } => {
                b.push("(SELECT m.");
                b.push_ident(col_name);
                b.push(" FROM ");
                b.push_ident(&tables.entity_main);
                b.push(" m WHERE m.schema_id = ");
                b.param(SqlValue::I16(schema_id));
                b.push(" AND m.row_id = a.row_id)");
            }
            SortKey::Eav {
                attr_id, text_slot, ..
            } => {
                b.push("(SELECT x.");
                b.push(if *text_slot { "value_text" } else { "value_numeric" });
                b.push(" FROM ");
                b.push_ident(&tables.eav_data);
                b.push(" x WHERE x.schema_id = ");
                b.param(SqlValue::I16(schema_id));
                b.push(" AND x.row_id = a.row_id AND x.attr_id = ");
                b.push(&attr_id.to_string());
                b.push(" ORDER BY x.array_indices NULLS FIRST LIMIT 1)");
            }
        }
        b.push(&format!(" AS sort_{i}"));
    }
    b.push("\n  FROM anchor a\n)");

    b.push(",\nordered AS (\n  SELECT k.row_id, k.total_rows,\n    ROW_NUMBER() OVER (ORDER BY ");
    for (i, key) in sort.iter().enumerate() {
        let descending = match key {
            SortKey::Main { descending, .. } | SortKey::Eav { descending, .. } => *descending,
        };
        b.push(&format!("k.sort_{i} "));
        b.push(if descending { "DESC" } else { "ASC" });
        b.push(" NULLS LAST, ");
    }
    b.push("k.row_id) AS pos\n  FROM keys k\n  ORDER BY pos\n  LIMIT ");
    b.param(SqlValue::I64(page.limit()));
    b.push(" OFFSET ");
    b.param(SqlValue::I64(page.offset()));
    b.push("\n)");

    b.push("\nSELECT e.*, o.total_rows,\n  COALESCE((SELECT json_agg(json_build_object(");
    b.push("'attr_id', x.attr_id, 'array_indices', x.array_indices, ");
    b.push("'value_text', x.value_text, 'value_numeric', x.value_numeric))\n    FROM ");
    b.push_ident(&tables.eav_data);
    b.push(" x WHERE x.schema_id = e.schema_id AND x.row_id = e.row_id), '[]'::json) AS eav_rows");
    b.push("\nFROM ordered o\nJOIN ");
    b.push_ident(&tables.entity_main);
    b.push(" e ON e.schema_id = ");
    b.param(SqlValue::I16(schema_id));
    b.push(" AND e.row_id = o.row_id\nORDER BY o.pos");

    Ok((b.finish(), stats))
}

/// Render the cold-tier predicate, appending the dirty-row anti-join.
/// Dirty row ids bind as canonical UUID strings through `?` placeholders;
/// an empty dirty set renders no suffix.
pub fn build_cold_predicate(
    condition: Option<&Condition>,
    attributes: &AttributeCache,
    dirty_rows: &[Uuid],
) -> Result<Fragment> {
    let mut b = SqlBuilder::new(Dialect::Duck);
    match condition {
        Some(condition) => compile_cold(condition, attributes, &mut b)?,
        None => {
            b.push("TRUE");
        }
    }

    if !dirty_rows.is_empty() {
        b.push(" AND row_id NOT IN (");
        for (i, row_id) in dirty_rows.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.param(SqlValue::Text(row_id.hyphenated().to_string()));
        }
        b.push(")");
    }
    Ok(b.finish())
}
