use crate::{RecordRepository, TableNames};
use async_trait::async_trait;
use models::{
    id, AttributeCache, ColumnFamily, EavRecord, Error, PersistentRecord, RecordQuery, Result,
    ResultPage, SchemaId,
};
use sqlgen::{build_hot_query, ident, resolve_sort, SqlValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, PgPool, Postgres, Row};
use uuid::Uuid;

/// EAV inserts are chunked into multi-values statements of this many rows.
const EAV_INSERT_BATCH: usize = 500;

/// The Postgres-backed hot repository. All DML runs in transactions; SQL
/// text is rendered from validated identifiers with bound parameters.
pub struct PgRepository {
    pool: PgPool,
    tables: TableNames,
}

/// One bound DML argument, covering the nullable slots the WHERE-fragment
/// renderer never produces.
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    I16(i16),
    I64(i64),
    OptI64(Option<i64>),
    I32(i32),
    F64(f64),
    Text(String),
    OptText(Option<String>),
    OptF64(Option<f64>),
    Uuid(Uuid),
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

impl Bind {
    fn apply(self, query: PgQuery<'_>) -> PgQuery<'_> {
        match self {
            Bind::I16(v) => query.bind(v),
            Bind::I64(v) => query.bind(v),
            Bind::OptI64(v) => query.bind(v),
            Bind::I32(v) => query.bind(v),
            Bind::F64(v) => query.bind(v),
            Bind::Text(v) => query.bind(v),
            Bind::OptText(v) => query.bind(v),
            Bind::OptF64(v) => query.bind(v),
            Bind::Uuid(v) => query.bind(v),
        }
    }
}

impl PgRepository {
    pub fn new(pool: PgPool, tables: TableNames) -> Result<Self> {
        tables.validate()?;
        Ok(Self { pool, tables })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Replace the record's rows inside `txn`: delete both representations
    /// and re-insert. Readers never observe a mixed state.
    async fn replace_record(
        &self,
        txn: &mut sqlx::Transaction<'_, Postgres>,
        record: &PersistentRecord,
    ) -> Result<()> {
        for table in [&self.tables.entity_main, &self.tables.eav_data] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE schema_id = $1 AND row_id = $2",
                ident(table)
            ))
            .bind(record.schema_id)
            .bind(record.row_id)
            .execute(&mut **txn)
            .await
            .map_err(execution_error)?;
        }

        let (sql, binds) = main_insert(&self.tables, record)?;
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = bind.apply(query);
        }
        query.execute(&mut **txn).await.map_err(execution_error)?;

        for chunk in record.other_attributes.chunks(EAV_INSERT_BATCH) {
            let (sql, binds) = eav_insert(&self.tables, chunk);
            let mut query = sqlx::query(&sql);
            for bind in binds {
                query = bind.apply(query);
            }
            query.execute(&mut **txn).await.map_err(execution_error)?;
        }
        Ok(())
    }

    /// Record the mutation in the change log with `flushed_at = 0`. Only
    /// the CDC flusher ever sets a non-zero `flushed_at`.
    async fn log_change(
        &self,
        txn: &mut sqlx::Transaction<'_, Postgres>,
        schema_id: SchemaId,
        row_id: Uuid,
        changed_at: i64,
        deleted_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (schema_id, row_id, changed_at, deleted_at, flushed_at) \
             VALUES ($1, $2, $3, $4, 0) \
             ON CONFLICT (schema_id, row_id) DO UPDATE SET \
             changed_at = EXCLUDED.changed_at, deleted_at = EXCLUDED.deleted_at, flushed_at = 0",
            ident(&self.tables.change_log)
        ))
        .bind(schema_id)
        .bind(row_id)
        .bind(changed_at)
        .bind(deleted_at)
        .execute(&mut **txn)
        .await
        .map_err(execution_error)?;
        Ok(())
    }

    async fn write(&self, record: &PersistentRecord) -> Result<()> {
        let mut txn = self.pool.begin().await.map_err(transaction_error)?;
        self.replace_record(&mut txn, record).await?;
        self.log_change(
            &mut txn,
            record.schema_id,
            record.row_id,
            record.updated_at,
            record.deleted_at,
        )
        .await?;
        txn.commit().await.map_err(transaction_error)
    }
}

#[async_trait]
impl RecordRepository for PgRepository {
    #[tracing::instrument(skip_all, fields(schema_id = record.schema_id, row_id = %record.row_id))]
    async fn insert(&self, record: &PersistentRecord) -> Result<()> {
        self.write(record).await
    }

    #[tracing::instrument(skip(self), fields(row_id = %row_id))]
    async fn get(&self, schema_id: SchemaId, row_id: Uuid) -> Result<Option<PersistentRecord>> {
        let sql = format!(
            "SELECT e.*, {eav_agg} AS eav_rows FROM {main} e \
             WHERE e.schema_id = $1 AND e.row_id = $2",
            eav_agg = eav_agg_subquery(&self.tables),
            main = ident(&self.tables.entity_main),
        );
        let row = sqlx::query(&sql)
            .bind(schema_id)
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(execution_error)?;

        row.map(|row| hydrate(&row).map(|(record, _)| record))
            .transpose()
    }

    #[tracing::instrument(skip_all, fields(schema_id = record.schema_id, row_id = %record.row_id))]
    async fn update(&self, record: &PersistentRecord) -> Result<()> {
        self.write(record).await
    }

    #[tracing::instrument(skip(self), fields(row_id = %row_id))]
    async fn delete(&self, schema_id: SchemaId, row_id: Uuid) -> Result<()> {
        let now = id::now_ms();
        let mut txn = self.pool.begin().await.map_err(transaction_error)?;

        let deleted_at: Option<(i64,)> = sqlx::query_as(&format!(
            "UPDATE {} SET deleted_at = COALESCE(deleted_at, $3) \
             WHERE schema_id = $1 AND row_id = $2 RETURNING deleted_at",
            ident(&self.tables.entity_main)
        ))
        .bind(schema_id)
        .bind(row_id)
        .bind(now)
        .fetch_optional(&mut *txn)
        .await
        .map_err(execution_error)?;

        let Some((deleted_at,)) = deleted_at else {
            return Err(Error::not_found(format!("record {row_id}")).with_operation("delete"));
        };

        sqlx::query(&format!(
            "DELETE FROM {} WHERE schema_id = $1 AND row_id = $2",
            ident(&self.tables.eav_data)
        ))
        .bind(schema_id)
        .bind(row_id)
        .execute(&mut *txn)
        .await
        .map_err(execution_error)?;

        self.log_change(&mut txn, schema_id, row_id, now, Some(deleted_at))
            .await?;
        txn.commit().await.map_err(transaction_error)
    }

    #[tracing::instrument(skip_all, fields(schema_id = query.schema_id, page = query.page.page))]
    async fn query(
        &self,
        query: &RecordQuery,
        attributes: &AttributeCache,
    ) -> Result<ResultPage<PersistentRecord>> {
        let sort = resolve_sort(&query.order, attributes)?;
        let (fragment, stats) = build_hot_query(
            &self.tables,
            query.schema_id,
            query.condition.as_ref(),
            attributes,
            &sort,
            &query.page,
        )?;
        tracing::debug!(
            pushdown = stats.pushdown_leaves,
            leaves = stats.total_leaves,
            "compiled hot query"
        );

        let mut prepared = sqlx::query(&fragment.sql);
        for arg in &fragment.args {
            prepared = bind_sql_value(prepared, arg);
        }
        let rows = prepared
            .fetch_all(&self.pool)
            .await
            .map_err(execution_error)?;

        let mut total = 0u64;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let (record, row_total) = hydrate(row)?;
            if let Some(row_total) = row_total {
                total = row_total as u64;
            }
            records.push(record);
        }
        Ok(ResultPage::new(records, total, &query.page))
    }

    async fn dirty_rows(&self, schema_id: SchemaId) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT row_id FROM {} WHERE schema_id = $1 AND flushed_at = 0 ORDER BY row_id",
            ident(&self.tables.change_log)
        ))
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await
        .map_err(execution_error)?;
        Ok(rows.into_iter().map(|(row_id,)| row_id).collect())
    }
}

/// Bind one compiled WHERE-fragment argument.
fn bind_sql_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(*v),
    }
}

fn eav_agg_subquery(tables: &TableNames) -> String {
    format!(
        "COALESCE((SELECT json_agg(json_build_object(\
         'attr_id', x.attr_id, 'array_indices', x.array_indices, \
         'value_text', x.value_text, 'value_numeric', x.value_numeric)) \
         FROM {eav} x WHERE x.schema_id = e.schema_id AND x.row_id = e.row_id), '[]'::json)",
        eav = ident(&tables.eav_data)
    )
}

/// Render the main-row insert for one record: fixed columns first, then
/// whichever pool columns the record populates.
fn main_insert(tables: &TableNames, record: &PersistentRecord) -> Result<(String, Vec<Bind>)> {
    let mut columns: Vec<String> = ["schema_id", "row_id", "created_at", "updated_at", "deleted_at"]
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut binds = vec![
        Bind::I16(record.schema_id),
        Bind::Uuid(record.row_id),
        Bind::I64(record.created_at),
        Bind::I64(record.updated_at),
        Bind::OptI64(record.deleted_at),
    ];

    for (col, value) in &record.text_items {
        columns.push(ident(col).to_string());
        // uuid-family columns ride the text map as canonical strings but
        // bind as native uuids.
        if ColumnFamily::of(col) == Some(ColumnFamily::Uuid) {
            let parsed = Uuid::parse_str(value).map_err(|err| {
                Error::internal(format!("column {col} holds a malformed uuid"))
                    .with_source(err)
            })?;
            binds.push(Bind::Uuid(parsed));
        } else {
            binds.push(Bind::Text(value.clone()));
        }
    }
    for (col, value) in &record.int16_items {
        columns.push(ident(col).to_string());
        binds.push(Bind::I16(*value));
    }
    for (col, value) in &record.int32_items {
        columns.push(ident(col).to_string());
        binds.push(Bind::I32(*value));
    }
    for (col, value) in &record.int64_items {
        columns.push(ident(col).to_string());
        binds.push(Bind::I64(*value));
    }
    for (col, value) in &record.float64_items {
        columns.push(ident(col).to_string());
        binds.push(Bind::F64(*value));
    }

    let placeholders: Vec<String> = (1..=binds.len()).map(|i| format!("${i}")).collect();
    let sql = format!(
        "INSERT INTO {main} ({columns}) VALUES ({placeholders})",
        main = ident(&tables.entity_main),
        columns = columns.join(", "),
        placeholders = placeholders.join(", "),
    );
    Ok((sql, binds))
}

/// Render one multi-values EAV insert chunk.
fn eav_insert(tables: &TableNames, rows: &[EavRecord]) -> (String, Vec<Bind>) {
    let mut binds = Vec::with_capacity(rows.len() * 6);
    let mut values = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let base = i * 6;
        values.push(format!(
            "(${}, ${}, ${}, ${}, ${}, ${})",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6,
        ));
        binds.push(Bind::I16(row.schema_id));
        binds.push(Bind::Uuid(row.row_id));
        binds.push(Bind::I16(row.attr_id));
        binds.push(Bind::Text(row.array_indices.clone()));
        binds.push(Bind::OptText(row.value_text.clone()));
        binds.push(Bind::OptF64(row.value_numeric));
    }
    let sql = format!(
        "INSERT INTO {eav} (schema_id, row_id, attr_id, array_indices, value_text, value_numeric) \
         VALUES {values}",
        eav = ident(&tables.eav_data),
        values = values.join(", "),
    );
    (sql, binds)
}

#[derive(serde::Deserialize)]
struct EavRowJson {
    attr_id: i16,
    array_indices: String,
    value_text: Option<String>,
    value_numeric: Option<f64>,
}

/// Hydrate a result row: fixed columns by name, pool columns by family,
/// EAV rows from the JSON aggregate, plus the windowed total when present.
fn hydrate(row: &PgRow) -> Result<(PersistentRecord, Option<i64>)> {
    let mut record = PersistentRecord::new(0, Uuid::nil());
    let mut total = None;

    for (idx, column) in row.columns().iter().enumerate() {
        match column.name() {
            "schema_id" => record.schema_id = decode_col(row, idx, column.name())?,
            "row_id" => record.row_id = decode_col(row, idx, column.name())?,
            "created_at" => record.created_at = decode_col(row, idx, column.name())?,
            "updated_at" => record.updated_at = decode_col(row, idx, column.name())?,
            "deleted_at" => record.deleted_at = decode_col(row, idx, column.name())?,
            "total_rows" => total = Some(decode_col::<i64>(row, idx, column.name())?),
            "eav_rows" => {
                let value: serde_json::Value = decode_col(row, idx, column.name())?;
                let rows: Vec<EavRowJson> = serde_json::from_value(value).map_err(|err| {
                    Error::execution("malformed EAV aggregate").with_source(err)
                })?;
                record.other_attributes = rows
                    .into_iter()
                    .map(|r| EavRecord {
                        schema_id: 0,
                        row_id: Uuid::nil(),
                        attr_id: r.attr_id,
                        array_indices: r.array_indices,
                        value_text: r.value_text,
                        value_numeric: r.value_numeric,
                    })
                    .collect();
            }
            name => match ColumnFamily::of(name) {
                Some(ColumnFamily::Text) => {
                    if let Some(v) = decode_col::<Option<String>>(row, idx, name)? {
                        record.text_items.insert(name.to_string(), v);
                    }
                }
                Some(ColumnFamily::Uuid) => {
                    if let Some(v) = decode_col::<Option<Uuid>>(row, idx, name)? {
                        record
                            .text_items
                            .insert(name.to_string(), v.hyphenated().to_string());
                    }
                }
                Some(ColumnFamily::SmallInt) => {
                    if let Some(v) = decode_col::<Option<i16>>(row, idx, name)? {
                        record.int16_items.insert(name.to_string(), v);
                    }
                }
                Some(ColumnFamily::Integer) => {
                    if let Some(v) = decode_col::<Option<i32>>(row, idx, name)? {
                        record.int32_items.insert(name.to_string(), v);
                    }
                }
                Some(ColumnFamily::BigInt) => {
                    if let Some(v) = decode_col::<Option<i64>>(row, idx, name)? {
                        record.int64_items.insert(name.to_string(), v);
                    }
                }
                Some(ColumnFamily::Double) => {
                    if let Some(v) = decode_col::<Option<f64>>(row, idx, name)? {
                        record.float64_items.insert(name.to_string(), v);
                    }
                }
                None => {}
            },
        }
    }

    for eav in &mut record.other_attributes {
        eav.schema_id = record.schema_id;
        eav.row_id = record.row_id;
    }
    Ok((record, total))
}

fn decode_col<'r, T>(row: &'r PgRow, idx: usize, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(idx).map_err(|err| {
        Error::execution(format!("cannot decode column {name}")).with_source(err)
    })
}

fn execution_error(err: sqlx::Error) -> Error {
    let constraint = match &err {
        sqlx::Error::Database(db) => db.constraint().map(str::to_string),
        _ => None,
    };
    if let Some(constraint) = constraint {
        return Error::validation(format!("constraint {constraint} violated")).with_source(err);
    }
    if matches!(err, sqlx::Error::PoolTimedOut) {
        return Error::timeout("row store pool timed out").with_source(err);
    }
    Error::execution("row store statement failed").with_source(err)
}

fn transaction_error(err: sqlx::Error) -> Error {
    Error::transaction("row store transaction failed").with_source(err)
}
