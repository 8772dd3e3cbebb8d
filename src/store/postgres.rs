//! PostgreSQL backend for the relational adapter.
//!
//! A write drops and recreates `schema.table` inside one transaction, then
//! bulk-inserts the rows. Column types are inferred from the JSON values:
//!
//! | Values seen | Column type |
//! |-------------|-------------|
//! | integers only | `BIGINT` |
//! | numbers | `DOUBLE PRECISION` |
//! | booleans | `BOOLEAN` |
//! | objects or arrays | `JSONB` |
//! | anything else, mixed, or all null | `TEXT` |

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, QueryBuilder, Row, TypeInfo, ValueRef};

use crate::error::{PipelineError, Result};
use crate::models::{Record, Table};

use super::{RelationalBackend, TableTarget};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BINDS: usize = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Boolean,
    Jsonb,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Jsonb => "JSONB",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Pick the narrowest column type that holds every non-null value.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut seen: Option<ColumnType> = None;
    for value in values {
        let kind = match value {
            Value::Null => continue,
            Value::Number(n) if n.is_i64() => ColumnType::BigInt,
            Value::Number(_) => ColumnType::Double,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Array(_) | Value::Object(_) => ColumnType::Jsonb,
            Value::String(_) => ColumnType::Text,
        };
        seen = Some(match (seen, kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::BigInt), ColumnType::Double)
            | (Some(ColumnType::Double), ColumnType::BigInt) => ColumnType::Double,
            _ => return ColumnType::Text,
        });
    }
    seen.unwrap_or(ColumnType::Text)
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(target: &TableTarget) -> String {
    format!("{}.{}", quote_ident(&target.schema), quote_ident(&target.table))
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub fn drop_table_sql(target: &TableTarget) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(target))
}

pub fn create_table_sql(target: &TableTarget, columns: &[(String, ColumnType)]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql()))
        .collect();
    format!("CREATE TABLE {} ({})", qualified(target), defs.join(", "))
}

fn insert_prefix(target: &TableTarget, columns: &[(String, ColumnType)]) -> String {
    let names: Vec<String> = columns.iter().map(|(n, _)| quote_ident(n)).collect();
    format!("INSERT INTO {} ({}) ", qualified(target), names.join(", "))
}

fn text_cell(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn column_names(&self, target: &TableTarget) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(&target.schema)
        .bind(&target.table)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "FLOAT8" => float(row.try_get::<f64, _>(index)?),
        "FLOAT4" => float(f64::from(row.try_get::<f32, _>(index)?)),
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get::<String, _>(index)?),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::NaiveDateTime, _>(index)?
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        other => {
            return Err(PipelineError::shape(format!(
                "unsupported column type {} in column '{}'",
                other,
                row.columns()[index].name()
            )))
        }
    };
    Ok(value)
}

/// NaN and infinities have no JSON form; they load as null.
fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn is_undefined_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "42P01")
}

#[async_trait]
impl RelationalBackend for PostgresBackend {
    fn kind(&self) -> &str {
        "postgres"
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        sqlx::query(&create_schema_sql(schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_table(&self, target: &TableTarget, data: &Table) -> Result<()> {
        let columns: Vec<(String, ColumnType)> = data
            .columns()
            .iter()
            .map(|name| (name.clone(), infer_column_type(data.column(name))))
            .collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&drop_table_sql(target)).execute(&mut *tx).await?;
        sqlx::query(&create_table_sql(target, &columns))
            .execute(&mut *tx)
            .await?;

        if !columns.is_empty() && !data.is_empty() {
            let rows_per_batch = (MAX_BINDS / columns.len()).max(1);
            for batch in data.rows().chunks(rows_per_batch) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(insert_prefix(target, &columns));
                qb.push_values(batch, |mut b, row: &Record| {
                    for (name, ty) in &columns {
                        let cell = row.get(name);
                        match ty {
                            ColumnType::BigInt => {
                                b.push_bind(cell.and_then(Value::as_i64));
                            }
                            ColumnType::Double => {
                                b.push_bind(cell.and_then(Value::as_f64));
                            }
                            ColumnType::Boolean => {
                                b.push_bind(cell.and_then(Value::as_bool));
                            }
                            ColumnType::Jsonb => {
                                b.push_bind(
                                    cell.filter(|v| !v.is_null())
                                        .cloned()
                                        .map(sqlx::types::Json),
                                );
                            }
                            ColumnType::Text => {
                                b.push_bind(text_cell(cell));
                            }
                        }
                    }
                });
                qb.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn select_all(&self, target: &TableTarget) -> Result<Table> {
        let sql = format!("SELECT * FROM {}", qualified(target));
        let rows = match sqlx::query(&sql).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => {
                return Err(PipelineError::NotFound(target.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if rows.is_empty() {
            return Ok(Table::with_columns(self.column_names(target).await?));
        }

        let names: Vec<String> = rows[0]
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let mut table = Table::with_columns(names.clone());
        for row in &rows {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), decode_cell(row, index)?);
            }
            table.push_row(record);
        }
        Ok(table)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
