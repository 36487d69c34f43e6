use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use super::{DbError, QueryOutput, SqlBackend};

/// MySQL handle built from an assembled connection URI.
///
/// Networked connections are read-write; there is no read-only mode on
/// this path.
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        // Confirm the credentials and database actually work before
        // handing the handle out.
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl SqlBackend for MySqlBackend {
    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query("SHOW TABLES").fetch_all(&self.pool).await?;
        let mut names = rows
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::Query(e.to_string()))?;
        names.sort();
        Ok(names)
    }

    async fn describe_tables(&self, tables: &[String]) -> Result<String, DbError> {
        let mut out = String::new();
        for table in tables {
            // Identifier position, so it cannot be bound; backtick-quote
            // and strip backticks from the name instead.
            let quoted = format!("`{}`", table.replace('`', ""));
            let rows = match sqlx::query(&format!("SHOW COLUMNS FROM {quoted}"))
                .fetch_all(&self.pool)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    out.push_str(&format!("-- no such table: {table} ({e})\n"));
                    continue;
                }
            };

            out.push_str(&format!("{table} (\n"));
            for row in &rows {
                let field: String = row
                    .try_get("Field")
                    .map_err(|e| DbError::Query(e.to_string()))?;
                let column_type: String = row
                    .try_get_unchecked("Type")
                    .map_err(|e| DbError::Query(e.to_string()))?;
                out.push_str(&format!("  {field} {column_type},\n"));
            }
            out.push_str(")\n");
        }
        Ok(out)
    }

    async fn run_query(&self, sql: &str) -> Result<QueryOutput, DbError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let Some(first) = rows.first() else {
            return Ok(QueryOutput::default());
        };

        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let collected = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| decode_value(row, i))
                    .collect()
            })
            .collect();

        Ok(QueryOutput {
            columns,
            rows: collected,
        })
    }
}

/// Render one column of a row as text, choosing the Rust type from the
/// MySQL column type. Undecodable values degrade to a placeholder rather
/// than failing the whole result set.
fn decode_value(row: &MySqlRow, idx: usize) -> String {
    fn show<T: std::fmt::Display>(value: Option<T>) -> String {
        match value {
            Some(v) => v.to_string(),
            None => "NULL".to_string(),
        }
    }

    let type_name = row.columns()[idx].type_info().name().to_string();
    let rendered = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx).map(show),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx).map(show)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => row.try_get::<Option<u64>, _>(idx).map(show),
        "FLOAT" => row.try_get::<Option<f32>, _>(idx).map(show),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx).map(show),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx).map(show),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(idx).map(show),
        "DATETIME" => row.try_get::<Option<NaiveDateTime>, _>(idx).map(show),
        "TIMESTAMP" => row.try_get::<Option<DateTime<Utc>>, _>(idx).map(show),
        "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| match v {
                Some(bytes) => format!("<blob {} bytes>", bytes.len()),
                None => "NULL".to_string(),
            }),
        // VARCHAR, CHAR, TEXT, ENUM, SET, JSON, DECIMAL and anything
        // else that travels as text.
        _ => row
            .try_get::<Option<String>, _>(idx)
            .or_else(|_| row.try_get_unchecked::<Option<String>, _>(idx))
            .map(show),
    };

    rendered.unwrap_or_else(|_| format!("<{}>", type_name.to_lowercase()))
}
