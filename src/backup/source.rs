// dumptool/src/backup/source.rs
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Column, Connection, Executor, MySqlConnection, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::codec::SqlValue;
use crate::errors::{AppError, Result};

/// Schemas never dumped when a target selects "all" databases.
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "mysql", "sys"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
}

/// One live connection to a source server.
///
/// All statements go over the text protocol so every column value arrives
/// as its textual rendering and can be decoded without prepared-statement
/// type negotiation.
pub struct MySqlSource {
    conn: MySqlConnection,
}

impl MySqlSource {
    pub async fn connect(options: &MySqlConnectOptions, label: &str) -> Result<Self> {
        let conn = MySqlConnection::connect_with(options)
            .await
            .map_err(|e| AppError::connection(format!("failed to connect to {}", label), e))?;
        Ok(MySqlSource { conn })
    }

    /// Opens a consistent snapshot; every later read on this connection sees
    /// the database as of this point.
    pub async fn begin_snapshot(&mut self) -> Result<()> {
        // TIMESTAMP values are rendered in UTC to match the artifact header.
        self.conn.execute("SET SESSION time_zone = '+00:00'").await?;
        self.conn
            .execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await?;
        self.conn
            .execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
            .await?;
        Ok(())
    }

    pub async fn end_snapshot(&mut self) -> Result<()> {
        self.conn.execute("COMMIT").await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    /// Every schema on the server except the system ones, in server order.
    pub async fn list_databases(&mut self) -> Result<Vec<String>> {
        let rows = self.conn.fetch_all("SHOW DATABASES").await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_column(row, 0)?;
            if !SYSTEM_SCHEMAS.contains(&name.as_str()) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Base tables and views of the current database, sorted by name.
    pub async fn list_tables(&mut self) -> Result<Vec<TableInfo>> {
        let rows = self.conn.fetch_all("SHOW FULL TABLES").await?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_column(row, 0)?;
            let kind = match text_column(row, 1)?.as_str() {
                "VIEW" => TableKind::View,
                _ => TableKind::Table,
            };
            tables.push(TableInfo { name, kind });
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    /// `SHOW CREATE TABLE` or `SHOW CREATE VIEW`, second column.
    pub async fn create_statement(&mut self, table: &TableInfo) -> Result<String> {
        let keyword = match table.kind {
            TableKind::Table => "TABLE",
            TableKind::View => "VIEW",
        };
        let sql = format!("SHOW CREATE {} {}", keyword, super::writer::quote_identifier(&table.name));
        let row = self.conn.fetch_one(sql.as_str()).await?;
        text_column(&row, 1)
    }

    /// Column names that accept inserted values, in table order. Generated
    /// columns are left out since MySQL rejects explicit values for them.
    pub async fn insertable_columns(&mut self, database: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             AND EXTRA NOT IN ('VIRTUAL GENERATED', 'STORED GENERATED') \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(database)
        .bind(table)
        .fetch_all(&mut self.conn)
        .await?;
        rows.iter().map(|row| text_column(row, 0)).collect()
    }

    /// Streams every row of `table`, restricted to `columns`, through `on_row`.
    pub async fn for_each_row<F>(&mut self, table: &str, columns: &[String], mut on_row: F) -> Result<u64>
    where
        F: FnMut(Vec<SqlValue>) -> Result<()>,
    {
        let quoted: Vec<String> = columns.iter().map(|c| super::writer::quote_identifier(c)).collect();
        let sql = format!(
            "SELECT {} FROM {}",
            quoted.join(", "),
            super::writer::quote_identifier(table)
        );
        debug!(%table, "streaming rows");

        let mut count = 0u64;
        let mut rows = self.conn.fetch(sql.as_str());
        while let Some(row) = rows.try_next().await? {
            on_row(decode_row(&row)?)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Reads a column that may come back as either text or binary string.
fn text_column(row: &MySqlRow, index: usize) -> Result<String> {
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Ok(s);
    }
    let bytes: Vec<u8> = row.try_get_unchecked(index)?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Backup(format!("column {} is not valid UTF-8: {}", index, e)))
}

pub fn decode_row(row: &MySqlRow) -> Result<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(index)?.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let raw: Vec<u8> = row.try_get_unchecked(index)?;
        values.push(decode_text_value(column.type_info().name(), raw));
    }
    Ok(values)
}

/// Maps a column's textual wire value to a `SqlValue` by its SQL type name.
pub fn decode_text_value(type_name: &str, raw: Vec<u8>) -> SqlValue {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.split_whitespace().next().unwrap_or("");

    match base {
        // TINYINT(1) is reported as BOOLEAN but may still hold any TINYINT.
        "BOOLEAN" | "BOOL" => match raw.as_slice() {
            b"0" => SqlValue::Bool(false),
            b"1" => SqlValue::Bool(true),
            _ => decode_text_value("TINYINT", raw),
        },
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => {
            let text = String::from_utf8_lossy(&raw);
            if upper.contains("UNSIGNED") {
                text.parse::<u64>().map(SqlValue::UInt).unwrap_or_else(|_| SqlValue::Other(text.into_owned()))
            } else {
                text.parse::<i64>().map(SqlValue::Int).unwrap_or_else(|_| SqlValue::Other(text.into_owned()))
            }
        }
        "FLOAT" | "DOUBLE" | "REAL" => {
            let text = String::from_utf8_lossy(&raw);
            text.parse::<f64>().map(SqlValue::Float).unwrap_or_else(|_| SqlValue::Other(text.into_owned()))
        }
        "DECIMAL" | "NUMERIC" => SqlValue::Other(String::from_utf8_lossy(&raw).into_owned()),
        "DATETIME" | "TIMESTAMP" => {
            let text = String::from_utf8_lossy(&raw).into_owned();
            parse_datetime(&text).map(SqlValue::DateTime).unwrap_or(SqlValue::Text(text))
        }
        "DATE" | "TIME" | "YEAR" => SqlValue::Text(String::from_utf8_lossy(&raw).into_owned()),
        "BIT" => SqlValue::UInt(raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY" => {
            SqlValue::Bytes(raw)
        }
        _ => match String::from_utf8(raw) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        },
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()
}
