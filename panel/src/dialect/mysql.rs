use std::sync::Arc;

use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, SslOpts};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use super::{Dialect, DialectDriver, is_id_like};
use crate::client::{QueryError, Row, SqlClient};
use crate::credentials::{ConnectOptions, Credentials};
use crate::schema::{FieldType, NativeColumn};

// ---------- driver ----------

/// Serves both MySQL and MariaDB; the two differ only in the dialect tag
/// reported to callers.
pub struct MysqlDriver {
    dialect: Dialect,
}

impl MysqlDriver {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

const TABLES_SQL: &str = "SELECT table_name AS name \
     FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT column_name AS name, \
            data_type AS data_type, \
            column_type AS udt_name, \
            (is_nullable = 'YES') AS nullable, \
            character_maximum_length AS max_length, \
            column_default AS default_value, \
            (column_key = 'PRI') AS primary_key \
     FROM information_schema.columns \
     WHERE table_schema = DATABASE() AND table_name = ? \
     ORDER BY ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT kcu.constraint_name AS constraint_name, \
            kcu.column_name AS column_name, \
            kcu.referenced_table_name AS foreign_table_name, \
            kcu.referenced_column_name AS foreign_column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name \
      AND tc.table_schema = kcu.table_schema \
      AND tc.table_name = kcu.table_name \
     WHERE tc.constraint_type = 'FOREIGN KEY' \
       AND tc.table_schema = DATABASE() AND tc.table_name = ?";

const INTEGER_TYPES: [&str; 6] = ["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

impl DialectDriver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn get_client(&self, credentials: Credentials, _options: ConnectOptions) -> Arc<dyn SqlClient> {
        Arc::new(MysqlClient::new(self.dialect, credentials))
    }

    fn infer_field_type(&self, column: &NativeColumn) -> FieldType {
        let data_type = column.data_type.as_str();
        let column_type = column.udt_name.as_str();

        match data_type {
            "tinyint" if column_type.starts_with("tinyint(1)") => FieldType::Boolean,
            "bit" if column_type == "bit(1)" => FieldType::Boolean,
            "bool" | "boolean" => FieldType::Boolean,
            t if INTEGER_TYPES.contains(&t) && is_id_like(&column.name) => FieldType::Id,
            t if INTEGER_TYPES.contains(&t) => FieldType::Number,
            "decimal" | "numeric" | "float" | "double" | "real" | "bit" | "year" => {
                FieldType::Number
            }
            "tinytext" | "text" | "mediumtext" | "longtext" => FieldType::Textarea,
            "date" | "datetime" | "timestamp" | "time" => FieldType::DateTime,
            "json" => FieldType::Json,
            "enum" | "set" => FieldType::Select,
            _ => FieldType::Text,
        }
    }

    fn tables_query(&self) -> &'static str {
        TABLES_SQL
    }

    fn columns_query(&self) -> &'static str {
        COLUMNS_SQL
    }

    fn foreign_keys_query(&self) -> &'static str {
        FOREIGN_KEYS_SQL
    }
}

// ---------- client ----------

/// One lazily-opened `mysql_async` session. Statements on a session are
/// serialised; concurrency comes from the pool handing out several clients.
pub struct MysqlClient {
    dialect: Dialect,
    credentials: Credentials,
    conn: AsyncMutex<Option<Conn>>,
}

impl MysqlClient {
    pub fn new(dialect: Dialect, credentials: Credentials) -> Self {
        Self {
            dialect,
            credentials,
            conn: AsyncMutex::new(None),
        }
    }

    fn opts(&self) -> OptsBuilder {
        let creds = &self.credentials;
        let opts = OptsBuilder::default()
            .ip_or_hostname(creds.host.clone())
            .tcp_port(creds.port_for(self.dialect))
            .db_name(Some(creds.database.clone()))
            .user(Some(creds.user.clone()))
            .pass(creds.password.clone())
            .client_found_rows(true);

        if creds.use_ssl {
            opts.ssl_opts(Some(SslOpts::default()))
        } else {
            opts
        }
    }

    /// Borrow the open session from `slot`, connecting if it is empty.
    async fn session<'g>(&self, slot: &'g mut Option<Conn>) -> Result<&'g mut Conn, QueryError> {
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                tracing::debug!(
                    dialect = %self.dialect,
                    host = %self.credentials.host,
                    database = %self.credentials.database,
                    ssl = self.credentials.use_ssl,
                    "opening mysql session"
                );
                Conn::new(self.opts())
                    .await
                    .map_err(|e| QueryError::connect(self.dialect, e))?
            }
        };
        Ok(slot.insert(conn))
    }

    fn error(&self, slot: &mut Option<Conn>, e: mysql_async::Error) -> QueryError {
        match e {
            mysql_async::Error::Server(server) => QueryError::execution(
                self.dialect,
                Some(server.code.to_string()),
                server.message,
            ),
            other => {
                // The session is in an unknown state after a transport error
                slot.take();
                QueryError::execution(self.dialect, None, other.to_string())
            }
        }
    }
}

#[async_trait::async_trait]
impl SqlClient for MysqlClient {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self) -> Result<(), QueryError> {
        let mut guard = self.conn.lock().await;
        self.session(&mut guard).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), QueryError> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| QueryError::connect(self.dialect, e))?;
        }
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let mut guard = self.conn.lock().await;
        let conn = self.session(&mut guard).await?;

        match conn.exec::<mysql_async::Row, _, _>(sql, to_params(params)).await {
            Ok(rows) => Ok(rows.iter().map(decode_row).collect()),
            Err(e) => Err(self.error(&mut guard, e)),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError> {
        let mut guard = self.conn.lock().await;
        let conn = self.session(&mut guard).await?;

        match conn.exec_drop(sql, to_params(params)).await {
            Ok(()) => Ok(conn.affected_rows()),
            Err(e) => Err(self.error(&mut guard, e)),
        }
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>, QueryError> {
        let mut guard = self.conn.lock().await;
        let conn = self.session(&mut guard).await?;

        match conn.exec_drop(sql, to_params(params)).await {
            Ok(()) => Ok(conn
                .last_insert_id()
                .filter(|id| *id != 0)
                .map(Value::from)),
            Err(e) => Err(self.error(&mut guard, e)),
        }
    }
}

// ---------- values ----------

fn to_params(params: &[Value]) -> Vec<mysql_async::Value> {
    params.iter().map(to_mysql).collect()
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                mysql_async::Value::UInt(u)
            } else {
                mysql_async::Value::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        other => mysql_async::Value::from(other.to_string()),
    }
}

fn decode_row(row: &mysql_async::Row) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row
                .as_ref(idx)
                .map(|v| from_mysql(v, column.column_type()))
                .unwrap_or(Value::Null);
            (column.name_str().into_owned(), value)
        })
        .collect()
}

fn from_mysql(value: &mysql_async::Value, column_type: ColumnType) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(i) => Value::from(*i),
        mysql_async::Value::UInt(u) => Value::from(*u),
        mysql_async::Value::Float(f) => float(f64::from(*f)),
        mysql_async::Value::Double(d) => float(*d),
        mysql_async::Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match column_type {
                ColumnType::MYSQL_TYPE_JSON => {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => text
                    .parse::<serde_json::Number>()
                    .map(Value::Number)
                    .unwrap_or(Value::String(text)),
                _ => Value::String(text),
            }
        }
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else if *micros == 0 {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
                ))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micros:06}"
                ))
            }
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, _) => {
            let hours = u32::from(*hours) + days * 24;
            let sign = if *negative { "-" } else { "" };
            Value::String(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
