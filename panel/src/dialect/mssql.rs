use std::borrow::Cow;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{Dialect, DialectDriver, is_id_like};
use crate::client::{QueryError, Row, SqlClient};
use crate::credentials::{ConnectOptions, Credentials};
use crate::schema::{FieldType, NativeColumn};

// ---------- driver ----------

pub struct MssqlDriver;

const TABLES_SQL: &str = "SELECT TABLE_NAME AS name \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "SELECT c.COLUMN_NAME AS name, \
            c.DATA_TYPE AS data_type, \
            c.DATA_TYPE AS udt_name, \
            CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS bit) AS nullable, \
            c.CHARACTER_MAXIMUM_LENGTH AS max_length, \
            c.COLUMN_DEFAULT AS default_value, \
            CAST(CASE WHEN EXISTS ( \
                SELECT 1 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                  ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                 AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                  AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA \
                  AND tc.TABLE_NAME = c.TABLE_NAME \
                  AND kcu.COLUMN_NAME = c.COLUMN_NAME \
            ) THEN 1 ELSE 0 END AS bit) AS primary_key \
     FROM INFORMATION_SCHEMA.COLUMNS c \
     WHERE c.TABLE_SCHEMA = SCHEMA_NAME() AND c.TABLE_NAME = @P1 \
     ORDER BY c.ORDINAL_POSITION";

// INFORMATION_SCHEMA has no referenced-column view in SQL Server; read sys.* instead
const FOREIGN_KEYS_SQL: &str = "SELECT fk.name AS constraint_name, \
            pc.name AS column_name, \
            rt.name AS foreign_table_name, \
            rc.name AS foreign_column_name \
     FROM sys.foreign_keys fk \
     JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
     JOIN sys.columns pc \
       ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
     JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id \
     JOIN sys.columns rc \
       ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
     WHERE fk.parent_object_id = OBJECT_ID(QUOTENAME(SCHEMA_NAME()) + '.' + QUOTENAME(@P1))";

impl DialectDriver for MssqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    fn get_client(&self, credentials: Credentials, options: ConnectOptions) -> Arc<dyn SqlClient> {
        Arc::new(MssqlClient::new(credentials, options))
    }

    fn infer_field_type(&self, column: &NativeColumn) -> FieldType {
        match column.data_type.as_str() {
            "bit" => FieldType::Boolean,
            "tinyint" | "smallint" | "int" | "bigint" if is_id_like(&column.name) => FieldType::Id,
            "tinyint" | "smallint" | "int" | "bigint" | "decimal" | "numeric" | "float" | "real"
            | "money" | "smallmoney" => FieldType::Number,
            "text" | "ntext" | "xml" => FieldType::Textarea,
            "varchar" | "nvarchar" if column.max_length == Some(-1) => FieldType::Textarea,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time" => {
                FieldType::DateTime
            }
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

type Session = Client<Compat<TcpStream>>;

pub struct MssqlClient {
    credentials: Credentials,
    options: ConnectOptions,
    session: AsyncMutex<Option<Session>>,
}

impl MssqlClient {
    pub fn new(credentials: Credentials, options: ConnectOptions) -> Self {
        Self {
            credentials,
            options,
            session: AsyncMutex::new(None),
        }
    }

    fn config(&self) -> Config {
        let creds = &self.credentials;
        let mut config = Config::new();
        config.host(&creds.host);
        config.port(creds.port_for(Dialect::Mssql));
        config.database(&creds.database);
        config.application_name("panel");
        config.authentication(AuthMethod::sql_server(
            &creds.user,
            creds.password.as_deref().unwrap_or(""),
        ));
        if creds.use_ssl {
            config.encryption(EncryptionLevel::Required);
            if self.options.trust_server_certificate {
                config.trust_cert();
            }
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }

    async fn open(&self) -> Result<Session, QueryError> {
        let config = self.config();

        tracing::debug!(
            host = %self.credentials.host,
            database = %self.credentials.database,
            ssl = self.credentials.use_ssl,
            "opening mssql session"
        );

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| QueryError::connect(Dialect::Mssql, e))?;
        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| QueryError::connect(Dialect::Mssql, e))
    }

    async fn session<'g>(&self, slot: &'g mut Option<Session>) -> Result<&'g mut Session, QueryError> {
        let session = match slot.take() {
            Some(session) => session,
            None => self.open().await?,
        };
        Ok(slot.insert(session))
    }
}

fn query_error(slot: &mut Option<Session>, e: tiberius::error::Error) -> QueryError {
    match e {
        tiberius::error::Error::Server(token) => QueryError::execution(
            Dialect::Mssql,
            Some(token.code().to_string()),
            token.message(),
        ),
        other => {
            slot.take();
            QueryError::execution(Dialect::Mssql, None, other.to_string())
        }
    }
}

#[async_trait::async_trait]
impl SqlClient for MssqlClient {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    async fn connect(&self) -> Result<(), QueryError> {
        let mut guard = self.session.lock().await;
        self.session(&mut guard).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), QueryError> {
        if let Some(session) = self.session.lock().await.take() {
            session
                .close()
                .await
                .map_err(|e| QueryError::connect(Dialect::Mssql, e))?;
        }
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let params: Vec<MssqlParam<'_>> = params.iter().map(MssqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard).await?;

        let rows = match session.query(sql, &refs).await {
            Ok(stream) => stream.into_first_result().await,
            Err(e) => Err(e),
        };
        match rows {
            Ok(rows) => Ok(rows.iter().map(decode_row).collect()),
            Err(e) => Err(query_error(&mut guard, e)),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError> {
        let params: Vec<MssqlParam<'_>> = params.iter().map(MssqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard).await?;

        match session.execute(sql, &refs).await {
            Ok(result) => Ok(result.total()),
            Err(e) => Err(query_error(&mut guard, e)),
        }
    }
}

// ---------- values ----------

struct MssqlParam<'a>(&'a Value);

impl tiberius::ToSql for MssqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ColumnData::I64(Some(i)),
                None => ColumnData::F64(n.as_f64()),
            },
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            other => ColumnData::String(Some(Cow::Owned(other.to_string()))),
        }
    }
}

fn decode_row(row: &tiberius::Row) -> Row {
    row.cells()
        .enumerate()
        .map(|(idx, (column, data))| (column.name().to_string(), decode_cell(row, idx, data)))
        .collect()
}

fn decode_cell(row: &tiberius::Row, idx: usize, data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::from(*v),
        ColumnData::I16(Some(v)) => Value::from(*v),
        ColumnData::I32(Some(v)) => Value::from(*v),
        ColumnData::I64(Some(v)) => Value::from(*v),
        ColumnData::F32(Some(v)) => float(f64::from(*v)),
        ColumnData::F64(Some(v)) => float(*v),
        ColumnData::Numeric(Some(n)) => {
            match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
                Ok(d) => d
                    .to_string()
                    .parse::<serde_json::Number>()
                    .map(Value::Number)
                    .unwrap_or_else(|_| Value::String(d.to_string())),
                Err(_) => Value::Null,
            }
        }
        ColumnData::String(Some(s)) => Value::String(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::String(g.to_string()),
        ColumnData::Xml(Some(xml)) => Value::String(xml.to_string()),
        ColumnData::Binary(Some(b)) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTimeOffset(Some(_)) => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnData::Date(Some(_)) => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Time(Some(_)) => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tiberius::ToSql;

    fn native(name: &str, data_type: &str, max_length: Option<i64>) -> NativeColumn {
        NativeColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: data_type.to_string(),
            nullable: true,
            max_length,
            default_value: None,
            primary_key: false,
        }
    }

    #[test]
    fn infers_field_types() {
        let d = MssqlDriver;
        assert_eq!(d.infer_field_type(&native("id", "int", None)), FieldType::Id);
        assert_eq!(d.infer_field_type(&native("total", "decimal", None)), FieldType::Number);
        assert_eq!(d.infer_field_type(&native("active", "bit", None)), FieldType::Boolean);
        assert_eq!(
            d.infer_field_type(&native("notes", "nvarchar", Some(-1))),
            FieldType::Textarea
        );
        assert_eq!(d.infer_field_type(&native("name", "nvarchar", Some(50))), FieldType::Text);
        assert_eq!(
            d.infer_field_type(&native("seen_at", "datetime2", None)),
            FieldType::DateTime
        );
        assert_eq!(
            d.infer_field_type(&native("token", "uniqueidentifier", None)),
            FieldType::Text
        );
    }

    #[test]
    fn binds_json_params() {
        assert!(matches!(MssqlParam(&json!(null)).to_sql(), ColumnData::String(None)));
        assert!(matches!(MssqlParam(&json!(true)).to_sql(), ColumnData::Bit(Some(true))));
        assert!(matches!(MssqlParam(&json!(7)).to_sql(), ColumnData::I64(Some(7))));
        assert!(matches!(
            MssqlParam(&json!(2.5)).to_sql(),
            ColumnData::F64(Some(v)) if v == 2.5
        ));
        match MssqlParam(&json!("%abc%")).to_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, "%abc%"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn catalog_queries_use_positional_params() {
        assert!(COLUMNS_SQL.contains("@P1"));
        assert!(FOREIGN_KEYS_SQL.contains("@P1"));
        assert!(!TABLES_SQL.contains("@P1"));
    }
}
