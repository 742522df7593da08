use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{
    FromSql, IsNull, Kind, ToSql, Type, private::BytesMut, to_sql_checked,
};
use tokio_postgres_rustls::MakeRustlsConnect;

use super::{Dialect, DialectDriver, is_id_like};
use crate::client::{QueryError, Row, SqlClient};
use crate::credentials::{ConnectOptions, Credentials};
use crate::schema::{FieldType, NativeColumn};

// ---------- driver ----------

pub struct PostgresDriver;

const TABLES_SQL: &str = "SELECT table_name::text AS name \
     FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT c.column_name::text AS name, \
            c.data_type::text AS data_type, \
            c.udt_name::text AS udt_name, \
            (c.is_nullable = 'YES') AS nullable, \
            c.character_maximum_length::int4 AS max_length, \
            c.column_default::text AS default_value, \
            EXISTS ( \
                SELECT 1 FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage kcu \
                  ON tc.constraint_name = kcu.constraint_name \
                 AND tc.table_schema = kcu.table_schema \
                 AND tc.table_name = kcu.table_name \
                WHERE tc.constraint_type = 'PRIMARY KEY' \
                  AND tc.table_schema = c.table_schema \
                  AND tc.table_name = c.table_name \
                  AND kcu.column_name = c.column_name \
            ) AS primary_key \
     FROM information_schema.columns c \
     WHERE c.table_schema = current_schema() AND c.table_name = $1::text \
     ORDER BY c.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT tc.constraint_name::text AS constraint_name, \
            kcu.column_name::text AS column_name, \
            ccu.table_name::text AS foreign_table_name, \
            ccu.column_name::text AS foreign_column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'FOREIGN KEY' \
       AND tc.table_schema = current_schema() AND tc.table_name = $1::text";

impl DialectDriver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    fn get_client(&self, credentials: Credentials, _options: ConnectOptions) -> Arc<dyn SqlClient> {
        Arc::new(PostgresClient::new(credentials))
    }

    fn infer_field_type(&self, column: &NativeColumn) -> FieldType {
        match column.udt_name.as_str() {
            "int2" | "int4" | "int8" | "oid" if is_id_like(&column.name) => FieldType::Id,
            "int2" | "int4" | "int8" | "oid" | "numeric" | "float4" | "float8" | "money" => {
                FieldType::Number
            }
            "bool" => FieldType::Boolean,
            "text" => FieldType::Textarea,
            "varchar" | "bpchar" | "char" | "name" | "citext" | "uuid" => FieldType::Text,
            "date" | "time" | "timetz" | "timestamp" | "timestamptz" => FieldType::DateTime,
            "json" | "jsonb" => FieldType::Json,
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

struct Session {
    client: Arc<tokio_postgres::Client>,
    connection: JoinHandle<()>,
}

/// Lazily-connected PostgreSQL client. `tokio_postgres::Client` pipelines
/// concurrent queries over one session, so no extra locking is needed
/// once the session exists.
pub struct PostgresClient {
    credentials: Credentials,
    session: AsyncRwLock<Option<Session>>,
}

impl PostgresClient {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            session: AsyncRwLock::new(None),
        }
    }

    /// Return the live session, opening it on first call.
    async fn session(&self) -> Result<Arc<tokio_postgres::Client>, QueryError> {
        // Fast path: already connected
        {
            let guard = self.session.read().await;
            if let Some(s) = guard.as_ref()
                && !s.client.is_closed()
            {
                return Ok(s.client.clone());
            }
        }

        // Slow path: connect (serialised by write lock, double-check inside)
        let mut guard = self.session.write().await;
        if let Some(s) = guard.as_ref()
            && !s.client.is_closed()
        {
            return Ok(s.client.clone());
        }

        let session = self.open().await?;
        let client = session.client.clone();
        if let Some(stale) = guard.replace(session) {
            stale.connection.abort();
        }
        Ok(client)
    }

    async fn open(&self) -> Result<Session, QueryError> {
        let creds = &self.credentials;
        let mut config = tokio_postgres::Config::new();
        config
            .host(&creds.host)
            .port(creds.port_for(Dialect::Postgresql))
            .dbname(&creds.database)
            .user(&creds.user)
            .application_name("panel")
            .connect_timeout(Duration::from_secs(30));
        if let Some(password) = &creds.password {
            config.password(password);
        }

        tracing::debug!(
            host = %creds.host,
            database = %creds.database,
            ssl = creds.use_ssl,
            "opening postgres session"
        );

        let (client, connection) = if creds.use_ssl {
            config.ssl_mode(SslMode::Require);
            let (client, connection) = config
                .connect(MakeRustlsConnect::new(tls_config()?))
                .await
                .map_err(|e| QueryError::connect(Dialect::Postgresql, e))?;
            (client, spawn_connection(connection))
        } else {
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|e| QueryError::connect(Dialect::Postgresql, e))?;
            (client, spawn_connection(connection))
        };

        Ok(Session {
            client: Arc::new(client),
            connection,
        })
    }
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection error");
        }
    })
}

fn tls_config() -> Result<rustls::ClientConfig, QueryError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Ok(rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| QueryError::connect(Dialect::Postgresql, e))?
    .with_root_certificates(roots)
    .with_no_client_auth())
}

fn query_error(e: tokio_postgres::Error) -> QueryError {
    let code = e.code().map(|c| c.code().to_string());
    let message = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    QueryError::execution(Dialect::Postgresql, code, message)
}

#[async_trait::async_trait]
impl SqlClient for PostgresClient {
    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    async fn connect(&self) -> Result<(), QueryError> {
        self.session().await.map(|_| ())
    }

    async fn close(&self) -> Result<(), QueryError> {
        if let Some(session) = self.session.write().await.take() {
            drop(session.client);
            session.connection.abort();
        }
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let client = self.session().await?;
        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = client.query(sql, &refs).await.map_err(query_error)?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError> {
        let client = self.session().await?;
        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        client.execute(sql, &refs).await.map_err(query_error)
    }
}

// ---------- parameters ----------

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Binds a JSON value as whatever type the server inferred for the placeholder.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => as_bool(value)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::INT8 => as_i64(value)?.to_sql(ty, out),
            Type::OID => u32::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::FLOAT4 => (as_f64(value)? as f32).to_sql(ty, out),
            Type::FLOAT8 => as_f64(value)?.to_sql(ty, out),
            Type::NUMERIC => Decimal::from_str(as_text(value).trim())?.to_sql(ty, out),
            Type::JSON | Type::JSONB => value.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(as_text(value).trim())?.to_sql(ty, out),
            Type::DATE => parse_date(&as_text(value))?.to_sql(ty, out),
            Type::TIME => NaiveTime::from_str(as_text(value).trim())?.to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(&as_text(value))?.to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(&as_text(value))?.to_sql(ty, out),
            Type::BYTEA => as_bytes(value).to_sql(ty, out),
            _ if is_text_like(ty) => {
                out.extend_from_slice(as_text(value).as_bytes());
                Ok(IsNull::No)
            }
            _ => Err(format!("cannot bind {value} as {}", ty.name()).into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Types whose binary wire format is plain UTF-8.
fn is_text_like(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || matches!(ty.kind(), Kind::Enum(_))
        || ty.name() == "citext"
}

/// Base64 (as rows are decoded) when it parses, raw UTF-8 otherwise.
fn as_bytes(value: &Value) -> Vec<u8> {
    let text = as_text(value);
    STANDARD
        .decode(text.trim())
        .unwrap_or_else(|_| text.into_bytes())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_bool(value: &Value) -> Result<bool, BoxError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "on" => Ok(true),
            "false" | "f" | "0" | "no" | "off" => Ok(false),
            other => Err(format!("cannot bind '{other}' as boolean").into()),
        },
        other => Err(format!("cannot bind {other} as boolean").into()),
    }
}

fn as_i64(value: &Value) -> Result<i64, BoxError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("cannot bind {n} as integer").into()),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => Ok(s.trim().parse::<i64>()?),
        other => Err(format!("cannot bind {other} as integer").into()),
    }
}

fn as_f64(value: &Value) -> Result<f64, BoxError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("cannot bind {n} as float").into()),
        Value::String(s) => Ok(s.trim().parse::<f64>()?),
        other => Err(format!("cannot bind {other} as float").into()),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, BoxError> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::from_str(s) {
        return Ok(d);
    }
    Ok(parse_timestamp(s)?.date())
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    let date = NaiveDate::from_str(s)?;
    Ok(date.and_time(NaiveTime::MIN))
}

fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    Ok(parse_timestamp(s)?.and_utc())
}

// ---------- rows ----------

/// Any value, read as its raw bytes. Enum labels and other text-encoded
/// types decode correctly; binary-only types degrade to lossy text.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn decode_row(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), decode_cell(row, idx, column.type_())))
        .collect()
}

fn decode_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(Value::from),
        Type::INT4 => get::<i32>(row, idx).map(Value::from),
        Type::INT8 => get::<i64>(row, idx).map(Value::from),
        Type::OID => get::<u32>(row, idx).map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx).map(float),
        Type::NUMERIC => get::<Decimal>(row, idx).map(|d| {
            d.to_string()
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(d.to_string()))
        }),
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        Type::UUID => get::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        Type::DATE => get::<NaiveDate>(row, idx).map(|d| Value::String(d.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx).map(|t| Value::String(t.to_string())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, idx).map(|t| Value::String(t.to_rfc3339()))
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(|b| Value::String(STANDARD.encode(b))),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            get::<Vec<Option<String>>>(row, idx).map(|v| serde_json::json!(v))
        }
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx).map(|v| serde_json::json!(v)),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx).map(|v| serde_json::json!(v)),
        _ => get::<RawText>(row, idx).map(|t| Value::String(t.0)),
    };
    value.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn native(name: &str, udt: &str) -> NativeColumn {
        NativeColumn {
            name: name.to_string(),
            data_type: udt.to_string(),
            udt_name: udt.to_string(),
            nullable: true,
            max_length: None,
            default_value: None,
            primary_key: false,
        }
    }

    #[test]
    fn infers_field_types() {
        let d = PostgresDriver;
        assert_eq!(d.infer_field_type(&native("id", "int8")), FieldType::Id);
        assert_eq!(d.infer_field_type(&native("views", "int4")), FieldType::Number);
        assert_eq!(d.infer_field_type(&native("price", "numeric")), FieldType::Number);
        assert_eq!(d.infer_field_type(&native("title", "varchar")), FieldType::Text);
        assert_eq!(d.infer_field_type(&native("body", "text")), FieldType::Textarea);
        assert_eq!(d.infer_field_type(&native("published", "bool")), FieldType::Boolean);
        assert_eq!(
            d.infer_field_type(&native("created_at", "timestamptz")),
            FieldType::DateTime
        );
        assert_eq!(d.infer_field_type(&native("meta", "jsonb")), FieldType::Json);
        assert_eq!(d.infer_field_type(&native("shape", "geometry")), FieldType::Text);
    }

    #[test]
    fn binds_values_by_server_type() {
        let mut out = BytesMut::new();
        assert!(matches!(
            PgParam(&json!("42")).to_sql(&Type::INT4, &mut out),
            Ok(IsNull::No)
        ));
        assert_eq!(&out[..], &42i32.to_be_bytes());

        let mut out = BytesMut::new();
        PgParam(&json!("true")).to_sql(&Type::BOOL, &mut out).unwrap();
        assert_eq!(&out[..], &[1u8]);

        let mut out = BytesMut::new();
        PgParam(&json!("%rust%")).to_sql(&Type::TEXT, &mut out).unwrap();
        assert_eq!(&out[..], b"%rust%");

        let mut out = BytesMut::new();
        assert!(matches!(
            PgParam(&Value::Null).to_sql(&Type::INT8, &mut out),
            Ok(IsNull::Yes)
        ));

        let mut out = BytesMut::new();
        assert!(PgParam(&json!("abc")).to_sql(&Type::INT4, &mut out).is_err());
    }

    #[test]
    fn refuses_types_without_a_text_wire_format() {
        for ty in [Type::INTERVAL, Type::INET, Type::MONEY, Type::INT4_ARRAY, Type::TIMETZ] {
            let mut out = BytesMut::new();
            let err = PgParam(&json!("1 day")).to_sql(&ty, &mut out).err().unwrap();
            assert!(err.to_string().contains(ty.name()), "{ty}");
            assert!(out.is_empty());
        }

        let mut out = BytesMut::new();
        PgParam(&json!("aGk=")).to_sql(&Type::BYTEA, &mut out).unwrap();
        assert_eq!(&out[..], b"hi");

        let mut out = BytesMut::new();
        PgParam(&json!("draft")).to_sql(&Type::VARCHAR, &mut out).unwrap();
        assert_eq!(&out[..], b"draft");
    }

    #[test]
    fn parses_timestamps_leniently() {
        assert_eq!(
            parse_timestamp("2024-03-01 10:20:30").unwrap().to_string(),
            "2024-03-01 10:20:30"
        );
        assert_eq!(
            parse_timestamp("2024-03-01T10:20:30Z").unwrap().to_string(),
            "2024-03-01 10:20:30"
        );
        assert_eq!(
            parse_date("2024-03-01T23:59:00").unwrap().to_string(),
            "2024-03-01"
        );
    }
}
