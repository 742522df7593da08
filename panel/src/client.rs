//! Dialect-agnostic client handle and the factory that builds one from a
//! stored data-source descriptor.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::credentials::{ConnectOptions, Credentials};
use crate::crypto::CredentialCipher;
use crate::dialect::{self, Dialect};
use crate::entity::data_source;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

// ---------- errors ----------

#[derive(Debug)]
pub enum ClientError {
    /// The descriptor carries no credential blob.
    CredentialsMissing,
    DecryptFailure(String),
    CredentialsUnparsable(String),
    OptionsUnparsable(String),
    UnsupportedDialect(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::CredentialsMissing => write!(f, "Data source has no credentials"),
            ClientError::DecryptFailure(e) => write!(f, "Failed to decrypt credentials: {e}"),
            ClientError::CredentialsUnparsable(e) => write!(f, "Unparsable credentials: {e}"),
            ClientError::OptionsUnparsable(e) => write!(f, "Unparsable data source options: {e}"),
            ClientError::UnsupportedDialect(d) => write!(f, "Unsupported dialect: {d}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug)]
pub enum QueryError {
    Client(ClientError),
    Connect {
        dialect: Dialect,
        message: String,
    },
    /// Error reported by the database driver; `code` is the SQLSTATE or
    /// server error number when the driver exposes one.
    Execution {
        dialect: Dialect,
        code: Option<String>,
        message: String,
    },
    NoPrimaryKey {
        table: String,
    },
    InvalidRequest(String),
    Timeout(Duration),
}

impl QueryError {
    pub fn execution(dialect: Dialect, code: Option<String>, message: impl Into<String>) -> Self {
        QueryError::Execution {
            dialect,
            code,
            message: message.into(),
        }
    }

    pub fn connect(dialect: Dialect, message: impl std::fmt::Display) -> Self {
        QueryError::Connect {
            dialect,
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            QueryError::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Client(e) => write!(f, "{e}"),
            QueryError::Connect { dialect, message } => {
                write!(f, "Failed to connect to {dialect}: {message}")
            }
            QueryError::Execution {
                dialect,
                code: Some(code),
                message,
            } => write!(f, "{dialect} error {code}: {message}"),
            QueryError::Execution {
                dialect, message, ..
            } => write!(f, "{dialect} error: {message}"),
            QueryError::NoPrimaryKey { table } => {
                write!(f, "Table '{table}' has no primary key")
            }
            QueryError::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            QueryError::Timeout(d) => write!(f, "Query timed out after {}ms", d.as_millis()),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ClientError> for QueryError {
    fn from(e: ClientError) -> Self {
        QueryError::Client(e)
    }
}

// ---------- client trait ----------

/// A handle to one upstream database.
///
/// Handles are cheap to build; the network session is opened by `connect`
/// (or lazily on first use) and torn down by `close`. `disconnect` ends one
/// unit of work and keeps the session for reuse.
#[async_trait::async_trait]
pub trait SqlClient: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn connect(&self) -> Result<(), QueryError>;

    async fn disconnect(&self) -> Result<(), QueryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), QueryError>;

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError>;

    /// Run a statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError>;

    /// Run an INSERT and return the generated key, if any.
    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>, QueryError> {
        let rows = self.fetch(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v)))
    }
}

// ---------- descriptor ----------

/// Identifies one configured data source. Immutable for the life of a request.
#[derive(Debug, Clone)]
pub struct DataSourceDescriptor {
    pub id: Uuid,
    /// Raw dialect name as stored; validated by the factory.
    pub dialect: String,
    pub encrypted_credentials: String,
    pub options: Value,
}

impl DataSourceDescriptor {
    pub fn from_model(model: &data_source::Model) -> Result<Self, ClientError> {
        let options = serde_json::from_str(&model.options)
            .map_err(|e| ClientError::OptionsUnparsable(e.to_string()))?;
        Ok(Self {
            id: model.id,
            dialect: model.dialect.clone(),
            encrypted_credentials: model.encrypted_credentials.clone(),
            options,
        })
    }
}

// ---------- factory ----------

/// Builds client handles for descriptors. The pool depends on this seam.
pub trait ClientProvider: Send + Sync {
    fn get_client(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Arc<dyn SqlClient>, ClientError>;
}

pub struct ClientFactory {
    cipher: Arc<dyn CredentialCipher>,
}

impl ClientFactory {
    pub fn new(cipher: Arc<dyn CredentialCipher>) -> Self {
        Self { cipher }
    }

    /// Decrypt and parse the descriptor's credentials.
    pub fn credentials(&self, descriptor: &DataSourceDescriptor) -> Result<Credentials, ClientError> {
        if descriptor.encrypted_credentials.trim().is_empty() {
            return Err(ClientError::CredentialsMissing);
        }

        let decrypted = self
            .cipher
            .decrypt(&descriptor.encrypted_credentials)
            .map_err(|e| ClientError::DecryptFailure(e.to_string()))?;

        Credentials::from_json(decrypted)
            .map_err(|e| ClientError::CredentialsUnparsable(e.to_string()))
    }
}

impl ClientProvider for ClientFactory {
    fn get_client(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Arc<dyn SqlClient>, ClientError> {
        let credentials = self.credentials(descriptor)?;
        let options = ConnectOptions::from_json(&descriptor.options)
            .map_err(|e| ClientError::OptionsUnparsable(e.to_string()))?;
        let dialect: Dialect = descriptor.dialect.parse()?;
        let driver = dialect::driver(dialect);

        tracing::debug!(
            datasource_id = %descriptor.id,
            dialect = %dialect,
            host = %credentials.host,
            database = %credentials.database,
            "building client"
        );

        Ok(driver.get_client(credentials, options))
    }
}
