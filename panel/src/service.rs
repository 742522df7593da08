//! Named-operation entry point wrapping every call in a
//! `connect -> invoke -> disconnect` envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ClientError, DataSourceDescriptor, QueryError, SqlClient};
use crate::executor::{
    CountArgs, CreateRecordArgs, DeleteRecordArgs, DeleteRecordsArgs, Executor, GetColumnsArgs,
    GetRecordArgs, GetRecordsArgs, UpdateRecordArgs,
};
use crate::pool::ConnectionPool;

/// The closed set of operations a data source can run.
///
/// Wire shape: `{"name": "getRecords", "payload": {...}}`. `getTables`
/// takes no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum Operation {
    GetTables,
    GetColumns(GetColumnsArgs),
    GetRecords(GetRecordsArgs),
    GetRecordsCount(CountArgs),
    GetRecord(GetRecordArgs),
    CreateRecord(CreateRecordArgs),
    UpdateRecord(UpdateRecordArgs),
    DeleteRecord(DeleteRecordArgs),
    DeleteRecords(DeleteRecordsArgs),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetTables => "getTables",
            Operation::GetColumns(_) => "getColumns",
            Operation::GetRecords(_) => "getRecords",
            Operation::GetRecordsCount(_) => "getRecordsCount",
            Operation::GetRecord(_) => "getRecord",
            Operation::CreateRecord(_) => "createRecord",
            Operation::UpdateRecord(_) => "updateRecord",
            Operation::DeleteRecord(_) => "deleteRecord",
            Operation::DeleteRecords(_) => "deleteRecords",
        }
    }
}

enum Backend {
    Sql(Arc<dyn SqlClient>),
    /// Stand-in for a data source whose dialect is not supported; every
    /// operation yields `null`.
    Null { dialect: String },
}

pub struct QueryService {
    backend: Backend,
    deadline: Option<Duration>,
}

impl QueryService {
    pub fn new(client: Arc<dyn SqlClient>) -> Self {
        Self {
            backend: Backend::Sql(client),
            deadline: None,
        }
    }

    pub fn null(dialect: impl Into<String>) -> Self {
        Self {
            backend: Backend::Null {
                dialect: dialect.into(),
            },
            deadline: None,
        }
    }

    /// Bound each invocation; `None` leaves calls unbounded.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Service over a pooled client. An unsupported dialect degrades to the
    /// null service so one bad descriptor does not take down the others.
    pub async fn for_data_source(
        pool: &ConnectionPool,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Self, ClientError> {
        match pool.get_connection(descriptor).await {
            Ok(client) => Ok(Self::new(client)),
            Err(ClientError::UnsupportedDialect(dialect)) => {
                tracing::warn!(
                    datasource_id = %descriptor.id,
                    dialect = %dialect,
                    "unsupported dialect, serving null results"
                );
                Ok(Self::null(dialect))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.backend, Backend::Null { .. })
    }

    pub async fn run_query(&self, operation: Operation) -> Result<Value, QueryError> {
        let client = match &self.backend {
            Backend::Sql(client) => client,
            Backend::Null { dialect } => {
                tracing::debug!(dialect = %dialect, operation = operation.name(), "null service");
                return Ok(Value::Null);
            }
        };

        client.connect().await?;
        let result = self.invoke(client.as_ref(), &operation).await;
        release(client.as_ref()).await;
        result
    }

    /// Run `operations` concurrently against one connected client. Each
    /// operation gets its own result; only a failed connect fails the batch.
    pub async fn run_queries(
        &self,
        operations: Vec<Operation>,
    ) -> Result<Vec<Result<Value, QueryError>>, QueryError> {
        let client = match &self.backend {
            Backend::Sql(client) => client,
            Backend::Null { dialect } => {
                tracing::debug!(dialect = %dialect, count = operations.len(), "null service batch");
                return Ok(operations.iter().map(|_| Ok(Value::Null)).collect());
            }
        };

        client.connect().await?;
        let results = futures::future::join_all(
            operations
                .iter()
                .map(|operation| self.invoke(client.as_ref(), operation)),
        )
        .await;
        release(client.as_ref()).await;
        Ok(results)
    }

    async fn invoke(&self, client: &dyn SqlClient, operation: &Operation) -> Result<Value, QueryError> {
        let started = Instant::now();
        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, dispatch(client, operation))
                .await
                .map_err(|_| QueryError::Timeout(deadline))?,
            None => dispatch(client, operation).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(operation = operation.name(), elapsed_ms, "operation done"),
            Err(e) => tracing::warn!(
                operation = operation.name(),
                elapsed_ms,
                error = %e,
                "operation failed"
            ),
        }
        result
    }
}

async fn release(client: &dyn SqlClient) {
    if let Err(e) = client.disconnect().await {
        tracing::warn!(dialect = %client.dialect(), error = %e, "disconnect failed");
    }
}

async fn dispatch(client: &dyn SqlClient, operation: &Operation) -> Result<Value, QueryError> {
    let executor = Executor::new(client);
    Ok(match operation {
        Operation::GetTables => Value::from(executor.get_tables().await?),
        Operation::GetColumns(args) => {
            let columns = executor.get_columns(args).await?;
            serde_json::to_value(columns)
                .map_err(|e| QueryError::InvalidRequest(format!("unserializable columns: {e}")))?
        }
        Operation::GetRecords(args) => rows(executor.get_records(args).await?),
        Operation::GetRecordsCount(args) => Value::from(executor.get_records_count(args).await?),
        Operation::GetRecord(args) => executor
            .get_record(args)
            .await?
            .map(Value::Object)
            .unwrap_or(Value::Null),
        Operation::CreateRecord(args) => executor.create_record(args).await?,
        Operation::UpdateRecord(args) => Value::from(executor.update_record(args).await?),
        Operation::DeleteRecord(args) => Value::from(executor.delete_record(args).await?),
        Operation::DeleteRecords(args) => Value::from(executor.delete_records(args).await?),
    })
}

fn rows(rows: Vec<crate::client::Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}
