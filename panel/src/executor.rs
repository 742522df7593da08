//! Table-scoped CRUD operations over a connected client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::{QueryError, Row, SqlClient};
use crate::dialect::{self, DialectDriver};
use crate::filter::{self, FilterNode};
use crate::query::{
    self, Count, Delete, Direction, Insert, OrderBy, Predicate, Select, Serializer, Statement, Update,
    WhereClause,
};
use crate::schema::{Column, Introspector, StoredOverrides};

// ---------- payloads ----------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetColumnsArgs {
    pub table_name: String,
    /// Overrides persisted for this table, keyed by column name.
    #[serde(default)]
    pub stored_columns: StoredOverrides,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordsArgs {
    pub table_name: String,
    #[serde(default, deserialize_with = "query::lenient_bound")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "query::lenient_bound")]
    pub offset: Option<u64>,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_direction: Direction,
    #[serde(default)]
    pub select: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountArgs {
    pub table_name: String,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordArgs {
    pub table_name: String,
    pub record_id: Value,
    #[serde(default)]
    pub select: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordArgs {
    pub table_name: String,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecordArgs {
    pub table_name: String,
    pub record_id: Value,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRecordArgs {
    pub table_name: String,
    pub record_id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRecordsArgs {
    pub table_name: String,
    pub record_ids: Vec<Value>,
}

// ---------- executor ----------

/// Runs one operation as one statement (plus a primary-key lookup where the
/// operation addresses a single record). No implicit transactions.
pub struct Executor<'a> {
    client: &'a dyn SqlClient,
    driver: &'static dyn DialectDriver,
    serializer: Serializer,
}

impl<'a> Executor<'a> {
    pub fn new(client: &'a dyn SqlClient) -> Self {
        let dialect = client.dialect();
        Self {
            client,
            driver: dialect::driver(dialect),
            serializer: Serializer::new(dialect.flavor()),
        }
    }

    fn introspector(&self) -> Introspector<'a> {
        Introspector::new(self.client, self.driver)
    }

    fn render(&self, stmt: impl Into<Statement>) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.serializer.serialize(&stmt.into(), &mut params);
        (sql, params)
    }

    async fn primary_key(&self, table: &str) -> Result<Option<String>, QueryError> {
        self.introspector().primary_key(table).await
    }

    async fn require_primary_key(&self, table: &str) -> Result<String, QueryError> {
        self.primary_key(table)
            .await?
            .ok_or_else(|| QueryError::NoPrimaryKey {
                table: table.to_string(),
            })
    }

    pub async fn get_tables(&self) -> Result<Vec<String>, QueryError> {
        self.introspector().get_tables().await
    }

    pub async fn get_columns(&self, args: &GetColumnsArgs) -> Result<Vec<Column>, QueryError> {
        require_table(&args.table_name)?;
        self.introspector()
            .get_columns(&args.table_name, &args.stored_columns)
            .await
    }

    pub async fn get_records(&self, args: &GetRecordsArgs) -> Result<Vec<Row>, QueryError> {
        require_table(&args.table_name)?;

        let mut select = Select::new(args.table_name.as_str());
        select.columns = args.select.clone();
        filter::compile(&mut select.filter, &args.filters);

        if let Some(column) = args.order_by.as_deref().filter(|c| !c.is_empty()) {
            select.order_by = Some(OrderBy {
                column: column.to_string(),
                direction: args.order_direction,
            });
        }

        // Pagination needs both bounds; either one alone is ignored
        if let (Some(limit), Some(offset)) = (args.limit, args.offset) {
            select.limit = Some(limit);
            select.offset = Some(offset);
        }

        let (sql, params) = self.render(select);
        tracing::debug!(table = %args.table_name, sql = %sql, "get_records");
        self.client.fetch(&sql, &params).await
    }

    pub async fn get_records_count(&self, args: &CountArgs) -> Result<u64, QueryError> {
        require_table(&args.table_name)?;

        let mut filter = WhereClause::new();
        filter::compile(&mut filter, &args.filters);
        let count = Count {
            table: args.table_name.clone(),
            column: self.primary_key(&args.table_name).await?,
            filter,
        };

        let (sql, params) = self.render(count);
        let rows = self.client.fetch(&sql, &params).await?;
        count_value(self.client.dialect(), &rows)
    }

    pub async fn get_record(&self, args: &GetRecordArgs) -> Result<Option<Row>, QueryError> {
        require_table(&args.table_name)?;
        let pk = self.require_primary_key(&args.table_name).await?;

        let mut select = Select::new(args.table_name.as_str());
        select.columns = args.select.clone();
        select.filter = WhereClause::new().and(Predicate::eq(pk, args.record_id.clone()));

        let (sql, params) = self.render(select);
        Ok(self.client.fetch(&sql, &params).await?.into_iter().next())
    }

    /// Insert `data` and return the new record's primary-key value.
    pub async fn create_record(&self, args: &CreateRecordArgs) -> Result<Value, QueryError> {
        require_table(&args.table_name)?;
        let pk = self.primary_key(&args.table_name).await?;

        let insert = Insert {
            table: args.table_name.clone(),
            values: args.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            returning: pk.clone(),
        };

        let (sql, params) = self.render(insert);
        let generated = self.client.insert(&sql, &params).await?;

        // Natural keys are not reported back by every engine
        let key = generated
            .filter(|v| !v.is_null())
            .or_else(|| pk.and_then(|pk| args.data.get(&pk).cloned()))
            .unwrap_or(Value::Null);

        tracing::info!(table = %args.table_name, id = %key, "record created");
        Ok(key)
    }

    pub async fn update_record(&self, args: &UpdateRecordArgs) -> Result<u64, QueryError> {
        require_table(&args.table_name)?;
        if args.data.is_empty() {
            return Err(QueryError::InvalidRequest("no values to update".to_string()));
        }
        let pk = self.require_primary_key(&args.table_name).await?;

        let update = Update {
            table: args.table_name.clone(),
            values: args.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            filter: WhereClause::new().and(Predicate::eq(pk, args.record_id.clone())),
        };

        let (sql, params) = self.render(update);
        self.client.execute(&sql, &params).await
    }

    pub async fn delete_record(&self, args: &DeleteRecordArgs) -> Result<u64, QueryError> {
        require_table(&args.table_name)?;
        let pk = self.require_primary_key(&args.table_name).await?;

        let delete = Delete {
            table: args.table_name.clone(),
            filter: WhereClause::new().and(Predicate::eq(pk, args.record_id.clone())),
        };

        let (sql, params) = self.render(delete);
        self.client.execute(&sql, &params).await
    }

    pub async fn delete_records(&self, args: &DeleteRecordsArgs) -> Result<u64, QueryError> {
        require_table(&args.table_name)?;
        let pk = self.require_primary_key(&args.table_name).await?;

        let delete = Delete {
            table: args.table_name.clone(),
            filter: WhereClause::new().and(Predicate::is_in(pk, args.record_ids.clone())),
        };

        let (sql, params) = self.render(delete);
        let affected = self.client.execute(&sql, &params).await?;
        tracing::info!(table = %args.table_name, affected, "records deleted");
        Ok(affected)
    }
}

fn require_table(table: &str) -> Result<(), QueryError> {
    if table.trim().is_empty() {
        return Err(QueryError::InvalidRequest("tableName is required".to_string()));
    }
    Ok(())
}

fn count_value(dialect: dialect::Dialect, rows: &[Row]) -> Result<u64, QueryError> {
    let value = rows.first().and_then(|row| row.get("count"));
    let count = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    count.ok_or_else(|| {
        QueryError::execution(
            dialect,
            None,
            format!("unexpected COUNT result: {}", value.unwrap_or(&Value::Null)),
        )
    })
}
