use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::query::{self, Direction};
use crate::schema::OptionUpdate;
use crate::service::Operation;

// ---------- data source requests ----------

#[derive(Debug, Deserialize)]
pub struct CreateDataSourceRequest {
    pub name: String,
    pub dialect: String,
    pub credentials: Value,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDataSourceRequest {
    pub name: Option<String>,
    pub credentials: Option<Value>,
    pub options: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDataSourcesQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub search: Option<String>,
}

// ---------- data source responses ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceResponse {
    pub id: Uuid,
    pub name: String,
    pub dialect: String,
    /// Stored credentials with secret fields removed.
    pub credentials: Value,
    pub options: Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T: Serialize> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
}

// ---------- tables & columns ----------

#[derive(Debug, Deserialize)]
pub struct ColumnOptionsRequest {
    pub updates: Vec<OptionUpdate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnOptionsResponse {
    pub table_name: String,
    pub column_name: String,
    pub updates: Vec<OptionUpdate>,
}

// ---------- records ----------

/// Query string for `GET .../records`. `filters` is base64-encoded JSON;
/// `select` is a comma-separated column list.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsQuery {
    #[serde(default, deserialize_with = "query::lenient_bound")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "query::lenient_bound")]
    pub offset: Option<u64>,
    pub filters: Option<String>,
    pub order_by: Option<String>,
    pub order_direction: Option<Direction>,
    pub select: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CountQuery {
    pub filters: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordQuery {
    pub select: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRecordResponse {
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    pub record_ids: Vec<Value>,
}

// ---------- batch ----------

#[derive(Debug, Deserialize)]
pub struct BatchQueryRequest {
    pub operations: Vec<Operation>,
}

/// Outcome of one operation in a batch; the batch itself succeeds as long
/// as the data source could be reached.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OperationResult {
    Ok {
        data: Value,
    },
    Err {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchQueryResponse {
    pub results: Vec<OperationResult>,
}
