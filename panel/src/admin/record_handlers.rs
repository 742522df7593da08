use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::executor::{
    CountArgs, CreateRecordArgs, DeleteRecordArgs, DeleteRecordsArgs, GetRecordArgs,
    GetRecordsArgs, UpdateRecordArgs,
};
use crate::filter::FilterNode;
use crate::service::Operation;

use super::{
    AdminState, ApiErr,
    dto::{
        AffectedResponse, BatchQueryRequest, BatchQueryResponse, BulkDeleteRequest, CountQuery,
        CountResponse, CreatedRecordResponse, OperationResult, RecordQuery, RecordsQuery,
    },
};

// ---------- query-string helpers ----------

/// Decode the `filters` query parameter: base64 (standard or URL-safe) of a
/// JSON array of filters and filter groups.
pub fn decode_filters(encoded: Option<&str>) -> Result<Vec<FilterNode>, ApiErr> {
    let Some(encoded) = encoded.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    // Form decoding turns an unescaped '+' into a space
    let encoded = encoded.replace(' ', "+");
    let bytes = STANDARD
        .decode(&encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
        .map_err(|e| ApiErr::unprocessable(format!("filters are not valid base64: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ApiErr::unprocessable(format!("filters are not valid JSON: {e}")))
}

fn split_select(select: Option<&str>) -> Vec<String> {
    select
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn affected(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

// ---------- GET /datasources/{id}/tables/{table}/records ----------

pub async fn list_records(
    State(state): State<AdminState>,
    Path((id, table)): Path<(Uuid, String)>,
    Query(params): Query<RecordsQuery>,
) -> Result<Json<Value>, ApiErr> {
    let args = GetRecordsArgs {
        table_name: table,
        limit: params.limit,
        offset: params.offset,
        filters: decode_filters(params.filters.as_deref())?,
        order_by: params.order_by,
        order_direction: params.order_direction.unwrap_or_default(),
        select: split_select(params.select.as_deref()),
    };

    let service = state.service(id).await?;
    Ok(Json(service.run_query(Operation::GetRecords(args)).await?))
}

// ---------- GET /datasources/{id}/tables/{table}/records/count ----------

pub async fn count_records(
    State(state): State<AdminState>,
    Path((id, table)): Path<(Uuid, String)>,
    Query(params): Query<CountQuery>,
) -> Result<Json<CountResponse>, ApiErr> {
    let args = CountArgs {
        table_name: table,
        filters: decode_filters(params.filters.as_deref())?,
    };

    let service = state.service(id).await?;
    let count = service.run_query(Operation::GetRecordsCount(args)).await?;
    Ok(Json(CountResponse {
        count: count.as_u64().unwrap_or(0),
    }))
}

// ---------- POST /datasources/{id}/tables/{table}/records ----------

pub async fn create_record(
    State(state): State<AdminState>,
    Path((id, table)): Path<(Uuid, String)>,
    Json(data): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<CreatedRecordResponse>), ApiErr> {
    let service = state.service(id).await?;
    let key = service
        .run_query(Operation::CreateRecord(CreateRecordArgs {
            table_name: table,
            data,
        }))
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedRecordResponse { id: key })))
}

// ---------- GET /datasources/{id}/tables/{table}/records/{record_id} ----------

pub async fn get_record(
    State(state): State<AdminState>,
    Path((id, table, record_id)): Path<(Uuid, String, String)>,
    Query(params): Query<RecordQuery>,
) -> Result<Json<Value>, ApiErr> {
    let service = state.service(id).await?;
    let record = service
        .run_query(Operation::GetRecord(GetRecordArgs {
            table_name: table,
            record_id: Value::String(record_id),
            select: split_select(params.select.as_deref()),
        }))
        .await?;

    if record.is_null() {
        return Err(ApiErr::not_found("Record not found"));
    }
    Ok(Json(record))
}

// ---------- PUT /datasources/{id}/tables/{table}/records/{record_id} ----------

pub async fn update_record(
    State(state): State<AdminState>,
    Path((id, table, record_id)): Path<(Uuid, String, String)>,
    Json(data): Json<Map<String, Value>>,
) -> Result<Json<AffectedResponse>, ApiErr> {
    let service = state.service(id).await?;
    let result = service
        .run_query(Operation::UpdateRecord(UpdateRecordArgs {
            table_name: table,
            record_id: Value::String(record_id),
            data,
        }))
        .await?;

    match affected(&result) {
        0 => Err(ApiErr::not_found("Record not found")),
        n => Ok(Json(AffectedResponse { affected: n })),
    }
}

// ---------- DELETE /datasources/{id}/tables/{table}/records/{record_id} ----------

pub async fn delete_record(
    State(state): State<AdminState>,
    Path((id, table, record_id)): Path<(Uuid, String, String)>,
) -> Result<Json<AffectedResponse>, ApiErr> {
    let service = state.service(id).await?;
    let result = service
        .run_query(Operation::DeleteRecord(DeleteRecordArgs {
            table_name: table,
            record_id: Value::String(record_id),
        }))
        .await?;

    match affected(&result) {
        0 => Err(ApiErr::not_found("Record not found")),
        n => Ok(Json(AffectedResponse { affected: n })),
    }
}

// ---------- POST /datasources/{id}/tables/{table}/records/bulk-delete ----------

pub async fn bulk_delete_records(
    State(state): State<AdminState>,
    Path((id, table)): Path<(Uuid, String)>,
    Json(body): Json<BulkDeleteRequest>,
) -> Result<Json<AffectedResponse>, ApiErr> {
    if body.record_ids.is_empty() {
        return Ok(Json(AffectedResponse { affected: 0 }));
    }

    let service = state.service(id).await?;
    let result = service
        .run_query(Operation::DeleteRecords(DeleteRecordsArgs {
            table_name: table,
            record_ids: body.record_ids,
        }))
        .await?;
    Ok(Json(AffectedResponse {
        affected: affected(&result),
    }))
}

// ---------- POST /datasources/{id}/query ----------

pub async fn run_batch(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<BatchQueryRequest>,
) -> Result<Json<BatchQueryResponse>, ApiErr> {
    let service = state.service(id).await?;
    let results = service
        .run_queries(body.operations)
        .await?
        .into_iter()
        .map(|result| match result {
            Ok(data) => OperationResult::Ok { data },
            Err(e) => OperationResult::Err {
                code: e.code().map(str::to_string),
                error: e.to_string(),
            },
        })
        .collect();
    Ok(Json(BatchQueryResponse { results }))
}
