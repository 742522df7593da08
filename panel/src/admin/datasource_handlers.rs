use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::CredentialCipher;
use crate::dialect::Dialect;
use crate::entity::{column_option, data_source};
use crate::service::Operation;

use super::{
    AdminState, ApiErr,
    dialect_types::{self, DialectResponse},
    dto::{
        CreateDataSourceRequest, DataSourceResponse, ListDataSourcesQuery, PaginatedResponse,
        TestConnectionResponse, UpdateDataSourceRequest,
    },
};

// ---------- helper: build DataSourceResponse from model ----------

fn ds_response(
    model: data_source::Model,
    cipher: &dyn CredentialCipher,
) -> Result<DataSourceResponse, ApiErr> {
    let options: Value = serde_json::from_str(&model.options).map_err(ApiErr::internal)?;

    // A blob that no longer decrypts (rotated key) should not hide the row.
    let credentials = match cipher.decrypt(&model.encrypted_credentials) {
        Ok(creds) => match model.dialect.parse::<Dialect>() {
            Ok(dialect) => dialect_types::public_credentials(dialect, &creds),
            Err(_) => Value::Object(Default::default()),
        },
        Err(e) => {
            tracing::warn!(datasource_id = %model.id, error = %e, "credentials do not decrypt");
            Value::Object(Default::default())
        }
    };

    Ok(DataSourceResponse {
        id: model.id,
        name: model.name,
        dialect: model.dialect,
        credentials,
        options,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn unique_violation(e: sea_orm::DbErr) -> ApiErr {
    let msg = e.to_string();
    if msg.contains("UNIQUE") || msg.contains("unique") {
        ApiErr::conflict("Data source name already exists")
    } else {
        ApiErr::internal(e)
    }
}

fn options_text(options: Option<Value>) -> Result<String, ApiErr> {
    match options {
        None | Some(Value::Null) => Ok("{}".to_string()),
        Some(v @ Value::Object(_)) => serde_json::to_string(&v).map_err(ApiErr::internal),
        Some(_) => Err(ApiErr::unprocessable("options must be a JSON object")),
    }
}

/// Validate, encrypt and store a new data source. Shared by the API and the
/// `datasource add` command.
///
/// A dialect without a registered driver is still stored (credentials must
/// then be a JSON object and are kept as given); queries against it return
/// null results.
pub async fn insert_data_source(
    db: &impl ConnectionTrait,
    cipher: &dyn CredentialCipher,
    request: CreateDataSourceRequest,
) -> Result<data_source::Model, ApiErr> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiErr::unprocessable("name must not be empty"));
    }

    let credentials = match request.dialect.parse::<Dialect>() {
        Ok(dialect) => dialect_types::normalize_credentials(dialect, request.credentials)
            .map_err(|e| ApiErr::unprocessable(e.to_string()))?,
        Err(e) => {
            if !request.credentials.is_object() {
                return Err(ApiErr::unprocessable("credentials must be a JSON object"));
            }
            tracing::warn!(dialect = %request.dialect, error = %e, "storing data source with unsupported dialect");
            request.credentials
        }
    };

    let encrypted = cipher.encrypt(&credentials).map_err(ApiErr::internal)?;
    let now = Utc::now().naive_utc();

    data_source::ActiveModel {
        id: Set(Uuid::now_v7()),
        name: Set(name),
        dialect: Set(request.dialect.trim().to_ascii_lowercase()),
        encrypted_credentials: Set(encrypted),
        options: Set(options_text(request.options)?),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(unique_violation)
}

// ---------- GET /dialects ----------

pub async fn list_dialects() -> Json<Vec<DialectResponse>> {
    let dialects = dialect_types::get_dialect_defs()
        .iter()
        .map(DialectResponse::from)
        .collect();
    Json(dialects)
}

// ---------- GET /datasources ----------

pub async fn list_datasources(
    State(state): State<AdminState>,
    Query(params): Query<ListDataSourcesQuery>,
) -> Result<Json<PaginatedResponse<DataSourceResponse>>, ApiErr> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);

    let mut query = data_source::Entity::find();

    if let Some(ref search) = params.search
        && !search.is_empty()
    {
        query = query.filter(data_source::Column::Name.contains(search.as_str()));
    }

    let paginator = query
        .order_by_asc(data_source::Column::CreatedAt)
        .paginate(&state.db, page_size);

    let total = paginator.num_items().await.map_err(ApiErr::internal)?;
    let items = paginator
        .fetch_page(page - 1)
        .await
        .map_err(ApiErr::internal)?;

    let data = items
        .into_iter()
        .map(|m| ds_response(m, state.cipher.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(PaginatedResponse {
        data,
        total,
        page,
        page_size,
    }))
}

// ---------- POST /datasources ----------

pub async fn create_datasource(
    State(state): State<AdminState>,
    Json(body): Json<CreateDataSourceRequest>,
) -> Result<(StatusCode, Json<DataSourceResponse>), ApiErr> {
    let model = insert_data_source(&state.db, state.cipher.as_ref(), body).await?;
    tracing::info!(datasource_id = %model.id, dialect = %model.dialect, "data source created");
    Ok((
        StatusCode::CREATED,
        Json(ds_response(model, state.cipher.as_ref())?),
    ))
}

// ---------- GET /datasources/{id} ----------

pub async fn get_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DataSourceResponse>, ApiErr> {
    let model = state.find_data_source(id).await?;
    Ok(Json(ds_response(model, state.cipher.as_ref())?))
}

// ---------- PUT /datasources/{id} ----------

pub async fn update_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateDataSourceRequest>,
) -> Result<Json<DataSourceResponse>, ApiErr> {
    let model = state.find_data_source(id).await?;
    let mut active: data_source::ActiveModel = model.clone().into();

    if let Some(name) = body.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiErr::unprocessable("name must not be empty"));
        }
        active.name = Set(name);
    }

    if body.options.is_some() {
        active.options = Set(options_text(body.options)?);
    }

    if let Some(update) = body.credentials {
        let dialect: Dialect = model
            .dialect
            .parse()
            .map_err(|e: crate::client::ClientError| ApiErr::unprocessable(e.to_string()))?;
        let existing = state
            .cipher
            .decrypt(&model.encrypted_credentials)
            .map_err(ApiErr::internal)?;
        let merged = dialect_types::merge_credentials(dialect, existing, update)
            .map_err(|e| ApiErr::unprocessable(e.to_string()))?;
        active.encrypted_credentials =
            Set(state.cipher.encrypt(&merged).map_err(ApiErr::internal)?);
    }

    active.updated_at = Set(Utc::now().naive_utc());
    let updated = active.update(&state.db).await.map_err(unique_violation)?;

    // Connection parameters may have changed
    state.pool.evict_data_source(id).await;

    Ok(Json(ds_response(updated, state.cipher.as_ref())?))
}

// ---------- DELETE /datasources/{id} ----------

pub async fn delete_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiErr> {
    let model = state.find_data_source(id).await?;

    let txn = state.db.begin().await.map_err(ApiErr::internal)?;
    column_option::Entity::delete_many()
        .filter(column_option::Column::DataSourceId.eq(id))
        .exec(&txn)
        .await
        .map_err(ApiErr::internal)?;
    let active: data_source::ActiveModel = model.into();
    active.delete(&txn).await.map_err(ApiErr::internal)?;
    txn.commit().await.map_err(ApiErr::internal)?;

    state.pool.evict_data_source(id).await;
    tracing::info!(datasource_id = %id, "data source deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ---------- POST /datasources/{id}/test ----------

pub async fn test_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TestConnectionResponse>, ApiErr> {
    let service = state.service(id).await?;
    if service.is_null() {
        return Ok(Json(TestConnectionResponse {
            success: false,
            message: "Dialect is not supported".to_string(),
            tables: Vec::new(),
        }));
    }

    match service.run_query(Operation::GetTables).await {
        Ok(value) => {
            let tables: Vec<String> = serde_json::from_value(value).unwrap_or_default();
            Ok(Json(TestConnectionResponse {
                success: true,
                message: format!("Connected, {} tables found", tables.len()),
                tables,
            }))
        }
        Err(e) => {
            tracing::error!(datasource_id = %id, error = %e, "test connection failed");
            Ok(Json(TestConnectionResponse {
                success: false,
                message: e.to_string(),
                tables: Vec::new(),
            }))
        }
    }
}

// ---------- tests ----------

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::client::SqlClient;
    use crate::dialect::Dialect;
    use crate::testing::RecordingClient;
    use serde_json::json;
    use std::sync::Arc;

    fn tables_client() -> Arc<RecordingClient> {
        let client = Arc::new(RecordingClient::new(Dialect::Postgresql));
        client.respond(
            "information_schema.tables",
            vec![json!({"name": "authors"}), json!({"name": "posts"})],
        );
        client
    }

    #[tokio::test]
    async fn lists_dialects() {
        let state = state_with(None).await;
        let (status, body) = send(&state, "GET", "/api/v1/dialects", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["dialect"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["postgresql", "mysql", "mariadb", "mssql"]);
    }

    #[tokio::test]
    async fn create_hides_secrets_and_encrypts() {
        let state = state_with(None).await;
        let id = create_postgres(&state, "blog").await;

        let (status, body) = send(&state, "GET", &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credentials"]["host"], "db.internal");
        assert_eq!(body["credentials"]["port"], 5432);
        assert!(body["credentials"].get("password").is_none());
        assert_eq!(body["options"], json!({}));

        let model = state.find_data_source(id.parse().unwrap()).await.unwrap();
        assert!(!model.encrypted_credentials.contains("s3cret"));
        let creds = state.cipher.decrypt(&model.encrypted_credentials).unwrap();
        assert_eq!(creds["password"], "s3cret");
    }

    #[tokio::test]
    async fn create_rejects_missing_fields_and_duplicates() {
        let state = state_with(None).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/datasources",
            Some(json!({"name": "x", "dialect": "mysql", "credentials": {"host": "h"}})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("database"));

        create_postgres(&state, "dup").await;
        let (status, _) = send(
            &state,
            "POST",
            "/api/v1/datasources",
            Some(json!({
                "name": "dup", "dialect": "postgresql",
                "credentials": {"url": "postgres://u:p@h/d"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn list_paginates_and_searches() {
        let state = state_with(None).await;
        for name in ["alpha", "beta", "gamma"] {
            create_postgres(&state, name).await;
        }

        let (_, body) = send(&state, "GET", "/api/v1/datasources?page=1&pageSize=2", None).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = send(&state, "GET", "/api/v1/datasources?search=amm", None).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["name"], "gamma");
    }

    #[tokio::test]
    async fn update_keeps_blank_password_and_evicts() {
        let client = tables_client();
        let state = state_with(Some(client.clone() as Arc<dyn SqlClient>)).await;
        let id = create_postgres(&state, "blog").await;
        let uuid: Uuid = id.parse().unwrap();

        state.service(uuid).await.unwrap();
        assert_eq!(state.pool.live_count(uuid).await, 1);

        let (status, body) = send(
            &state,
            "PUT",
            &format!("/api/v1/datasources/{id}"),
            Some(json!({"name": "blog2", "credentials": {"host": "db2", "password": ""}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["name"], "blog2");
        assert_eq!(body["credentials"]["host"], "db2");
        assert_eq!(state.pool.live_count(uuid).await, 0);

        let model = state.find_data_source(uuid).await.unwrap();
        let creds = state.cipher.decrypt(&model.encrypted_credentials).unwrap();
        assert_eq!(creds["password"], "s3cret");
    }

    #[tokio::test]
    async fn delete_removes_row_and_pooled_connections() {
        let client = tables_client();
        let state = state_with(Some(client.clone() as Arc<dyn SqlClient>)).await;
        let id = create_postgres(&state, "blog").await;
        let uuid: Uuid = id.parse().unwrap();
        state.service(uuid).await.unwrap();

        let (status, _) = send(&state, "DELETE", &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.pool.live_count(uuid).await, 0);

        let (status, _) = send(&state, "GET", &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_lists_tables() {
        let client = tables_client();
        let state = state_with(Some(client.clone() as Arc<dyn SqlClient>)).await;
        let id = create_postgres(&state, "blog").await;

        let (status, body) =
            send(&state, "POST", &format!("/api/v1/datasources/{id}/test"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["tables"], json!(["authors", "posts"]));
    }

    #[tokio::test]
    async fn unsupported_dialect_is_stored_but_inert() {
        let state = state_with(None).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/datasources",
            Some(json!({
                "name": "legacy", "dialect": "oracle",
                "credentials": {"url": "oracle://u:p@h/db"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["id"].as_str().unwrap();

        let (_, body) = send(&state, "POST", &format!("/api/v1/datasources/{id}/test"), None).await;
        assert_eq!(body["success"], false);

        let (status, body) =
            send(&state, "GET", &format!("/api/v1/datasources/{id}/tables"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }
}
