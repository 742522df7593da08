use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::set_header::response::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::client::{ClientError, DataSourceDescriptor, QueryError};
use crate::crypto::CredentialCipher;
use crate::entity::data_source;
use crate::pool::ConnectionPool;
use crate::service::QueryService;

pub mod datasource_handlers;
pub mod dialect_types;
pub mod dto;
pub mod record_handlers;
pub mod table_handlers;

// ---------- shared state ----------

#[derive(Clone)]
pub struct AdminState {
    pub db: DatabaseConnection,
    pub pool: Arc<ConnectionPool>,
    pub cipher: Arc<dyn CredentialCipher>,
    /// Per-operation deadline; `None` leaves operations unbounded.
    pub query_timeout: Option<Duration>,
    pub cors_allowed_origins: Vec<String>,
}

impl AdminState {
    pub async fn find_data_source(&self, id: Uuid) -> Result<data_source::Model, ApiErr> {
        data_source::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(ApiErr::internal)?
            .ok_or_else(|| ApiErr::not_found("Data source not found"))
    }

    /// Query service over a pooled connection to the data source.
    pub async fn service(&self, id: Uuid) -> Result<QueryService, ApiErr> {
        let model = self.find_data_source(id).await?;
        let descriptor = DataSourceDescriptor::from_model(&model).map_err(QueryError::Client)?;
        let service = QueryService::for_data_source(&self.pool, &descriptor)
            .await
            .map_err(QueryError::from)?;
        Ok(service.with_deadline(self.query_timeout))
    }
}

// ---------- error type ----------

/// A JSON error response: `{"error": "...", "code"?: "..."}` with an HTTP
/// status. `code` carries the database's own error code when there is one.
#[derive(Debug)]
pub struct ApiErr(StatusCode, String, Option<String>);

impl ApiErr {
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into(), None)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self(StatusCode::CONFLICT, msg.into(), None)
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self(StatusCode::UNPROCESSABLE_ENTITY, msg.into(), None)
    }

    pub fn status(&self) -> StatusCode {
        self.0
    }
}

impl std::fmt::Display for ApiErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.1, self.0)
    }
}

impl From<QueryError> for ApiErr {
    fn from(e: QueryError) -> Self {
        let status = match &e {
            QueryError::Client(ClientError::DecryptFailure(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            QueryError::Client(_) | QueryError::InvalidRequest(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            QueryError::NoPrimaryKey { .. } => StatusCode::BAD_REQUEST,
            QueryError::Connect { .. } | QueryError::Execution { .. } => StatusCode::BAD_GATEWAY,
            QueryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        let code = e.code().map(str::to_string);
        Self(status, e.to_string(), code)
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let body = match self.2 {
            Some(code) => serde_json::json!({ "error": self.1, "code": code }),
            None => serde_json::json!({ "error": self.1 }),
        };
        (self.0, Json(body)).into_response()
    }
}

// ---------- router ----------

pub fn admin_router(state: AdminState) -> Router {
    let allowed_origins: Vec<HeaderValue> = state
        .cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new() // no origins allowed = same-origin only
    } else {
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    };

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api/v1", api_v1())
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .with_state(state)
}

fn api_v1() -> Router<AdminState> {
    Router::new()
        // dialects
        .route("/dialects", get(datasource_handlers::list_dialects))
        // data sources
        .route(
            "/datasources",
            get(datasource_handlers::list_datasources).post(datasource_handlers::create_datasource),
        )
        .route(
            "/datasources/{id}",
            get(datasource_handlers::get_datasource)
                .put(datasource_handlers::update_datasource)
                .delete(datasource_handlers::delete_datasource),
        )
        .route(
            "/datasources/{id}/test",
            post(datasource_handlers::test_datasource),
        )
        .route("/datasources/{id}/query", post(record_handlers::run_batch))
        // tables & columns
        .route("/datasources/{id}/tables", get(table_handlers::list_tables))
        .route(
            "/datasources/{id}/tables/{table}/columns",
            get(table_handlers::get_columns),
        )
        .route(
            "/datasources/{id}/tables/{table}/columns/{column}",
            put(table_handlers::set_column_options),
        )
        // records
        .route(
            "/datasources/{id}/tables/{table}/records",
            get(record_handlers::list_records).post(record_handlers::create_record),
        )
        .route(
            "/datasources/{id}/tables/{table}/records/count",
            get(record_handlers::count_records),
        )
        .route(
            "/datasources/{id}/tables/{table}/records/bulk-delete",
            post(record_handlers::bulk_delete_records),
        )
        .route(
            "/datasources/{id}/tables/{table}/records/{record_id}",
            get(record_handlers::get_record)
                .put(record_handlers::update_record)
                .delete(record_handlers::delete_record),
        )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::client::{ClientProvider, SqlClient};
    use crate::crypto::MasterKeyCipher;
    use crate::pool::PoolConfig;
    use axum::body::Body;
    use axum::http::Request;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use tower::ServiceExt;

    /// Hands out one shared client for every descriptor, or fails with the
    /// factory's own checks when `client` is `None`.
    pub struct StaticProvider {
        pub client: Option<Arc<dyn SqlClient>>,
        pub inner: crate::client::ClientFactory,
    }

    impl ClientProvider for StaticProvider {
        fn get_client(
            &self,
            descriptor: &DataSourceDescriptor,
        ) -> Result<Arc<dyn SqlClient>, ClientError> {
            // Run the real checks first so bad descriptors still fail.
            self.inner.get_client(descriptor)?;
            match &self.client {
                Some(client) => Ok(client.clone()),
                None => self.inner.get_client(descriptor),
            }
        }
    }

    pub async fn state_with(client: Option<Arc<dyn SqlClient>>) -> AdminState {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let cipher = Arc::new(MasterKeyCipher::new([3u8; 32]));
        let provider = StaticProvider {
            client,
            inner: crate::client::ClientFactory::new(cipher.clone()),
        };
        AdminState {
            db,
            pool: Arc::new(ConnectionPool::new(Arc::new(provider), PoolConfig::default())),
            cipher,
            query_timeout: None,
            cors_allowed_origins: Vec::new(),
        }
    }

    pub async fn send(
        state: &AdminState,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = admin_router(state.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create a postgres data source through the API and return its id.
    pub async fn create_postgres(state: &AdminState, name: &str) -> String {
        let (status, body) = send(
            state,
            "POST",
            "/api/v1/datasources",
            Some(serde_json::json!({
                "name": name,
                "dialect": "postgresql",
                "credentials": {
                    "host": "db.internal", "database": "blog",
                    "user": "panel", "password": "s3cret"
                }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}
