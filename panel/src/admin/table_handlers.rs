use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::column_option;
use crate::executor::GetColumnsArgs;
use crate::schema::{ColumnOverrides, StoredOverrides};
use crate::service::Operation;

use super::{
    AdminState, ApiErr,
    dto::{ColumnOptionsRequest, ColumnOptionsResponse},
};

/// Overrides persisted for every column of one table.
pub async fn stored_overrides(
    state: &AdminState,
    data_source_id: Uuid,
    table: &str,
) -> Result<StoredOverrides, ApiErr> {
    let rows = column_option::Entity::find()
        .filter(column_option::Column::DataSourceId.eq(data_source_id))
        .filter(column_option::Column::TableName.eq(table))
        .all(&state.db)
        .await
        .map_err(ApiErr::internal)?;

    rows.into_iter()
        .map(|row| {
            let overrides: ColumnOverrides =
                serde_json::from_str(&row.updates).map_err(ApiErr::internal)?;
            Ok((row.column_name, overrides))
        })
        .collect()
}

// ---------- GET /datasources/{id}/tables ----------

pub async fn list_tables(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiErr> {
    let service = state.service(id).await?;
    Ok(Json(service.run_query(Operation::GetTables).await?))
}

// ---------- GET /datasources/{id}/tables/{table}/columns ----------

pub async fn get_columns(
    State(state): State<AdminState>,
    Path((id, table)): Path<(Uuid, String)>,
) -> Result<Json<Value>, ApiErr> {
    let service = state.service(id).await?;
    let stored_columns = stored_overrides(&state, id, &table).await?;
    let columns = service
        .run_query(Operation::GetColumns(GetColumnsArgs {
            table_name: table,
            stored_columns,
        }))
        .await?;
    Ok(Json(columns))
}

// ---------- PUT /datasources/{id}/tables/{table}/columns/{column} ----------

/// Merge option updates into the column's stored overrides. An update for an
/// option that is already overridden replaces it.
pub async fn set_column_options(
    State(state): State<AdminState>,
    Path((id, table, column)): Path<(Uuid, String, String)>,
    Json(body): Json<ColumnOptionsRequest>,
) -> Result<Json<ColumnOptionsResponse>, ApiErr> {
    state.find_data_source(id).await?;

    let existing = column_option::Entity::find()
        .filter(column_option::Column::DataSourceId.eq(id))
        .filter(column_option::Column::TableName.eq(table.as_str()))
        .filter(column_option::Column::ColumnName.eq(column.as_str()))
        .one(&state.db)
        .await
        .map_err(ApiErr::internal)?;

    let now = Utc::now().naive_utc();
    let saved = match existing {
        Some(row) => {
            let mut overrides: ColumnOverrides =
                serde_json::from_str(&row.updates).map_err(ApiErr::internal)?;
            overrides.merge(body.updates);
            let mut active: column_option::ActiveModel = row.into();
            active.updates = Set(serde_json::to_string(&overrides).map_err(ApiErr::internal)?);
            active.updated_at = Set(now);
            active.update(&state.db).await.map_err(ApiErr::internal)?
        }
        None => {
            let overrides = ColumnOverrides::new(body.updates);
            column_option::ActiveModel {
                id: Set(Uuid::now_v7()),
                data_source_id: Set(id),
                table_name: Set(table),
                column_name: Set(column),
                updates: Set(serde_json::to_string(&overrides).map_err(ApiErr::internal)?),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&state.db)
            .await
            .map_err(ApiErr::internal)?
        }
    };

    tracing::debug!(
        datasource_id = %id,
        table = %saved.table_name,
        column = %saved.column_name,
        "column options saved"
    );

    let overrides: ColumnOverrides =
        serde_json::from_str(&saved.updates).map_err(ApiErr::internal)?;
    Ok(Json(ColumnOptionsResponse {
        table_name: saved.table_name,
        column_name: saved.column_name,
        updates: overrides.updates().to_vec(),
    }))
}
