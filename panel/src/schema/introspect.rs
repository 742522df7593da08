use std::collections::HashMap;

use serde_json::Value;

use super::{
    BaseOptions, Column, DataSourceInfo, FieldOptions, FieldType, ForeignKeyInfo, NativeColumn,
    StoredOverrides, humanize_label,
};
use crate::client::{QueryError, Row, SqlClient};
use crate::dialect::DialectDriver;

/// Reads table and column metadata through a connected client.
pub struct Introspector<'a> {
    client: &'a dyn SqlClient,
    driver: &'static dyn DialectDriver,
}

impl<'a> Introspector<'a> {
    pub fn new(client: &'a dyn SqlClient, driver: &'static dyn DialectDriver) -> Self {
        Self { client, driver }
    }

    /// Base tables of the default schema, sorted by name.
    pub async fn get_tables(&self) -> Result<Vec<String>, QueryError> {
        let rows = self.client.fetch(self.driver.tables_query(), &[]).await?;
        let mut tables: Vec<String> = rows.iter().filter_map(|r| text(r, "name")).collect();
        tables.sort();
        Ok(tables)
    }

    pub async fn native_columns(&self, table: &str) -> Result<Vec<NativeColumn>, QueryError> {
        let rows = self
            .client
            .fetch(self.driver.columns_query(), &[Value::String(table.to_string())])
            .await?;
        Ok(rows.iter().filter_map(native_column).collect())
    }

    pub async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>, QueryError> {
        let rows = self
            .client
            .fetch(
                self.driver.foreign_keys_query(),
                &[Value::String(table.to_string())],
            )
            .await?;
        Ok(rows.iter().filter_map(foreign_key).collect())
    }

    pub async fn primary_key(&self, table: &str) -> Result<Option<String>, QueryError> {
        Ok(self
            .native_columns(table)
            .await?
            .into_iter()
            .find(|c| c.primary_key)
            .map(|c| c.name))
    }

    /// Columns of `table` with inferred field types and `stored` overrides applied.
    pub async fn get_columns(
        &self,
        table: &str,
        stored: &StoredOverrides,
    ) -> Result<Vec<Column>, QueryError> {
        let natives = self.native_columns(table).await?;
        let fks: HashMap<String, ForeignKeyInfo> = self
            .foreign_keys(table)
            .await?
            .into_iter()
            .map(|fk| (fk.column_name.clone(), fk))
            .collect();

        Ok(natives
            .iter()
            .map(|native| {
                build_column(
                    self.driver,
                    native,
                    fks.get(&native.name).cloned(),
                    stored.get(&native.name),
                )
            })
            .collect())
    }
}

pub(crate) fn build_column(
    driver: &dyn DialectDriver,
    native: &NativeColumn,
    foreign_key_info: Option<ForeignKeyInfo>,
    overrides: Option<&super::ColumnOverrides>,
) -> Column {
    let field_type = overrides
        .and_then(|o| o.field_type())
        .unwrap_or_else(|| match foreign_key_info {
            Some(_) => FieldType::Association,
            None => driver.infer_field_type(native),
        });

    let mut column = Column {
        name: native.name.clone(),
        label: humanize_label(&native.name),
        field_type,
        primary_key: native.primary_key,
        base_options: BaseOptions::default(),
        data_source_info: DataSourceInfo::from(native),
        field_options: FieldOptions::defaults_for(field_type),
        foreign_key_info,
    };

    if let Some(overrides) = overrides {
        overrides.apply(&mut column);
    }

    column
}

// ---------- row decoding ----------

fn native_column(row: &Row) -> Option<NativeColumn> {
    let name = text(row, "name")?;
    let data_type = text(row, "data_type").unwrap_or_default().to_ascii_lowercase();
    let udt_name = text(row, "udt_name")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| data_type.clone());

    Some(NativeColumn {
        name,
        data_type,
        udt_name,
        nullable: flag(row, "nullable"),
        max_length: integer(row, "max_length"),
        default_value: text(row, "default_value"),
        primary_key: flag(row, "primary_key"),
    })
}

fn foreign_key(row: &Row) -> Option<ForeignKeyInfo> {
    Some(ForeignKeyInfo {
        constraint_name: text(row, "constraint_name").unwrap_or_default(),
        column_name: text(row, "column_name")?,
        foreign_table_name: text(row, "foreign_table_name")?,
        foreign_column_name: text(row, "foreign_column_name")?,
    })
}

fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn flag(row: &Row, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "t" | "true" | "YES" | "yes"),
        _ => false,
    }
}

fn integer(row: &Row, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
