use heck::ToTitleCase;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod introspect;
pub mod options;

pub use introspect::Introspector;
pub use options::{ColumnOverrides, FieldOptions, OptionUpdate, StoredOverrides};

// ---------- field taxonomy ----------

/// Generic UI-level classification of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Id,
    Text,
    Textarea,
    Number,
    Boolean,
    DateTime,
    Json,
    Select,
    Association,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Index,
    Show,
    Edit,
    New,
}

impl Visibility {
    pub const ALL: [Visibility; 4] = [
        Visibility::Index,
        Visibility::Show,
        Visibility::Edit,
        Visibility::New,
    ];
}

// ---------- native metadata ----------

/// Column metadata as read from the database catalog, before inference.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeColumn {
    pub name: String,
    /// Catalog type name, lowercased (`character varying`, `int`, `nvarchar`).
    pub data_type: String,
    /// Finer type name where the catalog has one (`udt_name`, `COLUMN_TYPE`).
    pub udt_name: String,
    pub nullable: bool,
    pub max_length: Option<i64>,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

// ---------- column model ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseOptions {
    pub visibility: Vec<Visibility>,
    pub required: bool,
    pub nullable: bool,
    pub readonly: bool,
    pub placeholder: String,
    pub help: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    pub disconnected: bool,
    pub computed: bool,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            visibility: Visibility::ALL.to_vec(),
            required: false,
            nullable: false,
            readonly: false,
            placeholder: String::new(),
            help: String::new(),
            default_value: None,
            disconnected: false,
            computed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceInfo {
    #[serde(rename = "type")]
    pub data_type: String,
    pub udt_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl From<&NativeColumn> for DataSourceInfo {
    fn from(c: &NativeColumn) -> Self {
        Self {
            data_type: c.data_type.clone(),
            udt_name: c.udt_name.clone(),
            max_length: c.max_length,
            nullable: c.nullable,
            default_value: c.default_value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyInfo {
    pub constraint_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

/// A column as presented to the admin UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub base_options: BaseOptions,
    pub data_source_info: DataSourceInfo,
    pub field_options: FieldOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key_info: Option<ForeignKeyInfo>,
}

/// `id` becomes `ID`; everything else is title-cased (`created_at` → `Created At`).
pub fn humanize_label(name: &str) -> String {
    if name.eq_ignore_ascii_case("id") {
        return "ID".to_string();
    }
    name.to_title_case()
}
