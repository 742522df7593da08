use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Column, FieldType, Visibility};

// ---------- field options ----------

/// Per-field-type presentation options. Only the keys relevant to a column's
/// field type are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_date: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_time: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_column: Option<String>,
}

impl FieldOptions {
    pub fn defaults_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Textarea => Self {
                rows: Some(5),
                ..Self::default()
            },
            FieldType::DateTime => Self {
                show_date: Some(true),
                show_time: Some(true),
                ..Self::default()
            },
            FieldType::Select => Self {
                options: Some(Vec::new()),
                ..Self::default()
            },
            FieldType::Association => Self {
                name_column: Some("id".to_string()),
                ..Self::default()
            },
            FieldType::Id
            | FieldType::Text
            | FieldType::Number
            | FieldType::Boolean
            | FieldType::Json => Self::default(),
        }
    }
}

// ---------- structured overrides ----------

/// One user-chosen change to a column's presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "camelCase")]
pub enum OptionUpdate {
    Label(String),
    FieldType(FieldType),
    Visibility(Vec<Visibility>),
    Required(bool),
    Nullable(bool),
    Readonly(bool),
    Placeholder(String),
    Help(String),
    DefaultValue(Value),
    Disconnected(bool),
    Computed(bool),
    Rows(u32),
    ShowDate(bool),
    ShowTime(bool),
    SelectOptions(Vec<String>),
    NameColumn(String),
}

impl OptionUpdate {
    pub fn apply(&self, column: &mut Column) {
        let base = &mut column.base_options;
        let field = &mut column.field_options;
        match self {
            OptionUpdate::Label(v) => column.label = v.clone(),
            OptionUpdate::FieldType(v) => column.field_type = *v,
            OptionUpdate::Visibility(v) => base.visibility = v.clone(),
            OptionUpdate::Required(v) => base.required = *v,
            OptionUpdate::Nullable(v) => base.nullable = *v,
            OptionUpdate::Readonly(v) => base.readonly = *v,
            OptionUpdate::Placeholder(v) => base.placeholder = v.clone(),
            OptionUpdate::Help(v) => base.help = v.clone(),
            OptionUpdate::DefaultValue(v) => base.default_value = Some(v.clone()),
            OptionUpdate::Disconnected(v) => base.disconnected = *v,
            OptionUpdate::Computed(v) => base.computed = *v,
            OptionUpdate::Rows(v) => field.rows = Some(*v),
            OptionUpdate::ShowDate(v) => field.show_date = Some(*v),
            OptionUpdate::ShowTime(v) => field.show_time = Some(*v),
            OptionUpdate::SelectOptions(v) => field.options = Some(v.clone()),
            OptionUpdate::NameColumn(v) => field.name_column = Some(v.clone()),
        }
    }

    fn same_option(&self, other: &OptionUpdate) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Persisted overrides for one column, applied in order on top of the
/// inferred column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnOverrides {
    updates: Vec<OptionUpdate>,
}

/// Overrides for every customised column of one table, keyed by column name.
pub type StoredOverrides = HashMap<String, ColumnOverrides>;

impl ColumnOverrides {
    pub fn new(updates: Vec<OptionUpdate>) -> Self {
        let mut overrides = Self::default();
        overrides.merge(updates);
        overrides
    }

    pub fn updates(&self) -> &[OptionUpdate] {
        &self.updates
    }

    /// The overridden field type, if the user picked one.
    pub fn field_type(&self) -> Option<FieldType> {
        self.updates.iter().rev().find_map(|u| match u {
            OptionUpdate::FieldType(t) => Some(*t),
            _ => None,
        })
    }

    /// Replace updates for options already present, append the rest.
    pub fn merge(&mut self, updates: Vec<OptionUpdate>) {
        for update in updates {
            match self.updates.iter_mut().find(|u| u.same_option(&update)) {
                Some(existing) => *existing = update,
                None => self.updates.push(update),
            }
        }
    }

    pub fn apply(&self, column: &mut Column) {
        for update in &self.updates {
            update.apply(column);
        }
    }
}
