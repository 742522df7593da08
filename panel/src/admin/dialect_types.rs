use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::dialect::Dialect;

#[derive(Debug, Clone)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    TextArea,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    /// Required unless a connection URL is given instead.
    pub required: bool,
    pub is_secret: bool,
    pub default_value: Option<String>,
}

pub struct DialectDef {
    pub dialect: Dialect,
    pub fields: Vec<FieldDef>,
}

/// Key of the single-string alternative to the discrete fields.
const URL_KEY: &str = "url";

static DIALECT_DEFS: OnceLock<Vec<DialectDef>> = OnceLock::new();

pub fn get_dialect_defs() -> &'static [DialectDef] {
    DIALECT_DEFS.get_or_init(|| Dialect::ALL.iter().map(|d| dialect_def(*d)).collect())
}

pub fn get_dialect_def(dialect: Dialect) -> &'static DialectDef {
    let defs = get_dialect_defs();
    defs.iter()
        .find(|d| d.dialect == dialect)
        .unwrap_or(&defs[0])
}

fn dialect_def(dialect: Dialect) -> DialectDef {
    let field = |key, label, kind, required, is_secret| FieldDef {
        key,
        label,
        kind,
        required,
        is_secret,
        default_value: None,
    };

    DialectDef {
        dialect,
        fields: vec![
            field(URL_KEY, "Connection URL", FieldKind::TextArea, false, true),
            field("host", "Host", FieldKind::Text, true, false),
            FieldDef {
                default_value: Some(dialect.default_port().to_string()),
                ..field("port", "Port", FieldKind::Number, false, false)
            },
            field("database", "Database", FieldKind::Text, true, false),
            field("user", "User", FieldKind::Text, true, false),
            field("password", "Password", FieldKind::Text, false, true),
            FieldDef {
                default_value: Some("false".to_string()),
                ..field("useSsl", "Use SSL", FieldKind::Boolean, false, false)
            },
        ],
    }
}

#[derive(Debug)]
pub enum FieldsError {
    MissingRequiredField(String),
    InvalidInput(String),
}

impl std::fmt::Display for FieldsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldsError::MissingRequiredField(k) => write!(f, "Missing required field: {k}"),
            FieldsError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
        }
    }
}

impl std::error::Error for FieldsError {}

fn has_url(input: &Map<String, Value>) -> bool {
    input
        .get(URL_KEY)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn default_for(field: &FieldDef) -> Result<Option<Value>, FieldsError> {
    let Some(default) = field.default_value.as_deref() else {
        return Ok(None);
    };
    Ok(Some(match field.kind {
        FieldKind::Number => Value::Number(
            default
                .parse::<i64>()
                .map_err(|_| {
                    FieldsError::InvalidInput(format!(
                        "Default for '{}' is not a valid number",
                        field.key
                    ))
                })?
                .into(),
        ),
        FieldKind::Boolean => Value::Bool(default == "true"),
        FieldKind::Text | FieldKind::TextArea => Value::String(default.to_string()),
    }))
}

/// Validate a credential input against the dialect's fields and fill in
/// defaults. Unknown keys are dropped. A non-blank `url` replaces the
/// discrete fields, which are then no longer required.
pub fn normalize_credentials(dialect: Dialect, input: Value) -> Result<Value, FieldsError> {
    let input = input
        .as_object()
        .ok_or_else(|| FieldsError::InvalidInput("credentials must be a JSON object".to_string()))?;
    let url_mode = has_url(input);

    let mut out = Map::new();
    for field in &get_dialect_def(dialect).fields {
        let resolved = match input.get(field.key).filter(|v| !is_blank(v)) {
            Some(v) => v.clone(),
            None => match default_for(field)? {
                Some(default) => default,
                None if field.required && !url_mode => {
                    return Err(FieldsError::MissingRequiredField(field.key.to_string()));
                }
                None => continue,
            },
        };
        out.insert(field.key.to_string(), resolved);
    }

    Ok(Value::Object(out))
}

/// Merge an update into stored credentials. Fields absent from the update
/// keep their stored value; a blank secret means "keep existing".
pub fn merge_credentials(
    dialect: Dialect,
    existing: Value,
    update: Value,
) -> Result<Value, FieldsError> {
    let input = update
        .as_object()
        .ok_or_else(|| FieldsError::InvalidInput("credentials must be a JSON object".to_string()))?;
    let existing = existing.as_object().cloned().unwrap_or_default();

    let mut merged = Map::new();
    for field in &get_dialect_def(dialect).fields {
        let value = match input.get(field.key) {
            Some(v) if field.is_secret && is_blank(v) => existing.get(field.key).cloned(),
            Some(v) => Some(v.clone()),
            None => existing.get(field.key).cloned(),
        };
        if let Some(v) = value {
            merged.insert(field.key.to_string(), v);
        }
    }

    normalize_credentials(dialect, Value::Object(merged))
}

/// Credentials with every secret field removed, for API responses.
pub fn public_credentials(dialect: Dialect, credentials: &Value) -> Value {
    let Some(map) = credentials.as_object() else {
        return Value::Object(Map::new());
    };
    let public = get_dialect_def(dialect)
        .fields
        .iter()
        .filter(|f| !f.is_secret)
        .filter_map(|f| map.get(f.key).map(|v| (f.key.to_string(), v.clone())))
        .collect();
    Value::Object(public)
}

// ---------- API response types ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefResponse {
    pub key: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
    pub is_secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DialectResponse {
    pub dialect: String,
    pub label: String,
    pub fields: Vec<FieldDefResponse>,
}

impl From<&DialectDef> for DialectResponse {
    fn from(def: &DialectDef) -> Self {
        Self {
            dialect: def.dialect.as_str().to_string(),
            label: def.dialect.label().to_string(),
            fields: def
                .fields
                .iter()
                .map(|f| FieldDefResponse {
                    key: f.key.to_string(),
                    label: f.label.to_string(),
                    field_type: match f.kind {
                        FieldKind::Text => "text".to_string(),
                        FieldKind::Number => "number".to_string(),
                        FieldKind::Boolean => "boolean".to_string(),
                        FieldKind::TextArea => "textarea".to_string(),
                    },
                    required: f.required,
                    is_secret: f.is_secret,
                    default_value: f.default_value.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_dialect_is_registered() {
        let defs = get_dialect_defs();
        assert_eq!(defs.len(), Dialect::ALL.len());
        assert_eq!(get_dialect_def(Dialect::Mariadb).dialect, Dialect::Mariadb);
    }

    #[test]
    fn port_default_follows_dialect() {
        let port = |d| {
            get_dialect_def(d)
                .fields
                .iter()
                .find(|f| f.key == "port")
                .and_then(|f| f.default_value.clone())
        };
        assert_eq!(port(Dialect::Postgresql).as_deref(), Some("5432"));
        assert_eq!(port(Dialect::Mysql).as_deref(), Some("3306"));
        assert_eq!(port(Dialect::Mssql).as_deref(), Some("1433"));
    }

    #[test]
    fn normalize_applies_defaults() {
        let out = normalize_credentials(
            Dialect::Postgresql,
            json!({"host": "db", "database": "shop", "user": "app", "password": "pw"}),
        )
        .unwrap();
        assert_eq!(out["port"], 5432);
        assert_eq!(out["useSsl"], false);
        assert_eq!(out["password"], "pw");
        assert!(out.get("url").is_none());
    }

    #[test]
    fn normalize_requires_discrete_fields_without_url() {
        let err = normalize_credentials(Dialect::Mysql, json!({"host": "db", "user": "root"}))
            .unwrap_err();
        assert!(matches!(err, FieldsError::MissingRequiredField(ref k) if k == "database"));
    }

    #[test]
    fn url_replaces_discrete_fields() {
        let out = normalize_credentials(
            Dialect::Mssql,
            json!({"url": "mssql://sa:pw@db:1433/master"}),
        )
        .unwrap();
        assert_eq!(out["url"], "mssql://sa:pw@db:1433/master");
    }

    #[test]
    fn normalize_drops_unknown_keys_and_rejects_non_objects() {
        let out = normalize_credentials(
            Dialect::Postgresql,
            json!({"host": "db", "database": "d", "user": "u", "evil": 1}),
        )
        .unwrap();
        assert!(out.get("evil").is_none());

        let err = normalize_credentials(Dialect::Postgresql, json!("nope")).unwrap_err();
        assert!(matches!(err, FieldsError::InvalidInput(_)));
    }

    #[test]
    fn merge_keeps_secret_when_blank() {
        let existing = json!({"host": "db", "database": "d", "user": "u", "password": "old"});
        let merged = merge_credentials(
            Dialect::Postgresql,
            existing,
            json!({"host": "db2", "password": ""}),
        )
        .unwrap();
        assert_eq!(merged["host"], "db2");
        assert_eq!(merged["password"], "old");
        assert_eq!(merged["database"], "d");
    }

    #[test]
    fn merge_replaces_secret_when_given() {
        let existing = json!({"host": "db", "database": "d", "user": "u", "password": "old"});
        let merged =
            merge_credentials(Dialect::Mysql, existing, json!({"password": "new"})).unwrap();
        assert_eq!(merged["password"], "new");
    }

    #[test]
    fn public_credentials_hide_secrets() {
        let creds = json!({
            "url": "postgres://u:pw@h/d", "host": "h", "database": "d",
            "user": "u", "password": "pw"
        });
        let public = public_credentials(Dialect::Postgresql, &creds);
        assert!(public.get("password").is_none());
        assert!(public.get("url").is_none());
        assert_eq!(public["host"], "h");
    }

    #[test]
    fn response_shape() {
        let resp = DialectResponse::from(get_dialect_def(Dialect::Postgresql));
        assert_eq!(resp.dialect, "postgresql");
        let json = serde_json::to_value(&resp).unwrap();
        let password = json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["key"] == "password")
            .unwrap();
        assert_eq!(password["isSecret"], true);
        assert_eq!(password["fieldType"], "text");
    }
}
