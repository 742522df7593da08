//! Dialect-neutral statement descriptions and their rendering to SQL text
//! plus bound parameters.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

mod predicate;
mod serializer;

pub use predicate::{Node, Operator, Predicate, Test, Verb, WhereClause};
pub use serializer::{Flavor, Serializer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Accepts `"asc"`, `"desc"` in any case; `""` and `null` mean ascending.
impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(Direction::Asc),
            Some(s) if s.eq_ignore_ascii_case("asc") => Ok(Direction::Asc),
            Some(s) if s.eq_ignore_ascii_case("desc") => Ok(Direction::Desc),
            Some(other) => Err(de::Error::unknown_variant(other, &["asc", "desc", ""])),
        }
    }
}

/// Deserializes a LIMIT/OFFSET bound. Numbers and numeric strings are kept;
/// anything else (`""`, `"abc"`, `null`, negatives) becomes `None`.
pub fn lenient_bound<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub filter: WhereClause,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: WhereClause::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Count {
    pub table: String,
    /// Counted column; `None` counts rows.
    pub column: Option<String>,
    pub filter: WhereClause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<(String, Value)>,
    /// Column whose generated value the statement should return, where the
    /// dialect supports it in-statement.
    pub returning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub values: Vec<(String, Value)>,
    pub filter: WhereClause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: WhereClause,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Count(Count),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Count> for Statement {
    fn from(s: Count) -> Self {
        Statement::Count(s)
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}
