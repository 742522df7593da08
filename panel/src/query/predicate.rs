use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a node joins the nodes before it. Ignored for the first node of a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    #[default]
    And,
    Or,
}

impl Verb {
    pub fn keyword(self) -> &'static str {
        match self {
            Verb::And => "AND",
            Verb::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    IsNull,
    IsNotNull,
    Compare(Operator, Value),
    In(Vec<Value>),
}

/// A single-column test. The column is always emitted as a quoted identifier
/// and values are always bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub test: Test,
}

impl Predicate {
    pub fn is_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            test: Test::IsNull,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            test: Test::IsNotNull,
        }
    }

    pub fn compare(column: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            test: Test::Compare(op, value),
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, Operator::Eq, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            test: Test::In(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Predicate(Predicate),
    /// Rendered inside parentheses.
    Group(WhereClause),
}

/// An ordered list of predicates and nested groups, each joined to its
/// predecessor by its own verb.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    nodes: Vec<(Verb, Node)>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[(Verb, Node)] {
        &self.nodes
    }

    pub fn push(&mut self, verb: Verb, predicate: Predicate) -> &mut Self {
        self.nodes.push((verb, Node::Predicate(predicate)));
        self
    }

    /// Empty groups are dropped rather than rendered as `()`.
    pub fn push_group(&mut self, verb: Verb, group: WhereClause) -> &mut Self {
        if !group.is_empty() {
            self.nodes.push((verb, Node::Group(group)));
        }
        self
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.push(Verb::And, predicate);
        self
    }
}
