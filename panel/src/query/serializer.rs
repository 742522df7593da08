use serde_json::Value;

use super::{Count, Delete, Insert, Node, Predicate, Select, Statement, Test, Update, WhereClause};

/// SQL text differences between the supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Postgresql,
    Mysql,
    Mssql,
}

/// Renders statements for one flavor.
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    flavor: Flavor,
}

struct Formatter<'a> {
    flavor: Flavor,
    dst: String,
    params: &'a mut Vec<Value>,
}

impl Serializer {
    pub fn new(flavor: Flavor) -> Self {
        Self { flavor }
    }

    /// Render `stmt`, appending its bound values to `params` in placeholder order.
    pub fn serialize(&self, stmt: &Statement, params: &mut Vec<Value>) -> String {
        let mut f = Formatter {
            flavor: self.flavor,
            dst: String::new(),
            params,
        };

        match stmt {
            Statement::Select(s) => f.select(s),
            Statement::Count(s) => f.count(s),
            Statement::Insert(s) => f.insert(s),
            Statement::Update(s) => f.update(s),
            Statement::Delete(s) => f.delete(s),
        }

        f.dst
    }
}

impl Formatter<'_> {
    fn select(&mut self, stmt: &Select) {
        self.dst.push_str("SELECT ");
        if stmt.columns.is_empty() {
            self.dst.push('*');
        } else {
            for (i, column) in stmt.columns.iter().enumerate() {
                if i > 0 {
                    self.dst.push_str(", ");
                }
                self.ident(column);
            }
        }
        self.dst.push_str(" FROM ");
        self.ident(&stmt.table);
        self.where_clause(&stmt.filter);

        if let Some(order) = &stmt.order_by {
            self.dst.push_str(" ORDER BY ");
            self.ident(&stmt.table);
            self.dst.push('.');
            self.ident(&order.column);
            self.dst.push(' ');
            self.dst.push_str(order.direction.keyword());
        }

        match self.flavor {
            Flavor::Postgresql | Flavor::Mysql => {
                if let Some(limit) = stmt.limit {
                    self.dst.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = stmt.offset {
                    if stmt.limit.is_none() && self.flavor == Flavor::Mysql {
                        // MySQL has no OFFSET without LIMIT
                        self.dst.push_str(" LIMIT 18446744073709551615");
                    }
                    self.dst.push_str(&format!(" OFFSET {offset}"));
                }
            }
            Flavor::Mssql => {
                if stmt.limit.is_some() || stmt.offset.is_some() {
                    if stmt.order_by.is_none() {
                        self.dst.push_str(" ORDER BY (SELECT NULL)");
                    }
                    let offset = stmt.offset.unwrap_or(0);
                    self.dst.push_str(&format!(" OFFSET {offset} ROWS"));
                    if let Some(limit) = stmt.limit {
                        self.dst.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                    }
                }
            }
        }
    }

    fn count(&mut self, stmt: &Count) {
        self.dst.push_str("SELECT COUNT(");
        match &stmt.column {
            Some(column) => {
                self.ident(&stmt.table);
                self.dst.push('.');
                self.ident(column);
            }
            None => self.dst.push('*'),
        }
        self.dst.push_str(") AS ");
        self.ident("count");
        self.dst.push_str(" FROM ");
        self.ident(&stmt.table);
        self.where_clause(&stmt.filter);
    }

    fn insert(&mut self, stmt: &Insert) {
        self.dst.push_str("INSERT INTO ");
        self.ident(&stmt.table);

        if !stmt.values.is_empty() {
            self.dst.push_str(" (");
            for (i, (column, _)) in stmt.values.iter().enumerate() {
                if i > 0 {
                    self.dst.push_str(", ");
                }
                self.ident(column);
            }
            self.dst.push(')');
        }

        if let (Flavor::Mssql, Some(returning)) = (self.flavor, &stmt.returning) {
            self.dst.push_str(" OUTPUT INSERTED.");
            self.ident(returning);
        }

        if stmt.values.is_empty() {
            match self.flavor {
                Flavor::Mysql => self.dst.push_str(" () VALUES ()"),
                Flavor::Postgresql | Flavor::Mssql => self.dst.push_str(" DEFAULT VALUES"),
            }
        } else {
            self.dst.push_str(" VALUES (");
            for (i, (_, value)) in stmt.values.iter().enumerate() {
                if i > 0 {
                    self.dst.push_str(", ");
                }
                self.param(value.clone());
            }
            self.dst.push(')');
        }

        if let (Flavor::Postgresql, Some(returning)) = (self.flavor, &stmt.returning) {
            self.dst.push_str(" RETURNING ");
            self.ident(returning);
        }
    }

    fn update(&mut self, stmt: &Update) {
        self.dst.push_str("UPDATE ");
        self.ident(&stmt.table);
        self.dst.push_str(" SET ");
        for (i, (column, value)) in stmt.values.iter().enumerate() {
            if i > 0 {
                self.dst.push_str(", ");
            }
            self.ident(column);
            self.dst.push_str(" = ");
            self.param(value.clone());
        }
        self.where_clause(&stmt.filter);
    }

    fn delete(&mut self, stmt: &Delete) {
        self.dst.push_str("DELETE FROM ");
        self.ident(&stmt.table);
        self.where_clause(&stmt.filter);
    }

    // ---------- fragments ----------

    fn where_clause(&mut self, clause: &WhereClause) {
        if clause.is_empty() {
            return;
        }
        self.dst.push_str(" WHERE ");
        self.nodes(clause);
    }

    fn nodes(&mut self, clause: &WhereClause) {
        for (i, (verb, node)) in clause.nodes().iter().enumerate() {
            if i > 0 {
                self.dst.push(' ');
                self.dst.push_str(verb.keyword());
                self.dst.push(' ');
            }
            match node {
                Node::Predicate(p) => self.predicate(p),
                Node::Group(group) => {
                    self.dst.push('(');
                    self.nodes(group);
                    self.dst.push(')');
                }
            }
        }
    }

    fn predicate(&mut self, p: &Predicate) {
        match &p.test {
            Test::IsNull => {
                self.ident(&p.column);
                self.dst.push_str(" IS NULL");
            }
            Test::IsNotNull => {
                self.ident(&p.column);
                self.dst.push_str(" IS NOT NULL");
            }
            Test::Compare(op, value) => {
                self.ident(&p.column);
                self.dst.push(' ');
                self.dst.push_str(op.as_sql());
                self.dst.push(' ');
                self.param(value.clone());
            }
            Test::In(values) if values.is_empty() => self.dst.push_str("1 = 0"),
            Test::In(values) => {
                self.ident(&p.column);
                self.dst.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.dst.push_str(", ");
                    }
                    self.param(value.clone());
                }
                self.dst.push(')');
            }
        }
    }

    fn ident(&mut self, name: &str) {
        match self.flavor {
            Flavor::Postgresql => {
                self.dst.push('"');
                self.dst.push_str(&name.replace('"', "\"\""));
                self.dst.push('"');
            }
            Flavor::Mysql => {
                self.dst.push('`');
                self.dst.push_str(&name.replace('`', "``"));
                self.dst.push('`');
            }
            Flavor::Mssql => {
                self.dst.push('[');
                self.dst.push_str(&name.replace(']', "]]"));
                self.dst.push(']');
            }
        }
    }

    fn param(&mut self, value: Value) {
        self.params.push(value);
        let n = self.params.len();
        match self.flavor {
            Flavor::Postgresql => self.dst.push_str(&format!("${n}")),
            Flavor::Mysql => self.dst.push('?'),
            Flavor::Mssql => self.dst.push_str(&format!("@P{n}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, OrderBy, Predicate, Verb};
    use serde_json::json;

    fn render(flavor: Flavor, stmt: impl Into<Statement>) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = Serializer::new(flavor).serialize(&stmt.into(), &mut params);
        (sql, params)
    }

    fn paged_posts() -> Select {
        let mut select = Select::new("posts");
        select.filter = WhereClause::new().and(Predicate::eq("status", json!("1")));
        select.order_by = Some(OrderBy {
            column: "created_at".to_string(),
            direction: Direction::Desc,
        });
        select.limit = Some(10);
        select.offset = Some(20);
        select
    }

    #[test]
    fn select_per_flavor() {
        let (sql, params) = render(Flavor::Postgresql, paged_posts());
        assert_eq!(
            sql,
            r#"SELECT * FROM "posts" WHERE "status" = $1 ORDER BY "posts"."created_at" DESC LIMIT 10 OFFSET 20"#
        );
        assert_eq!(params, vec![json!("1")]);

        let (sql, _) = render(Flavor::Mysql, paged_posts());
        assert_eq!(
            sql,
            "SELECT * FROM `posts` WHERE `status` = ? ORDER BY `posts`.`created_at` DESC LIMIT 10 OFFSET 20"
        );

        let (sql, _) = render(Flavor::Mssql, paged_posts());
        assert_eq!(
            sql,
            "SELECT * FROM [posts] WHERE [status] = @P1 ORDER BY [posts].[created_at] DESC OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn mssql_pagination_without_sort_orders_by_null() {
        let mut select = Select::new("posts");
        select.limit = Some(5);
        select.offset = Some(0);
        let (sql, _) = render(Flavor::Mssql, select);
        assert_eq!(
            sql,
            "SELECT * FROM [posts] ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn nested_group_is_parenthesized() {
        let mut inner = WhereClause::new();
        inner.push(Verb::And, Predicate::eq("a", json!(1)));
        inner.push(Verb::Or, Predicate::eq("b", json!(2)));

        let mut clause = WhereClause::new();
        clause.push(Verb::And, Predicate::is_not_null("c"));
        clause.push_group(Verb::And, inner);

        let mut select = Select::new("t");
        select.columns = vec!["id".to_string(), "a".to_string()];
        select.filter = clause;

        let (sql, params) = render(Flavor::Postgresql, select);
        assert_eq!(
            sql,
            r#"SELECT "id", "a" FROM "t" WHERE "c" IS NOT NULL AND ("a" = $1 OR "b" = $2)"#
        );
        assert_eq!(params, vec![json!(1), json!(2)]);
    }

    #[test]
    fn insert_returning_per_flavor() {
        let insert = Insert {
            table: "posts".to_string(),
            values: vec![("title".to_string(), json!("Hello"))],
            returning: Some("id".to_string()),
        };

        let (sql, _) = render(Flavor::Postgresql, insert.clone());
        assert_eq!(
            sql,
            r#"INSERT INTO "posts" ("title") VALUES ($1) RETURNING "id""#
        );

        let (sql, _) = render(Flavor::Mssql, insert.clone());
        assert_eq!(
            sql,
            "INSERT INTO [posts] ([title]) OUTPUT INSERTED.[id] VALUES (@P1)"
        );

        let (sql, _) = render(Flavor::Mysql, insert);
        assert_eq!(sql, "INSERT INTO `posts` (`title`) VALUES (?)");
    }

    #[test]
    fn count_update_delete() {
        let (sql, _) = render(
            Flavor::Postgresql,
            Count {
                table: "posts".to_string(),
                column: Some("id".to_string()),
                filter: WhereClause::new(),
            },
        );
        assert_eq!(sql, r#"SELECT COUNT("posts"."id") AS "count" FROM "posts""#);

        let (sql, params) = render(
            Flavor::Mysql,
            Update {
                table: "posts".to_string(),
                values: vec![
                    ("title".to_string(), json!("New")),
                    ("status".to_string(), json!(2)),
                ],
                filter: WhereClause::new().and(Predicate::eq("id", json!(7))),
            },
        );
        assert_eq!(
            sql,
            "UPDATE `posts` SET `title` = ?, `status` = ? WHERE `id` = ?"
        );
        assert_eq!(params, vec![json!("New"), json!(2), json!(7)]);

        let (sql, _) = render(
            Flavor::Mssql,
            Delete {
                table: "posts".to_string(),
                filter: WhereClause::new()
                    .and(Predicate::is_in("id", vec![json!(1), json!(2)])),
            },
        );
        assert_eq!(sql, "DELETE FROM [posts] WHERE [id] IN (@P1, @P2)");
    }

    #[test]
    fn identifiers_are_escaped() {
        let (sql, _) = render(Flavor::Postgresql, Select::new(r#"we"ird"#));
        assert_eq!(sql, r#"SELECT * FROM "we""ird""#);
        let (sql, _) = render(Flavor::Mssql, Select::new("a]b"));
        assert_eq!(sql, "SELECT * FROM [a]]b]");
    }
}
