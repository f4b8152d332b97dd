//! Statement builders.
//!
//! A small vocabulary of SELECT / INSERT / UPDATE / DELETE builders plus raw
//! `text` statements. Builders name the table they act on, which is how a
//! session routes them to the right engine. They render per dialect with
//! quoted identifiers and bound parameters.

use crate::db::engine::Dialect;
use crate::models::{BindKey, Value};

/// Comparison operators for filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl Op {
    fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }
}

/// One `column <op> value` condition. Conditions are joined with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

/// Where a statement should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Routed through the table's bind.
    Table(String),
    /// Sent to a bind's engine directly.
    Bind(BindKey),
}

/// SQL text and its parameters, ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Renderer {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl Renderer {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote(name);
        self.sql.push_str(&quoted);
    }

    /// Bind a value. NULL is written inline so it needs no parameter type.
    fn value(&mut self, value: &Value) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.params.push(value.clone());
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn filters(&mut self, filters: &[Condition]) {
        for (i, cond) in filters.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            self.ident(&cond.column);
            match (cond.op, cond.value.is_null()) {
                (Op::IsNull, _) | (Op::Eq, true) => self.push(" IS NULL"),
                (Op::IsNotNull, _) | (Op::Ne, true) => self.push(" IS NOT NULL"),
                (op, _) => {
                    self.push(" ");
                    self.push(op.as_sql());
                    self.push(" ");
                    self.value(&cond.value);
                }
            }
        }
    }

    fn finish(self) -> Rendered {
        Rendered {
            sql: self.sql,
            params: self.params,
        }
    }
}

macro_rules! filter_methods {
    () => {
        /// Add a condition. Conditions are joined with AND.
        pub fn filter(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
            self.filters.push(Condition {
                column: column.into(),
                op,
                value: value.into(),
            });
            self
        }

        /// `column = value`, or `column IS NULL` for a null value.
        pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
            self.filter(column, Op::Eq, value)
        }
    };
}

/// `SELECT` builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    filters: Vec<Condition>,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    count: bool,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            count: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Select only these columns instead of `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    filter_methods!();

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), false));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), true));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// `SELECT COUNT(*) AS count` with the same filters.
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn render(&self, dialect: Dialect) -> Rendered {
        let mut r = Renderer::new(dialect);
        r.push("SELECT ");
        if self.count {
            r.push("COUNT(*) AS count");
        } else if self.columns.is_empty() {
            r.push("*");
        } else {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    r.push(", ");
                }
                r.ident(column);
            }
        }
        r.push(" FROM ");
        r.ident(&self.table);
        r.filters(&self.filters);
        for (i, (column, desc)) in self.order_by.iter().enumerate() {
            r.push(if i == 0 { " ORDER BY " } else { ", " });
            r.ident(column);
            if *desc {
                r.push(" DESC");
            }
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                r.push(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    r.push(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => {
                // MySQL and SQLite need a LIMIT before OFFSET.
                match dialect {
                    Dialect::PostgreSQL => r.push(&format!(" OFFSET {}", offset)),
                    Dialect::MySQL => {
                        r.push(&format!(" LIMIT 18446744073709551615 OFFSET {}", offset))
                    }
                    Dialect::SQLite => r.push(&format!(" LIMIT -1 OFFSET {}", offset)),
                }
            }
            (None, None) => {}
        }
        r.finish()
    }
}

/// `INSERT` builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        self.values
            .extend(values.into_iter().map(|(c, v)| (c.into(), v)));
        self
    }

    pub fn render(&self, dialect: Dialect) -> Rendered {
        let mut r = Renderer::new(dialect);
        r.push("INSERT INTO ");
        r.ident(&self.table);
        if self.values.is_empty() {
            match dialect {
                Dialect::MySQL => r.push(" () VALUES ()"),
                Dialect::PostgreSQL | Dialect::SQLite => r.push(" DEFAULT VALUES"),
            }
            return r.finish();
        }
        r.push(" (");
        for (i, (column, _)) in self.values.iter().enumerate() {
            if i > 0 {
                r.push(", ");
            }
            r.ident(column);
        }
        r.push(") VALUES (");
        for (i, (_, value)) in self.values.iter().enumerate() {
            if i > 0 {
                r.push(", ");
            }
            r.value(value);
        }
        r.push(")");
        r.finish()
    }
}

/// `UPDATE` builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    assignments: Vec<(String, Value)>,
    filters: Vec<Condition>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    filter_methods!();

    pub fn render(&self, dialect: Dialect) -> Rendered {
        let mut r = Renderer::new(dialect);
        r.push("UPDATE ");
        r.ident(&self.table);
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            r.push(if i == 0 { " SET " } else { ", " });
            r.ident(column);
            r.push(" = ");
            r.value(value);
        }
        r.filters(&self.filters);
        r.finish()
    }
}

/// `DELETE` builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    filters: Vec<Condition>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    filter_methods!();

    pub fn render(&self, dialect: Dialect) -> Rendered {
        let mut r = Renderer::new(dialect);
        r.push("DELETE FROM ");
        r.ident(&self.table);
        r.filters(&self.filters);
        r.finish()
    }
}

/// Raw SQL with positional parameters.
///
/// Write placeholders in the target dialect (`?` or `$1`). Without an
/// explicit target the statement runs on the default engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    sql: String,
    params: Vec<Value>,
    target: Option<Target>,
}

impl Text {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            target: None,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Route as if the statement acted on `table`.
    pub fn for_table(mut self, table: impl Into<String>) -> Self {
        self.target = Some(Target::Table(table.into()));
        self
    }

    /// Run on a bind's engine.
    pub fn on_bind(mut self, key: impl Into<BindKey>) -> Self {
        self.target = Some(Target::Bind(key.into()));
        self
    }

    pub fn render(&self) -> Rendered {
        Rendered {
            sql: self.sql.clone(),
            params: self.params.clone(),
        }
    }
}

/// Any statement a session can run.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Text(Text),
}

impl Statement {
    /// Where the statement runs. `None` means the default engine.
    pub fn target(&self) -> Option<Target> {
        match self {
            Statement::Select(s) => Some(Target::Table(s.table.clone())),
            Statement::Insert(s) => Some(Target::Table(s.table.clone())),
            Statement::Update(s) => Some(Target::Table(s.table.clone())),
            Statement::Delete(s) => Some(Target::Table(s.table.clone())),
            Statement::Text(s) => s.target.clone(),
        }
    }

    pub fn render(&self, dialect: Dialect) -> Rendered {
        match self {
            Statement::Select(s) => s.render(dialect),
            Statement::Insert(s) => s.render(dialect),
            Statement::Update(s) => s.render(dialect),
            Statement::Delete(s) => s.render(dialect),
            Statement::Text(s) => s.render(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Text(_) => "text",
        }
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
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

impl From<Text> for Statement {
    fn from(s: Text) -> Self {
        Statement::Text(s)
    }
}

/// `SELECT * FROM table`
pub fn select(table: impl Into<String>) -> Select {
    Select::from(table)
}

/// `INSERT INTO table`
pub fn insert(table: impl Into<String>) -> Insert {
    Insert::into(table)
}

/// `UPDATE table`
pub fn update(table: impl Into<String>) -> Update {
    Update::table(table)
}

/// `DELETE FROM table`
pub fn delete(table: impl Into<String>) -> Delete {
    Delete::from(table)
}

/// Raw SQL statement.
pub fn text(sql: impl Into<String>) -> Text {
    Text::new(sql)
}
