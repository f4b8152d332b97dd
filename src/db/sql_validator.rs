//! Read-only enforcement for sessions.
//!
//! Builder statements know their own kind. Raw `text()` SQL is parsed with
//! [sqlparser](https://docs.rs/sqlparser/) using the engine's dialect and
//! classified statement by statement, so a write cannot hide behind
//! formatting or a leading `SELECT`.

use crate::db::engine::Dialect;
use crate::error::{Error, Result};
use sqlparser::ast::Statement;
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Kind of SQL statement, as far as read-only sessions care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// SELECT, SHOW, EXPLAIN of a read
    Read,
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    DmlWrite,
    /// CREATE, ALTER, DROP, TRUNCATE
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// Everything else, including procedure calls
    Other,
}

mod error_messages {
    pub const DML_WRITE: &str = "Write statements are not allowed in a read-only session.";
    pub const DDL: &str = "Schema changes are not allowed in a read-only session.";
    pub const TRANSACTION: &str =
        "Transaction control is not allowed in raw SQL. Use commit() or rollback() on the session.";
    pub const OTHER: &str = "Only queries are allowed in a read-only session.";
}

fn parser_dialect(dialect: Dialect) -> Box<dyn sqlparser::dialect::Dialect> {
    match dialect {
        Dialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
        Dialect::MySQL => Box::new(MySqlDialect {}),
        Dialect::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Check that raw SQL only reads.
///
/// Returns [`Error::Permission`] for the first statement that writes, and
/// [`Error::InvalidInput`] when the SQL cannot be parsed.
pub fn validate_readonly(sql: &str, dialect: Dialect) -> Result<()> {
    let parser_dialect = parser_dialect(dialect);
    let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| Error::invalid_input(format!("Failed to parse SQL statement: {}", e)))?;

    if statements.is_empty() {
        return Err(Error::invalid_input("Empty SQL statement"));
    }

    for stmt in &statements {
        let (stmt_type, operation) = classify_statement(stmt);
        let reason = match stmt_type {
            SqlStatementType::Read => continue,
            SqlStatementType::DmlWrite => error_messages::DML_WRITE,
            SqlStatementType::Ddl => error_messages::DDL,
            SqlStatementType::Transaction => error_messages::TRANSACTION,
            SqlStatementType::Other => error_messages::OTHER,
        };
        return Err(Error::permission(operation, reason));
    }

    Ok(())
}

/// Classify a parsed statement.
pub fn classify_statement(stmt: &Statement) -> (SqlStatementType, &'static str) {
    match stmt {
        Statement::Query(_) => (SqlStatementType::Read, "SELECT"),
        Statement::ShowTables { .. } => (SqlStatementType::Read, "SHOW TABLES"),
        Statement::ShowColumns { .. } => (SqlStatementType::Read, "SHOW COLUMNS"),
        Statement::ShowDatabases { .. } => (SqlStatementType::Read, "SHOW DATABASES"),
        Statement::ShowSchemas { .. } => (SqlStatementType::Read, "SHOW SCHEMAS"),
        Statement::ShowCreate { .. } => (SqlStatementType::Read, "SHOW CREATE"),
        Statement::ShowVariable { .. } => (SqlStatementType::Read, "SHOW VARIABLE"),
        Statement::ShowVariables { .. } => (SqlStatementType::Read, "SHOW VARIABLES"),
        Statement::ShowStatus { .. } => (SqlStatementType::Read, "SHOW STATUS"),
        Statement::ExplainTable { .. } => (SqlStatementType::Read, "EXPLAIN TABLE"),

        // EXPLAIN is as safe as what it explains (EXPLAIN ANALYZE runs it).
        Statement::Explain { statement, .. } => match classify_statement(statement) {
            (SqlStatementType::Read, _) => (SqlStatementType::Read, "EXPLAIN"),
            other => other,
        },

        Statement::Insert(_) => (SqlStatementType::DmlWrite, "INSERT"),
        Statement::Update { .. } => (SqlStatementType::DmlWrite, "UPDATE"),
        Statement::Delete(_) => (SqlStatementType::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (SqlStatementType::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (SqlStatementType::DmlWrite, "COPY"),

        Statement::CreateTable { .. } => (SqlStatementType::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (SqlStatementType::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => (SqlStatementType::Ddl, "CREATE INDEX"),
        Statement::AlterTable { .. } => (SqlStatementType::Ddl, "ALTER TABLE"),
        Statement::Drop { .. } => (SqlStatementType::Ddl, "DROP"),
        Statement::Truncate { .. } => (SqlStatementType::Ddl, "TRUNCATE"),

        Statement::StartTransaction { .. } => (SqlStatementType::Transaction, "BEGIN"),
        Statement::Commit { .. } => (SqlStatementType::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (SqlStatementType::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (SqlStatementType::Transaction, "SAVEPOINT"),

        Statement::Call { .. } => (SqlStatementType::Other, "CALL"),
        Statement::Pragma { .. } => (SqlStatementType::Other, "PRAGMA"),
        Statement::Set(_) => (SqlStatementType::Other, "SET"),
        _ => (SqlStatementType::Other, "Unknown"),
    }
}
