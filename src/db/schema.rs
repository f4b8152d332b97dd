//! Schema DDL rendering and introspection.
//!
//! [`SchemaRenderer`] turns registered tables into `CREATE`/`DROP` scripts for
//! one dialect, applying the instance's [`NamingConvention`]. Scripts are
//! idempotent: tables and indexes are created `IF NOT EXISTS` and dropped
//! `IF EXISTS`.
//!
//! # Dialect notes
//!
//! - SQLite: a single `INTEGER` primary key becomes the rowid alias, so it
//!   auto-increments without a keyword.
//! - PostgreSQL: single integer primary keys use `SERIAL`/`BIGSERIAL`.
//! - MySQL: `AUTO_INCREMENT`, and indexes are declared inline because MySQL
//!   has no `CREATE INDEX IF NOT EXISTS`.

use crate::config::NamingConvention;
use crate::db::engine::{DbPool, Dialect, Engine};
use crate::db::registry::Table;
use crate::error::Result;
use crate::models::{Column, ColumnType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Order `tables` so each one follows the tables its foreign keys reference.
///
/// Registration order decides between independent tables. References to
/// tables outside the list and self references are ignored. Tables caught in
/// a reference cycle keep their registration order.
fn dependency_order(tables: &[Arc<Table>]) -> Vec<&Arc<Table>> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::with_capacity(tables.len());
    let mut pending: Vec<&Arc<Table>> = tables.iter().collect();
    let mut ordered = Vec::with_capacity(tables.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|table| {
            table
                .columns
                .iter()
                .filter_map(|c| c.foreign_key.as_ref())
                .all(|fk| {
                    fk.table == table.name
                        || !names.contains(fk.table.as_str())
                        || placed.contains(fk.table.as_str())
                })
        });
        if ready.is_none() {
            debug!(
                table = %pending[0].name,
                "Foreign key cycle, keeping registration order"
            );
        }
        let next = pending.remove(ready.unwrap_or(0));
        placed.insert(next.name.as_str());
        ordered.push(next);
    }
    ordered
}

/// Expand `%(key)s` tokens in a naming template.
fn render_name(template: &str, tokens: &[(&str, &str)]) -> String {
    tokens.iter().fold(template.to_string(), |name, (key, value)| {
        name.replace(&format!("%({})s", key), value)
    })
}

/// Renders DDL for one dialect.
#[derive(Debug, Clone)]
pub struct SchemaRenderer<'a> {
    dialect: Dialect,
    naming: &'a NamingConvention,
}

impl<'a> SchemaRenderer<'a> {
    pub fn new(dialect: Dialect, naming: &'a NamingConvention) -> Self {
        Self { dialect, naming }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    /// Whether the table has a single integer primary key that should
    /// auto-increment.
    fn autoincrement_column<'t>(&self, table: &'t Table) -> Option<&'t Column> {
        match table.primary_key().as_slice() {
            [pk] if pk.column_type.is_integer() => Some(pk),
            _ => None,
        }
    }

    fn column_type(&self, column: &Column, autoincrement: bool) -> String {
        match (self.dialect, column.column_type) {
            (Dialect::SQLite, ColumnType::Integer | ColumnType::BigInteger) if autoincrement => {
                "INTEGER".to_string()
            }
            (Dialect::PostgreSQL, ColumnType::Integer) if autoincrement => "SERIAL".to_string(),
            (Dialect::PostgreSQL, ColumnType::BigInteger) if autoincrement => {
                "BIGSERIAL".to_string()
            }
            (_, ColumnType::Integer) => "INTEGER".to_string(),
            (_, ColumnType::BigInteger) => "BIGINT".to_string(),
            (Dialect::PostgreSQL, ColumnType::Float) => "DOUBLE PRECISION".to_string(),
            (Dialect::MySQL, ColumnType::Float) => "DOUBLE".to_string(),
            (Dialect::SQLite, ColumnType::Float) => "FLOAT".to_string(),
            (Dialect::MySQL, ColumnType::Boolean) => "BOOL".to_string(),
            (_, ColumnType::Boolean) => "BOOLEAN".to_string(),
            (_, ColumnType::String(Some(len))) => format!("VARCHAR({})", len),
            (Dialect::MySQL, ColumnType::String(None)) => "VARCHAR(255)".to_string(),
            (_, ColumnType::String(None)) => "VARCHAR".to_string(),
            (_, ColumnType::Text) => "TEXT".to_string(),
            (Dialect::PostgreSQL, ColumnType::Bytes) => "BYTEA".to_string(),
            (Dialect::MySQL, ColumnType::Bytes) => "LONGBLOB".to_string(),
            (Dialect::SQLite, ColumnType::Bytes) => "BLOB".to_string(),
            (_, ColumnType::Json) => "JSON".to_string(),
        }
    }

    fn column_sql(&self, column: &Column, autoincrement: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.q(&column.name),
            self.column_type(column, autoincrement)
        );
        if !column.nullable || column.primary_key {
            sql.push_str(" NOT NULL");
        }
        if autoincrement && self.dialect == Dialect::MySQL {
            sql.push_str(" AUTO_INCREMENT");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    /// `CONSTRAINT name ` prefix, or nothing when the template is unset.
    fn constraint_prefix(&self, template: Option<&String>, tokens: &[(&str, &str)]) -> String {
        match template {
            Some(template) => format!("CONSTRAINT {} ", self.q(&render_name(template, tokens))),
            None => String::new(),
        }
    }

    /// Index name. Indexes always need one, so an unset template falls back
    /// to `ix_<table>_<column>`.
    pub fn index_name(&self, table: &Table, column: &Column) -> String {
        let label = format!("{}_{}", table.name, column.name);
        match &self.naming.index {
            Some(template) => render_name(
                template,
                &[
                    ("table_name", table.name.as_str()),
                    ("column_0_name", column.name.as_str()),
                    ("column_0_label", label.as_str()),
                ],
            ),
            None => format!("ix_{}", label),
        }
    }

    fn indexed_columns<'t>(&self, table: &'t Table) -> impl Iterator<Item = &'t Column> {
        // Unique columns already carry an index.
        table.columns.iter().filter(|c| c.index && !c.unique)
    }

    /// `CREATE TABLE` for one table.
    pub fn create_table(&self, table: &Table) -> String {
        let auto = self.autoincrement_column(table).map(|c| c.name.as_str());
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|column| self.column_sql(column, Some(column.name.as_str()) == auto))
            .collect();

        let pk = table.primary_key();
        if !pk.is_empty() {
            let cols: Vec<String> = pk.iter().map(|c| self.q(&c.name)).collect();
            let prefix = self.constraint_prefix(
                self.naming.primary_key.as_ref(),
                &[("table_name", table.name.as_str())],
            );
            parts.push(format!("{}PRIMARY KEY ({})", prefix, cols.join(", ")));
        }

        for column in table.columns.iter().filter(|c| c.unique && !c.primary_key) {
            let prefix = self.constraint_prefix(
                self.naming.unique.as_ref(),
                &[("table_name", table.name.as_str()), ("column_0_name", column.name.as_str())],
            );
            parts.push(format!("{}UNIQUE ({})", prefix, self.q(&column.name)));
        }

        for column in &table.columns {
            let Some(fk) = &column.foreign_key else {
                continue;
            };
            let prefix = self.constraint_prefix(
                self.naming.foreign_key.as_ref(),
                &[
                    ("table_name", table.name.as_str()),
                    ("column_0_name", column.name.as_str()),
                    ("referred_table_name", fk.table.as_str()),
                ],
            );
            parts.push(format!(
                "{}FOREIGN KEY ({}) REFERENCES {} ({})",
                prefix,
                self.q(&column.name),
                self.q(&fk.table),
                self.q(&fk.column)
            ));
        }

        for check in &table.checks {
            let prefix = match &check.name {
                Some(name) => self.constraint_prefix(
                    self.naming.check.as_ref().or(Some(name)),
                    &[("table_name", table.name.as_str()), ("constraint_name", name.as_str())],
                ),
                None => String::new(),
            };
            parts.push(format!("{}CHECK ({})", prefix, check.expression));
        }

        if self.dialect == Dialect::MySQL {
            for column in self.indexed_columns(table) {
                parts.push(format!(
                    "INDEX {} ({})",
                    self.q(&self.index_name(table, column)),
                    self.q(&column.name)
                ));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.q(&table.name),
            parts.join(", ")
        )
    }

    /// Standalone `CREATE INDEX` statements (none on MySQL).
    pub fn create_indexes(&self, table: &Table) -> Vec<String> {
        if self.dialect == Dialect::MySQL {
            return Vec::new();
        }
        self.indexed_columns(table)
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    self.q(&self.index_name(table, column)),
                    self.q(&table.name),
                    self.q(&column.name)
                )
            })
            .collect()
    }

    pub fn drop_table(&self, table: &Table) -> String {
        format!("DROP TABLE IF EXISTS {}", self.q(&table.name))
    }

    /// Statements creating `tables`, referenced tables first.
    pub fn create_script(&self, tables: &[Arc<Table>]) -> Vec<String> {
        dependency_order(tables)
            .into_iter()
            .flat_map(|table| {
                std::iter::once(self.create_table(table)).chain(self.create_indexes(table))
            })
            .collect()
    }

    /// Statements dropping `tables`, referencing tables first.
    pub fn drop_script(&self, tables: &[Arc<Table>]) -> Vec<String> {
        dependency_order(tables)
            .into_iter()
            .rev()
            .map(|t| self.drop_table(t))
            .collect()
    }
}

/// Run a script inside one transaction on `engine`. Any failure rolls the
/// whole script back.
pub async fn run_script(engine: &Engine, statements: &[String]) -> Result<()> {
    let mut tx = engine.pool().begin().await?;
    for sql in statements {
        if engine.echo() {
            info!(bind = %engine.bind(), sql = %sql, "DDL");
        } else {
            debug!(bind = %engine.bind(), sql = %sql, "DDL");
        }
        if let Err(err) = tx.execute(sql, &[]).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(bind = %engine.bind(), error = %rollback_err, "Rollback of failed script failed");
            }
            return Err(err);
        }
    }
    tx.commit().await
}

/// Create `tables` on `engine`. Existing tables are left alone.
pub async fn create_tables(
    engine: &Engine,
    tables: &[Arc<Table>],
    naming: &NamingConvention,
) -> Result<()> {
    let script = SchemaRenderer::new(engine.dialect(), naming).create_script(tables);
    run_script(engine, &script).await?;
    info!(bind = %engine.bind(), tables = tables.len(), "Created tables");
    Ok(())
}

/// Drop `tables` from `engine`.
pub async fn drop_tables(
    engine: &Engine,
    tables: &[Arc<Table>],
    naming: &NamingConvention,
) -> Result<()> {
    let script = SchemaRenderer::new(engine.dialect(), naming).drop_script(tables);
    run_script(engine, &script).await?;
    info!(bind = %engine.bind(), tables = tables.len(), "Dropped tables");
    Ok(())
}

mod queries {
    pub const SQLITE_LIST_TABLES: &str = "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

    pub const POSTGRES_LIST_TABLES: &str = "SELECT table_name::text AS table_name \
         FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
         ORDER BY table_name";

    pub const MYSQL_LIST_TABLES: &str = "SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
         ORDER BY TABLE_NAME";
}

/// Reads back what exists in a database.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Names of the base tables in the connection's current schema.
    pub async fn list_tables(pool: &DbPool) -> Result<Vec<String>> {
        let query = match pool.dialect() {
            Dialect::SQLite => queries::SQLITE_LIST_TABLES,
            Dialect::PostgreSQL => queries::POSTGRES_LIST_TABLES,
            Dialect::MySQL => queries::MYSQL_LIST_TABLES,
        };
        let rows = pool.fetch_all(query, &[]).await?;
        rows.iter().map(|row| row.get_at::<String>(0)).collect()
    }

    pub async fn table_exists(pool: &DbPool, table: &str) -> Result<bool> {
        Ok(Self::list_tables(pool).await?.iter().any(|t| t == table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::db::engine::{EngineFactory, SqlxEngineFactory};
    use crate::db::registry::Registry;
    use crate::models::{BindKey, EntityDef};

    fn user_table(registry: &Registry) -> Arc<Table> {
        registry
            .register(
                EntityDef::new("User")
                    .column(Column::integer("id").primary_key())
                    .column(Column::string("name", 64).not_null().unique())
                    .column(Column::string("email", 128).index())
                    .check(Some("name_not_blank"), "name <> ''"),
            )
            .unwrap()
    }

    fn post_table(registry: &Registry) -> Arc<Table> {
        registry
            .register(
                EntityDef::new("Post")
                    .column(Column::integer("id").primary_key())
                    .column(Column::integer("user_id").references("user", "id")),
            )
            .unwrap()
    }

    #[test]
    fn test_render_name_tokens() {
        assert_eq!(
            render_name("uq_%(table_name)s_%(column_0_name)s", &[
                ("table_name", "user"),
                ("column_0_name", "name"),
            ]),
            "uq_user_name"
        );
    }

    #[test]
    fn test_sqlite_create_table() {
        let registry = Registry::new();
        let table = user_table(&registry);
        let naming = NamingConvention::default();
        let sql = SchemaRenderer::new(Dialect::SQLite, &naming).create_table(&table);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"user\" (\
             \"id\" INTEGER NOT NULL, \
             \"name\" VARCHAR(64) NOT NULL, \
             \"email\" VARCHAR(128), \
             CONSTRAINT \"pk_user\" PRIMARY KEY (\"id\"), \
             CONSTRAINT \"uq_user_name\" UNIQUE (\"name\"), \
             CONSTRAINT \"ck_user_name_not_blank\" CHECK (name <> ''))"
        );
    }

    #[test]
    fn test_index_statement_uses_column_label() {
        let registry = Registry::new();
        let table = user_table(&registry);
        let naming = NamingConvention::default();
        let renderer = SchemaRenderer::new(Dialect::PostgreSQL, &naming);
        assert_eq!(
            renderer.create_indexes(&table),
            vec!["CREATE INDEX IF NOT EXISTS \"ix_user_email\" ON \"user\" (\"email\")"]
        );
    }

    #[test]
    fn test_postgres_serial_and_foreign_key() {
        let registry = Registry::new();
        user_table(&registry);
        let post = post_table(&registry);
        let naming = NamingConvention::default();
        let sql = SchemaRenderer::new(Dialect::PostgreSQL, &naming).create_table(&post);
        assert!(sql.contains("\"id\" SERIAL NOT NULL"));
        assert!(sql.contains(
            "CONSTRAINT \"fk_post_user_id_user\" FOREIGN KEY (\"user_id\") REFERENCES \"user\" (\"id\")"
        ));
    }

    #[test]
    fn test_mysql_inline_index_and_auto_increment() {
        let registry = Registry::new();
        let table = user_table(&registry);
        let naming = NamingConvention::default();
        let renderer = SchemaRenderer::new(Dialect::MySQL, &naming);
        let sql = renderer.create_table(&table);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `user`"));
        assert!(sql.contains("`id` INTEGER NOT NULL AUTO_INCREMENT"));
        assert!(sql.contains("INDEX `ix_user_email` (`email`)"));
        assert!(renderer.create_indexes(&table).is_empty());
    }

    #[test]
    fn test_no_naming_convention() {
        let registry = Registry::new();
        let table = user_table(&registry);
        let naming = NamingConvention::none();
        let renderer = SchemaRenderer::new(Dialect::SQLite, &naming);
        let sql = renderer.create_table(&table);
        assert!(sql.contains(", PRIMARY KEY (\"id\")"));
        assert!(sql.contains(", UNIQUE (\"name\")"));
        // Named checks keep their own name.
        assert!(sql.contains("CONSTRAINT \"name_not_blank\" CHECK"));
        assert_eq!(
            renderer.index_name(&table, table.column("email").unwrap()),
            "ix_user_email"
        );
    }

    #[test]
    fn test_drop_script_reverses_order() {
        let registry = Registry::new();
        let user = user_table(&registry);
        let post = post_table(&registry);
        let naming = NamingConvention::default();
        let script = SchemaRenderer::new(Dialect::SQLite, &naming).drop_script(&[user, post]);
        assert_eq!(
            script,
            vec!["DROP TABLE IF EXISTS \"post\"", "DROP TABLE IF EXISTS \"user\""]
        );
    }

    #[test]
    fn test_scripts_follow_foreign_keys() {
        let registry = Registry::new();
        let post = post_table(&registry);
        let user = user_table(&registry);
        let naming = NamingConvention::default();
        let renderer = SchemaRenderer::new(Dialect::SQLite, &naming);
        let tables = [post, user];

        let created: Vec<String> = renderer
            .create_script(&tables)
            .into_iter()
            .filter(|sql| sql.starts_with("CREATE TABLE"))
            .collect();
        assert!(created[0].contains("\"user\""), "{}", created[0]);
        assert!(created[1].contains("\"post\""), "{}", created[1]);
        assert_eq!(
            renderer.drop_script(&tables),
            vec!["DROP TABLE IF EXISTS \"post\"", "DROP TABLE IF EXISTS \"user\""]
        );
    }

    #[test]
    fn test_dependency_order_with_cycle_and_self_reference() {
        let registry = Registry::new();
        let node = registry
            .register(
                EntityDef::new("Node")
                    .column(Column::integer("id").primary_key())
                    .column(Column::integer("parent_id").references("node", "id")),
            )
            .unwrap();
        let left = registry
            .register(
                EntityDef::new("Left").column(Column::integer("right_id").references("right", "id")),
            )
            .unwrap();
        let right = registry
            .register(
                EntityDef::new("Right").column(Column::integer("left_id").references("left", "id")),
            )
            .unwrap();
        let outside = registry
            .register(
                EntityDef::new("Leaf").column(Column::integer("x").references("elsewhere", "id")),
            )
            .unwrap();

        let tables = [left, right, node, outside];
        let names: Vec<&str> = dependency_order(&tables)
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["node", "leaf", "left", "right"]);
    }

    #[tokio::test]
    async fn test_create_and_drop_tables_sqlite() {
        let registry = Registry::new();
        let tables = vec![user_table(&registry), post_table(&registry)];
        let naming = NamingConvention::default();
        let engine = SqlxEngineFactory
            .create_engine(&BindKey::Default, "sqlite://", &EngineOptions::default())
            .unwrap();

        create_tables(&engine, &tables, &naming).await.unwrap();
        // Idempotent
        create_tables(&engine, &tables, &naming).await.unwrap();
        assert_eq!(
            SchemaInspector::list_tables(engine.pool()).await.unwrap(),
            vec!["post".to_string(), "user".to_string()]
        );

        drop_tables(&engine, &tables, &naming).await.unwrap();
        assert!(
            !SchemaInspector::table_exists(engine.pool(), "user")
                .await
                .unwrap()
        );
    }
}
