//! Multi-bind migrations.
//!
//! Migration steps are produced by the caller, one list of SQL statements
//! per bind. Each bind's steps run in that bind's own transaction, in
//! metadata order (binds in the order their first entity was registered).
//! A failing bind is rolled back and stops the run; binds that already
//! committed stay committed.
//!
//! Offline mode renders the same steps into one script per bind without
//! touching any database.

use crate::aio::AsyncAlchemical;
use crate::alchemical::Alchemical;
use crate::config::NamingConvention;
use crate::db::engine::{Dialect, Engine};
use crate::db::registry::MetaData;
use crate::db::schema::{SchemaRenderer, run_script};
use crate::error::Result;
use crate::models::BindKey;
use tracing::info;

/// One bind a migration runs against.
#[derive(Debug, Clone)]
pub struct MigrationTarget {
    pub bind: BindKey,
    pub engine: Engine,
    pub metadata: MetaData,
    pub naming: NamingConvention,
    /// File stem for offline output. The default bind is `default`, prefixed
    /// with underscores while that collides with a bind name.
    pub file_stem: String,
}

impl MigrationTarget {
    pub fn dialect(&self) -> Dialect {
        self.engine.dialect()
    }

    pub fn file_name(&self) -> String {
        format!("{}.sql", self.file_stem)
    }
}

/// A rendered offline script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineScript {
    pub bind: BindKey,
    pub file_name: String,
    pub sql: String,
}

fn file_stem(bind: &BindKey, metadatas: &[MetaData]) -> String {
    match bind {
        BindKey::Named(name) => name.clone(),
        BindKey::Default => {
            let mut stem = "default".to_string();
            while metadatas.iter().any(|m| m.bind().name() == Some(stem.as_str())) {
                stem.insert(0, '_');
            }
            stem
        }
    }
}

fn collect_targets<F>(
    metadatas: Vec<MetaData>,
    naming: &NamingConvention,
    get_engine: F,
) -> Result<Vec<MigrationTarget>>
where
    F: Fn(&BindKey) -> Result<Option<Engine>>,
{
    let mut targets = Vec::with_capacity(metadatas.len());
    for metadata in &metadatas {
        let bind = metadata.bind().clone();
        // Binds without a configured URL have nothing to migrate.
        let Some(engine) = get_engine(&bind)? else {
            continue;
        };
        targets.push(MigrationTarget {
            file_stem: file_stem(&bind, &metadatas),
            bind,
            engine,
            metadata: metadata.clone(),
            naming: naming.clone(),
        });
    }
    Ok(targets)
}

/// Binds with both registered tables and an engine.
pub fn migration_targets(db: &Alchemical) -> Result<Vec<MigrationTarget>> {
    let naming = db.naming_convention()?.clone();
    collect_targets(db.registry().metadatas(), &naming, |bind| {
        db.get_engine(bind.clone())
    })
}

pub fn migration_targets_async(db: &AsyncAlchemical) -> Result<Vec<MigrationTarget>> {
    let naming = db.naming_convention()?.clone();
    collect_targets(db.registry().metadatas(), &naming, |bind| {
        db.get_engine(bind.clone())
    })
}

/// Steps that create the target's registered tables.
pub fn create_schema_steps(target: &MigrationTarget) -> Result<Vec<String>> {
    Ok(SchemaRenderer::new(target.dialect(), &target.naming).create_script(target.metadata.tables()))
}

/// Run `steps` for every bind. Returns the binds that were migrated.
pub fn run_migrations<F>(db: &Alchemical, mut steps: F) -> Result<Vec<BindKey>>
where
    F: FnMut(&MigrationTarget) -> Result<Vec<String>>,
{
    let mut migrated = Vec::new();
    for target in migration_targets(db)? {
        info!(bind = %target.bind, "Migrating database");
        let statements = steps(&target)?;
        db.blocking().block_on(run_script(&target.engine, &statements))??;
        migrated.push(target.bind);
    }
    Ok(migrated)
}

pub async fn run_migrations_async<F>(db: &AsyncAlchemical, mut steps: F) -> Result<Vec<BindKey>>
where
    F: FnMut(&MigrationTarget) -> Result<Vec<String>>,
{
    let mut migrated = Vec::new();
    for target in migration_targets_async(db)? {
        info!(bind = %target.bind, "Migrating database");
        let statements = steps(&target)?;
        run_script(&target.engine, &statements).await?;
        migrated.push(target.bind);
    }
    Ok(migrated)
}

/// Render `steps` into one script per bind.
pub fn render_offline<F>(db: &Alchemical, mut steps: F) -> Result<Vec<OfflineScript>>
where
    F: FnMut(&MigrationTarget) -> Result<Vec<String>>,
{
    migration_targets(db)?
        .into_iter()
        .map(|target| {
            let sql = steps(&target)?
                .iter()
                .map(|statement| format!("{};\n", statement))
                .collect::<String>();
            info!(bind = %target.bind, file = %target.file_name(), "Rendered offline script");
            Ok(OfflineScript {
                file_name: target.file_name(),
                bind: target.bind,
                sql,
            })
        })
        .collect()
}
