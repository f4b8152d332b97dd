//! Alchemical command line entry point.
//!
//! Manages the schema of every configured database from one invocation:
//!
//! ```text
//! alchemical --url sqlite:///app.db --bind users=sqlite:///users.db \
//!     --schema entities.json create-all
//! ```

use alchemical::adapters::migrate::{create_schema_steps, render_offline};
use alchemical::config::{Command, Config};
use alchemical::db::engine::mask_url;
use alchemical::{Alchemical, BindKey};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn list_binds(db: &Alchemical, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut binds = Vec::new();
    if config.url.is_some() {
        binds.push(BindKey::Default);
    }
    binds.extend(db.bind_names().into_iter().map(BindKey::Named));

    for bind in binds {
        let Some(engine) = db.get_engine(bind.clone())? else {
            continue;
        };
        println!("{} ({}) {}", bind, engine.dialect(), mask_url(engine.url()));
        let declared: Vec<String> = db
            .metadata(bind.clone())
            .map(|m| m.tables().iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();
        for table in db.existing_tables(bind)?.unwrap_or_default() {
            let marker = if declared.contains(&table) { "*" } else { " " };
            println!("  {} {}", marker, table);
        }
    }
    Ok(())
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = Alchemical::with_options(config.to_options()?)?;
    for def in config.load_schema()? {
        db.register_entity(def)?;
    }

    match &config.command {
        Command::CreateAll => db.create_all()?,
        Command::DropAll => db.drop_all()?,
        Command::Binds => list_binds(&db, config)?,
        Command::Sql { output_dir } => {
            let scripts = render_offline(&db, create_schema_steps)?;
            match output_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    for script in &scripts {
                        let path = dir.join(&script.file_name);
                        std::fs::write(&path, &script.sql)?;
                        info!(bind = %script.bind, path = %path.display(), "Wrote script");
                    }
                }
                None => {
                    for script in &scripts {
                        println!("-- {}", script.file_name);
                        print!("{}", script.sql);
                    }
                }
            }
        }
    }

    db.close_all()?;
    Ok(())
}

fn main() {
    let config = Config::parse_args();
    init_tracing(&config);

    info!(
        command = ?config.command,
        "Starting alchemical v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(&config) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
