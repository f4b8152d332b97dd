//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use alchemical::db::engine::SqlxEngineFactory;
use alchemical::{
    Alchemical, BindKey, Column, Engine, EngineFactory, EngineOptions, Entity, EntityDef, Model,
    Options, Result, Row, Value, text,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// URL of an SQLite file inside `dir`.
pub fn sqlite_url(dir: &Path, name: &str) -> String {
    format!("sqlite:///{}", dir.join(name).display())
}

/// Count rows in `table` through a separate instance, so the check does not
/// share pools or sessions with the instance under test.
pub fn count_rows(url: &str, table: &str) -> i64 {
    let db = Alchemical::with_options(Options::new().url(url)).unwrap();
    let mut session = db.session().unwrap();
    let count: Option<i64> = session
        .scalar(text(format!("SELECT COUNT(*) FROM {}", table)))
        .unwrap();
    session.close().unwrap();
    count.unwrap_or(0)
}

/// Tables physically present in the database at `url`.
pub fn physical_tables(url: &str) -> Vec<String> {
    let db = Alchemical::with_options(Options::new().url(url)).unwrap();
    db.existing_tables(BindKey::Default).unwrap().unwrap()
}

/// Lives on the default bind.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Option<i64>,
    pub body: String,
}

impl Note {
    pub fn new(body: &str) -> Self {
        Self {
            id: None,
            body: body.to_string(),
        }
    }
}

impl Entity for Note {
    fn definition() -> EntityDef {
        EntityDef::of::<Note>()
            .column(Column::integer("id").primary_key())
            .column(Column::text("body").not_null())
    }
}

impl Model for Note {
    fn to_values(&self) -> Vec<(String, Value)> {
        let mut values = vec![("body".to_string(), Value::from(&self.body))];
        if let Some(id) = self.id {
            values.push(("id".to_string(), Value::from(id)));
        }
        values
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            body: row.get("body")?,
        })
    }
}

macro_rules! bound_user {
    ($name:ident, $bind:literal) => {
        #[doc = concat!("Lives on bind `", $bind, "`.")]
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub id: Option<i64>,
            pub name: String,
        }

        impl $name {
            pub fn new(name: &str) -> Self {
                Self {
                    id: None,
                    name: name.to_string(),
                }
            }
        }

        impl Entity for $name {
            fn definition() -> EntityDef {
                EntityDef::of::<$name>()
                    .bind($bind)
                    .column(Column::integer("id").primary_key())
                    .column(Column::string("name", 128).not_null())
            }
        }

        impl Model for $name {
            fn to_values(&self) -> Vec<(String, Value)> {
                let mut values = vec![("name".to_string(), Value::from(&self.name))];
                if let Some(id) = self.id {
                    values.push(("id".to_string(), Value::from(id)));
                }
                values
            }

            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self {
                    id: row.get("id")?,
                    name: row.get("name")?,
                })
            }
        }
    };
}

bound_user!(User1, "one");
bound_user!(User2, "two");

/// Engine factory that counts how often each bind's engine is built.
#[derive(Debug, Default)]
pub struct CountingFactory {
    created: Mutex<HashMap<BindKey, usize>>,
}

impl CountingFactory {
    pub fn created(&self, bind: &BindKey) -> usize {
        self.created.lock().unwrap().get(bind).copied().unwrap_or(0)
    }
}

impl EngineFactory for CountingFactory {
    fn create_engine(&self, bind: &BindKey, url: &str, options: &EngineOptions) -> Result<Engine> {
        *self.created.lock().unwrap().entry(bind.clone()).or_default() += 1;
        // Widen the window for concurrent first calls.
        std::thread::sleep(Duration::from_millis(20));
        SqlxEngineFactory.create_engine(bind, url, options)
    }
}
