//! Request-scoped sessions for web applications.
//!
//! An application builds [`AppSettings`] (usually from the environment),
//! calls [`init_app`] once, then wraps every request in a [`RequestScope`].
//! The scope opens a session only if the request asks for one, and
//! `teardown` finishes it when the request ends:
//!
//! ```ignore
//! let mut scope = RequestScope::new(&db, &settings);
//! let result = handle(&mut scope);
//! scope.teardown(result.as_ref().err())?;
//! ```

use crate::aio::AsyncAlchemical;
use crate::alchemical::Alchemical;
use crate::config::{BindConfig, EngineOptions, Options};
use crate::error::{Error, Result};
use crate::session::{AsyncSession, Session};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DATABASE_URL_KEY: &str = "ALCHEMICAL_DATABASE_URL";
pub const BINDS_KEY: &str = "ALCHEMICAL_BINDS";
pub const AUTOCOMMIT_KEY: &str = "ALCHEMICAL_AUTOCOMMIT";

/// Database settings of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub database_url: Option<String>,
    /// Named binds in configuration order.
    #[serde(default)]
    pub binds: Vec<(String, String)>,
    #[serde(default)]
    pub engine_options: Option<EngineOptions>,
    /// Commit the request's session when the request ends without error.
    #[serde(default)]
    pub autocommit: bool,
}

impl AppSettings {
    /// Read settings through `lookup`, using the `ALCHEMICAL_*` keys.
    ///
    /// Binds are a comma separated list of `name=url` pairs.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let binds = match lookup(BINDS_KEY) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| BindConfig::parse(s).map(|b| (b.name, b.url)))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::config)?,
            None => Vec::new(),
        };
        let autocommit = lookup(AUTOCOMMIT_KEY)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            database_url: lookup(DATABASE_URL_KEY).filter(|u| !u.trim().is_empty()),
            binds,
            engine_options: None,
            autocommit,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn to_options(&self) -> Options {
        let mut options = Options::new().binds(self.binds.iter().cloned());
        if let Some(url) = &self.database_url {
            options = options.url(url.clone());
        }
        if let Some(engine_options) = &self.engine_options {
            options = options.engine_options(engine_options.clone());
        }
        options
    }
}

/// Initialize a blocking instance from application settings.
pub fn init_app(db: &mut Alchemical, settings: &AppSettings) -> Result<()> {
    db.initialize(settings.to_options())
}

/// Initialize an async instance from application settings.
pub fn init_app_async(db: &mut AsyncAlchemical, settings: &AppSettings) -> Result<()> {
    db.initialize(settings.to_options())
}

/// One request's session, created on first use.
#[derive(Debug)]
pub struct RequestScope<'a> {
    db: &'a Alchemical,
    autocommit: bool,
    session: Option<Session>,
}

impl<'a> RequestScope<'a> {
    pub fn new(db: &'a Alchemical, settings: &AppSettings) -> Self {
        Self {
            db,
            autocommit: settings.autocommit,
            session: None,
        }
    }

    /// The request's session, opened on first call.
    pub fn session(&mut self) -> Result<&mut Session> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.db.session()?,
        };
        Ok(self.session.insert(session))
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// End the request. Commits when autocommit is on and the request
    /// succeeded, then closes the session.
    pub fn teardown(mut self, error: Option<&dyn std::error::Error>) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        if self.autocommit && error.is_none() {
            debug!("Committing request session");
            session.commit()?;
        }
        session.close()
    }
}

/// Async counterpart of [`RequestScope`].
#[derive(Debug)]
pub struct AsyncRequestScope<'a> {
    db: &'a AsyncAlchemical,
    autocommit: bool,
    session: Option<AsyncSession>,
}

impl<'a> AsyncRequestScope<'a> {
    pub fn new(db: &'a AsyncAlchemical, settings: &AppSettings) -> Self {
        Self {
            db,
            autocommit: settings.autocommit,
            session: None,
        }
    }

    pub fn session(&mut self) -> Result<&mut AsyncSession> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.db.session()?,
        };
        Ok(self.session.insert(session))
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub async fn teardown(mut self, error: Option<&(dyn std::error::Error + Send + Sync)>) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        if self.autocommit && error.is_none() {
            debug!("Committing request session");
            session.commit().await?;
        }
        session.close().await
    }
}
