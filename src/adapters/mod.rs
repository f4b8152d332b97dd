//! Integration helpers for applications and schema migrations.
//!
//! - [`request`]: initialize an instance from application settings and
//!   manage one session per request.
//! - [`migrate`]: run migration steps bind by bind, or render them offline.

pub mod migrate;
pub mod request;

pub use migrate::{MigrationTarget, OfflineScript};
pub use request::{AppSettings, AsyncRequestScope, RequestScope};
