//! Blocking access to async drivers.
//!
//! The blocking facade drives sqlx through a [`Blocking`] executor. On its
//! own it owns a private current-thread runtime. As the shadow of an async
//! instance it holds the surrounding runtime's [`Handle`] instead, and is
//! only ever used from tokio's blocking pool (see [`run_blocking`]), where
//! re-entering the runtime with `Handle::block_on` is allowed.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::{Builder, EnterGuard, Handle, Runtime};

#[derive(Debug)]
pub(crate) enum Blocking {
    /// Private runtime, built on first use.
    Owned(OnceLock<Runtime>),
    /// Runtime of an async caller.
    Handle(Handle),
}

impl Blocking {
    pub(crate) fn owned() -> Self {
        Self::Owned(OnceLock::new())
    }

    pub(crate) fn handle(handle: Handle) -> Self {
        Self::Handle(handle)
    }

    fn runtime(cell: &OnceLock<Runtime>) -> Result<&Runtime> {
        if let Some(runtime) = cell.get() {
            return Ok(runtime);
        }
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::bridge(format!("failed to start runtime: {}", e)))?;
        // A concurrent builder may have won; its runtime is used and ours dropped.
        let _ = cell.set(runtime);
        cell.get()
            .ok_or_else(|| Error::bridge("runtime was not initialized"))
    }

    /// Enter the runtime context without blocking, so pools can be created.
    pub(crate) fn enter(&self) -> Result<EnterGuard<'_>> {
        match self {
            Self::Owned(cell) => Ok(Self::runtime(cell)?.enter()),
            Self::Handle(handle) => Ok(handle.enter()),
        }
    }

    /// Run a future to completion on the calling thread.
    ///
    /// Panics (from tokio) when called from inside an async context, which
    /// is a misuse of the blocking facade.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match self {
            Self::Owned(cell) => Ok(Self::runtime(cell)?.block_on(future)),
            Self::Handle(handle) => Ok(handle.block_on(future)),
        }
    }
}

/// Run blocking code on tokio's blocking pool and await its result.
///
/// A panic or cancellation of the task surfaces as [`Error::Bridge`].
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::bridge(format!("blocking task failed: {}", e)))?
}
