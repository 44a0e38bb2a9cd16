//! Shared IO runtime
//!
//! Remote storage clients keep pooled connections alive in background tasks
//! on the runtime that drives them. Those tasks must outlive whatever runtime
//! a caller happens to be on, so network clients are built and driven here,
//! on one process-wide runtime that is never shut down. The blocking API runs
//! on it as well.

use std::future::Future;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{OssfsError, Result};

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// The IO runtime, built on first use
pub(crate) fn io_runtime() -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        Builder::new_multi_thread()
            .thread_name("ossfs-io")
            .enable_all()
            .build()
            .map_err(OssfsError::Io)
    })
}

/// Handle to the IO runtime
pub(crate) fn io_handle() -> Result<Handle> {
    Ok(io_runtime()?.handle().clone())
}

/// Run `future` as a task on `handle` and wait for it from any context
pub(crate) async fn drive<F>(handle: &Handle, future: F) -> Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle
        .spawn(future)
        .await
        .map_err(|e| OssfsError::Backend(format!("IO task failed: {}", e)))
}
