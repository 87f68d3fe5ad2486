//! Runtime construction helpers.
//!
//! Host applications that do not already own a Tokio runtime can build one
//! here without depending on Tokio themselves.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Builds a multi-threaded runtime with all drivers (time, IO) enabled.
pub fn build_runtime(worker_threads: Option<usize>) -> std::io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads.max(1));
    }
    builder.enable_all().build()
}

/// Runs the provided future to completion on a lightweight current-thread runtime.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Returns a handle to the runtime driving the current task, if any.
pub fn current_handle() -> Option<Handle> {
    Handle::try_current().ok()
}
