//! Task spawning and structured fan-out.
//!
//! `JoinSet` is the building block for racing several futures and
//! aborting the losers: dropping the set (or calling `abort_all`) cancels
//! every task still running.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task::{self, JoinSet};
//!
//! async fn example() {
//!     let mut set = JoinSet::new();
//!     set.spawn(async { 1 });
//!     set.spawn(async { 2 });
//!     while let Some(result) = set.join_next().await {
//!         let _ = result.unwrap();
//!     }
//!     task::yield_now().await;
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle, JoinSet};

/// Spawns a new asynchronous task on the Tokio runtime.
///
/// The spawned task may run on a different worker thread, so both the
/// future and its output must be `Send + 'static`.
///
/// # Examples
///
/// ```rust
/// use core_async::task::spawn;
///
/// # async fn example() {
/// let handle = spawn(async { 42 });
/// assert_eq!(handle.await.unwrap(), 42);
/// # }
/// ```
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}
