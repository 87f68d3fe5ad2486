//! Async runtime facade for the audiobook platform core.
//!
//! Every core and provider crate goes through this crate for spawning,
//! timers, locks and cancellation instead of depending on Tokio directly.
//! Keeping the seam in one place lets the playback core swap executors
//! (or pause time in tests) without touching component code.
//!
//! # Modules
//!
//! - `task`: Task spawning, `JoinSet` for structured fan-out
//! - `time`: Sleep, timeout, intervals and a pausable `Instant`
//! - `sync`: Async locks, channels, semaphores and `CancellationToken`
//! - `runtime`: Runtime construction helpers
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use sync::CancellationToken;
pub use tokio::select;
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
