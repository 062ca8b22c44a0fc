//! frameloop
//!
//! A thread-affine cooperative operation executor. Work submitted from any
//! thread runs on one owner thread, in FIFO order, and the owner thread can
//! wait on its own queued work without blocking by nesting pump loops.
//!
//! # Example
//!
//! ```no_run
//! use frameloop::{Executor, Result};
//!
//! fn main() -> Result<()> {
//!     let executor = Executor::new();
//!     executor.run_async()?.result()?;
//!
//!     let answer = executor.invoke(|| Ok(6 * 7))?;
//!     assert_eq!(answer, 42);
//!
//!     executor.shutdown();
//!     executor.join()?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/frameloop")]
#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::executor::{
    AmbientContext, CompletionSource, Executor, ExecutorDispatcher, ExecutorError, ExecutorFrame, ExecutorResult,
    Frame, Operation, OperationCanceled, OperationHandle, OperationId, OperationStatus, SharedError, Timeout,
};
pub use util::config::ExecutorConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "frameloop";
