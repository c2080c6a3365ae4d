//! # iochan-core: Trait definitions for iochan
//!
//! This crate defines the boundaries of the channel/executor engine.
//! Each trait models one capability dimension; default implementations
//! live in `iochan-module`, and the I/O context that ties them together
//! lives in `iochan-executor`.
//!
//! ## Modules
//!
//! - `shared` - Atomically reference-counted ownership handle
//! - `channel` - Byte channel capability trait and `std::io` adapter
//! - `operation` - Operation descriptors, completions and their state machine
//! - `executor` - Task type and the `TaskExecutor` boundary
//! - `io_backend` - Asynchronous I/O strategy boundary
//! - `error` - Error taxonomy
//! - `env` - Environment variable utilities
//!
//! Nothing in this crate spawns threads.

pub mod shared;
pub mod channel;
pub mod operation;
pub mod executor;
pub mod io_backend;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use shared::Shared;
pub use channel::{share, Capabilities, Channel, ChannelIo, ChannelRef};
pub use operation::{ChannelId, CompleteFn, Completion, Direction, IoJob, OpId, OpState, Operation, Phase};
pub use executor::{spawn, ExecutorRef, Task, TaskExecutor};
pub use io_backend::{BackendRef, IoBackend, SubmitError};
pub use error::{IoError, Result};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Workspace-wide limits.
pub mod constants {
    /// Maximum worker threads in one pool.
    pub const MAX_WORKERS: usize = 64;

    /// Default worker cap when sizing from the CPU count.
    pub const DEFAULT_WORKER_CAP: usize = 8;
}
