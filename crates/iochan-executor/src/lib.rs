//! # iochan-executor: The I/O Context
//!
//! Ties the pieces together: an `IoContext` owns a `ThreadPool` and an
//! `IoBackend`, binds channels to `CompletionRoutine`s, and provides the
//! quiescence barrier.
//!
//! ```rust,ignore
//! use iochan_core::channel::share;
//! use iochan_executor::{routine_fn, IoContext};
//! use iochan_module::MemoryReader;
//!
//! let ctx = IoContext::create()?;
//! let ch = ctx.client_connect_async(
//!     share(MemoryReader::new(b"hello".to_vec())),
//!     routine_fn(|_, c| println!("read {:?}", c.data()), |_, _| {}),
//! )?;
//! ch.submit_read(Vec::new(), 4096, None)?;
//! ctx.await_asynchronous()?;
//! ```
//!
//! The context is generic over the backend strategy; `ContextConfig`
//! picks one. Routines never run on the thread that submitted.

pub mod config;
pub mod routine;
pub mod async_channel;
pub mod context;

pub use config::{BackendKind, ContextConfig};
pub use routine::{routine_fn, CompletionRoutine, FnRoutine};
pub use async_channel::AsyncChannel;
pub use context::IoContext;
