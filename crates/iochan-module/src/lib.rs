//! # iochan-module: Default implementations
//!
//! This crate provides the default implementation for every iochan trait,
//! plus the concrete channel variants.
//!
//! ## Default stack
//!
//! | Trait / concept | Default Impl     | Alternative               |
//! |-----------------|------------------|---------------------------|
//! | TaskExecutor    | ThreadPool       | -                         |
//! | IoBackend       | PoolBackend      | ReactorBackend            |
//! | Channel         | MemoryReader, MemoryWriter, FileChannel, SocketChannel, ConsoleChannel |
//!
//! `TaskQueue<T>` is the blocking FIFO the pool drains; it is public so
//! other subsystems can build their own consumers on it.

pub mod task_queue;
pub mod thread_pool;
pub mod handoff;
pub mod pool_backend;
pub mod reactor_backend;
pub mod memory;
pub mod stream;
pub mod console;

pub use task_queue::TaskQueue;
pub use thread_pool::ThreadPool;
pub use pool_backend::PoolBackend;
pub use reactor_backend::ReactorBackend;
pub use memory::{MemoryReader, MemoryWriter};
pub use stream::{FileChannel, SocketChannel};
pub use console::ConsoleChannel;
