//! I/O context configuration
//!
//! Library defaults with environment overrides, builder style:
//!
//! ```rust,ignore
//! use iochan_executor::config::{BackendKind, ContextConfig};
//!
//! let config = ContextConfig::from_env()
//!     .workers(4)
//!     .backend(BackendKind::Reactor);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use iochan_core::constants::{DEFAULT_WORKER_CAP, MAX_WORKERS};
use iochan_core::env::{env_get, env_get_str};
use iochan_core::error::{IoError, Result};

/// Which `IoBackend` strategy a context runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// I/O and completion on the same pool worker.
    Pool,
    /// I/O on a dedicated reactor thread, completion on the pool.
    Reactor,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Pool => "pool",
            BackendKind::Reactor => "reactor",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pool" => Ok(BackendKind::Pool),
            "reactor" => Ok(BackendKind::Reactor),
            _ => Err(IoError::InvalidConfig("backend must be `pool` or `reactor`")),
        }
    }
}

pub mod defaults {
    use super::BackendKind;

    pub const THREAD_NAME: &str = "iochan-worker";
    pub const REACTOR_IDLE_US: u64 = 1000;

    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            pub const BACKEND: BackendKind = BackendKind::Reactor;
        } else {
            pub const BACKEND: BackendKind = BackendKind::Pool;
        }
    }

    /// min(available_parallelism, DEFAULT_WORKER_CAP), at least 1.
    pub fn workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(super::DEFAULT_WORKER_CAP)
            .max(1)
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Pool worker threads
    pub workers: usize,
    /// Async I/O strategy
    pub backend: BackendKind,
    /// Worker thread name prefix
    pub thread_name: String,
    /// Reactor park timeout while its queue is empty
    pub reactor_idle: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ContextConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `IOCHAN_WORKERS` - Pool worker threads
    /// - `IOCHAN_BACKEND` - `pool` or `reactor`
    /// - `IOCHAN_THREAD_NAME` - Worker thread name prefix
    /// - `IOCHAN_REACTOR_IDLE_US` - Reactor park timeout in microseconds
    pub fn from_env() -> Self {
        Self {
            workers: env_get("IOCHAN_WORKERS", defaults::workers()),
            backend: env_get("IOCHAN_BACKEND", defaults::BACKEND),
            thread_name: env_get_str("IOCHAN_THREAD_NAME", defaults::THREAD_NAME),
            reactor_idle: Duration::from_micros(env_get(
                "IOCHAN_REACTOR_IDLE_US",
                defaults::REACTOR_IDLE_US,
            )),
        }
    }

    /// Library defaults only, ignoring the environment.
    pub fn new() -> Self {
        Self {
            workers: defaults::workers(),
            backend: defaults::BACKEND,
            thread_name: defaults::THREAD_NAME.to_string(),
            reactor_idle: Duration::from_micros(defaults::REACTOR_IDLE_US),
        }
    }

    // Builder methods

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn reactor_idle(mut self, d: Duration) -> Self {
        self.reactor_idle = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(IoError::InvalidConfig("workers must be at least 1"));
        }
        if self.workers > MAX_WORKERS {
            return Err(IoError::InvalidConfig("workers exceeds MAX_WORKERS"));
        }
        if self.thread_name.is_empty() {
            return Err(IoError::InvalidConfig("thread_name must not be empty"));
        }
        if self.reactor_idle.is_zero() {
            return Err(IoError::InvalidConfig("reactor_idle must be positive"));
        }
        Ok(())
    }
}
