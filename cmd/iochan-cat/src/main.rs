//! iochan-cat: copy a file (or stdin) to stdout or a TCP peer through an
//! I/O context.
//!
//! Usage:
//!   iochan-cat [OPTIONS] [FILE]
//!
//! Options:
//!   --connect HOST:PORT   send to a TCP peer instead of stdout
//!   --backend pool|reactor
//!   --workers N
//!   --chunk BYTES         read size per operation (default 65536)
//!
//! Every read and write is an async operation: each read completion
//! submits a write of the same buffer, and each finished write submits the
//! next read. Logging goes to stderr, filtered by `IOCHAN_LOG` (default
//! `warn`).

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use iochan_core::channel::{share, ChannelRef};
use iochan_core::error::{IoError, Result};
use iochan_core::operation::Completion;
use iochan_executor::{routine_fn, AsyncChannel, BackendKind, ContextConfig, IoContext};
use iochan_module::{ConsoleChannel, FileChannel};
use parking_lot::Mutex;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CHUNK: usize = 64 * 1024;

struct Options {
    file: Option<String>,
    connect: Option<String>,
    backend: Option<BackendKind>,
    workers: Option<usize>,
    chunk: usize,
}

fn usage() -> &'static str {
    "usage: iochan-cat [--connect HOST:PORT] [--backend pool|reactor] [--workers N] [--chunk BYTES] [FILE]"
}

fn parse_args() -> std::result::Result<Options, String> {
    let mut opts = Options {
        file: None,
        connect: None,
        backend: None,
        workers: None,
        chunk: DEFAULT_CHUNK,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| format!("{} needs a value", name));
        match arg.as_str() {
            "--connect" => opts.connect = Some(value("--connect")?),
            "--backend" => {
                let v = value("--backend")?;
                opts.backend = Some(v.parse().map_err(|e: IoError| e.to_string())?);
            }
            "--workers" => {
                let v = value("--workers")?;
                opts.workers = Some(v.parse().map_err(|_| format!("bad worker count `{}`", v))?);
            }
            "--chunk" => {
                let v = value("--chunk")?;
                opts.chunk = match v.parse() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("bad chunk size `{}`", v)),
                };
            }
            "-h" | "--help" => return Err(usage().to_string()),
            s if s.starts_with("--") => return Err(format!("unknown option `{}`\n{}", s, usage())),
            _ if opts.file.is_none() => opts.file = Some(arg),
            _ => return Err(usage().to_string()),
        }
    }
    Ok(opts)
}

/// Read/write chain between one source and one sink.
struct Pump {
    source: Mutex<Option<AsyncChannel>>,
    sink: Mutex<Option<AsyncChannel>>,
    chunk: usize,
    copied: AtomicU64,
}

impl Pump {
    fn read_next(&self) {
        let source = self.source.lock().clone();
        if let Some(source) = source {
            if let Err(e) = source.submit_read(Vec::new(), self.chunk, None) {
                error!(error = %e, "read submission failed");
            }
        }
    }

    fn on_read(&self, completion: Completion) {
        match completion.result {
            Ok(n) => {
                let sink = self.sink.lock().clone();
                if let Some(sink) = sink {
                    if let Err(e) = sink.submit_write(completion.buffer, n, None) {
                        error!(error = %e, "write submission failed");
                    }
                }
            }
            Err(IoError::EndOfStream) => debug!("source drained"),
            // Recorded by the context; surfaces from await_asynchronous.
            Err(_) => {}
        }
    }

    fn on_written(&self, sink: &AsyncChannel, completion: Completion) {
        let Ok(n) = completion.result else {
            return;
        };
        self.copied.fetch_add(n as u64, Ordering::Relaxed);
        if n < completion.buffer.len() {
            let rest = completion.buffer[n..].to_vec();
            let len = rest.len();
            if let Err(e) = sink.submit_write(rest, len, None) {
                error!(error = %e, "write submission failed");
            }
        } else {
            self.read_next();
        }
    }

    /// Drop the channel handles so the routines stop referencing them.
    fn clear(&self) {
        self.source.lock().take();
        self.sink.lock().take();
    }
}

fn run(opts: Options) -> Result<u64> {
    let mut config = ContextConfig::from_env();
    if let Some(kind) = opts.backend {
        config = config.backend(kind);
    }
    if let Some(n) = opts.workers {
        config = config.workers(n);
    }
    let ctx = IoContext::new(config)?;

    let source: ChannelRef = match &opts.file {
        Some(path) => share(FileChannel::open_read(path)?),
        None => share(ConsoleChannel::stdin()),
    };
    let sink: ChannelRef = match &opts.connect {
        Some(addr) => ctx.client_connect_blocking(addr.as_str())?,
        None => share(ConsoleChannel::stdout()),
    };

    let pump = Arc::new(Pump {
        source: Mutex::new(None),
        sink: Mutex::new(None),
        chunk: opts.chunk,
        copied: AtomicU64::new(0),
    });

    let reader = pump.clone();
    let src = ctx.client_connect_async(
        source,
        routine_fn(move |_, c| reader.on_read(c), |_, _| {}),
    )?;
    let writer = pump.clone();
    let dst = ctx.client_connect_async(
        sink.clone(),
        routine_fn(|_, _| {}, move |ch, c| writer.on_written(ch, c)),
    )?;
    *pump.source.lock() = Some(src);
    *pump.sink.lock() = Some(dst);

    pump.read_next();
    let outcome = ctx.await_asynchronous();
    pump.clear();
    ctx.shutdown();
    outcome?;

    sink.flush()?;
    if opts.connect.is_some() {
        sink.close()?;
    }
    Ok(pump.copied.load(Ordering::Relaxed))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("IOCHAN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = match parse_args() {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    match run(opts) {
        Ok(bytes) => {
            info!(bytes, "copy finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "copy failed");
            eprintln!("iochan-cat: {}", e);
            ExitCode::FAILURE
        }
    }
}
