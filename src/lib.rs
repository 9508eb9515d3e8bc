//! # cluster-dl
//!
//! Distribute a batch of file downloads across a fleet of worker processes.
//!
//! ## Design Philosophy
//!
//! cluster-dl is designed to be:
//! - **Crash-safe** - A file only appears under its final name once it is complete
//! - **Idempotent** - Re-running a batch skips everything already on disk
//! - **Simple on the wire** - One JSON line per TCP connection, acknowledged with `OK`
//! - **Static** - Endpoints, pool sizes and retry budgets are plain configuration
//!
//! ## Pieces
//!
//! - [`Dispatcher`] holds the job list and the ordered worker endpoints, assigns jobs
//!   round-robin, and finally tells every worker to shut down.
//! - [`WorkerService`] accepts jobs over TCP and runs them on a fixed-size pool.
//! - [`HttpFetcher`] downloads one URL to one path with bounded retries.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cluster_dl::{Dispatcher, DispatcherConfig, Endpoint, Job};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(DispatcherConfig {
//!         endpoints: vec![
//!             Endpoint::new("192.168.1.10", 42069),
//!             Endpoint::new("192.168.1.11", 42069),
//!         ],
//!         ..Default::default()
//!     })?;
//!
//!     let jobs = vec![Job::new(
//!         "song.mid",
//!         "/srv/midis",
//!         "https://www.vgmusic.com/music/console/nintendo/nes/song.mid",
//!     )];
//!
//!     let report = dispatcher.dispatch(jobs).await;
//!     println!("dispatched {}, lost {}", report.dispatched(), report.lost.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Job producer interface and manifests
pub mod collector;
/// Configuration types
pub mod config;
/// Round-robin job dispatch
pub mod dispatcher;
/// Error types
pub mod error;
/// Resilient single-file fetcher
pub mod fetcher;
/// Logging setup
pub mod logging;
/// Fixed-size fetch pool
pub mod pool;
/// Dispatcher ↔ worker wire protocol
pub mod protocol;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Worker Service
pub mod worker;

// Re-export commonly used types
pub use collector::{JobSink, ManifestSink, read_manifest, write_manifest};
pub use config::{Config, DispatcherConfig, FetchConfig, RetryConfig, WorkerConfig};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{DispatchError, Error, FailureKind, FetchError, ProtocolError, Result};
pub use fetcher::{FetchOptions, HttpFetcher, JobRunner};
pub use protocol::Message;
pub use types::{Endpoint, Event, FetchOutcome, FetchStatus, Job, PoolSummary};
pub use worker::WorkerService;

/// Which OS signal asked the process to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT or Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Conventional signal name
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wait until the process is asked to stop and report which signal did it
///
/// Unix listens for SIGINT and SIGTERM; other targets only for Ctrl+C. A source
/// that cannot be registered is logged and then never fires, so the remaining one
/// still works. If none can be registered this never resolves.
///
/// # Example
///
/// ```no_run
/// use cluster_dl::{WorkerConfig, WorkerService, shutdown_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = WorkerService::bind_http(WorkerConfig::default()).await?;
///
///     let token = service.shutdown_token();
///     tokio::spawn(async move {
///         let signal = shutdown_signal().await;
///         eprintln!("{signal} received, draining");
///         token.cancel();
///     });
///
///     let summary = service.serve().await?;
///     println!("{} downloaded", summary.downloaded);
///     Ok(())
/// }
/// ```
pub async fn shutdown_signal() -> ShutdownSignal {
    tokio::select! {
        () = interrupt() => ShutdownSignal::Interrupt,
        () = terminate() => ShutdownSignal::Terminate,
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            // None means the driver is gone; treat it as never firing
            if sigterm.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
