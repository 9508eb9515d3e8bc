//! Worker Service -- accepts jobs over TCP and runs them on a fixed-size pool.
//!
//! Connections are handled one at a time: read one message, act on it, reply `OK`,
//! close. A job is acknowledged as soon as it is enqueued, never when it completes.
//! The shutdown sentinel (or cancellation of [`WorkerService::shutdown_token`]) ends
//! the accept loop, after which the service waits for every submitted fetch to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::fetcher::{HttpFetcher, JobRunner};
use crate::pool::FetchPool;
use crate::protocol::{Message, read_message, write_ack};
use crate::types::{Event, Job, PoolSummary};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion) cannot spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Whether the accept loop keeps going after a connection
#[derive(Debug, PartialEq, Eq)]
enum Control {
    Continue,
    Shutdown,
}

/// Long-running job receiver for one endpoint
pub struct WorkerService {
    listener: TcpListener,
    config: WorkerConfig,
    runner: Arc<dyn JobRunner>,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl WorkerService {
    /// Bind the listening socket with a custom job runner
    pub async fn bind(config: WorkerConfig, runner: Arc<dyn JobRunner>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind {}: {}", config.bind_address, e),
            ))
        })?;

        // Buffer large enough that a slow subscriber only loses progress events
        let (event_tx, _rx) = broadcast::channel(1024);

        Ok(Self {
            listener,
            config,
            runner,
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the listening socket with the production HTTP fetcher
    pub async fn bind_http(config: WorkerConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch.clone())?;
        Self::bind(config, Arc::new(fetcher)).await
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the accept loop when cancelled (used for process signals)
    ///
    /// Already-submitted fetches still run to completion.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown sentinel or cancellation, then drain the pool
    pub async fn serve(self) -> Result<PoolSummary> {
        let address = self.local_addr()?;
        let mut pool = FetchPool::new(
            self.config.pool_size,
            Arc::clone(&self.runner),
            self.event_tx.clone(),
        );

        tracing::info!(
            address = %address,
            pool_size = pool.size(),
            "Worker service listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested locally, no longer accepting jobs");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if self.handle_connection(stream, peer, &mut pool).await == Control::Shutdown {
                break;
            }
        }

        // Stop accepting before waiting on the pool
        drop(self.listener);

        let summary = pool.drain().await;
        tracing::info!(
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            exhausted = summary.exhausted,
            panicked = summary.panicked,
            "Worker service finished"
        );
        Ok(summary)
    }

    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        pool: &mut FetchPool,
    ) -> Control {
        let message = match self.receive(&mut stream).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Dropping connection with malformed message");
                return Control::Continue;
            }
        };

        match message {
            Message::Shutdown => {
                tracing::info!(peer = %peer, "Shutdown sentinel received");
                let _ = self.event_tx.send(Event::ShutdownReceived);
                self.acknowledge(&mut stream, peer).await;
                Control::Shutdown
            }
            Message::Job(job) => {
                self.accept_job(job, pool).await;
                self.acknowledge(&mut stream, peer).await;
                Control::Continue
            }
        }
    }

    async fn receive(&self, stream: &mut TcpStream) -> std::result::Result<Message, ProtocolError> {
        let raw = tokio::time::timeout(
            self.config.read_timeout,
            read_message(&mut *stream, self.config.max_message_bytes),
        )
        .await
        .map_err(|_| ProtocolError::ReadTimeout)??;
        Message::decode(&raw)
    }

    async fn accept_job(&self, job: Job, pool: &mut FetchPool) {
        // The fetcher creates the directory again per attempt, so a failure here
        // is counted against that job's attempts rather than refused on the wire
        if let Err(e) = tokio::fs::create_dir_all(&job.directory).await {
            tracing::warn!(
                directory = %job.directory.display(),
                error = %e,
                "Could not create target directory"
            );
        }

        tracing::info!(name = %job.name, url = %job.url, "Accepted job");
        let _ = self.event_tx.send(Event::JobAccepted { job: job.clone() });
        pool.submit(job);
    }

    async fn acknowledge(&self, stream: &mut TcpStream, peer: SocketAddr) {
        match tokio::time::timeout(self.config.read_timeout, write_ack(stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(peer = %peer, error = %e, "Failed to send acknowledgment"),
            Err(_) => tracing::warn!(peer = %peer, "Timed out sending acknowledgment"),
        }
    }
}

/// Bind `config.bind_address` and serve with the HTTP fetcher until shutdown
pub async fn serve(config: WorkerConfig) -> Result<PoolSummary> {
    WorkerService::bind_http(config).await?.serve().await
}
