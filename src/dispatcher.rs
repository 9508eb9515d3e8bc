//! Dispatcher -- spreads a job list over the worker fleet
//!
//! Jobs go out in input order, round-robin over the configured endpoints. The
//! round-robin index only advances after a job has been acknowledged, so a job that
//! could not be delivered is not retried elsewhere: it is logged and reported in
//! [`DispatchReport::lost`]. Once every job has been handled, each endpoint gets the
//! shutdown sentinel exactly once, including endpoints that received no jobs.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::{DispatcherConfig, RetryConfig};
use crate::error::{DispatchError, Result};
use crate::protocol::{Message, is_ack, read_reply};
use crate::retry::{Exhausted, with_retry};
use crate::types::{Endpoint, Job};

/// What happened during one dispatch run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs acknowledged per endpoint, indexed like the endpoint list
    pub assigned: Vec<usize>,
    /// Jobs no endpoint acknowledged
    pub lost: Vec<Job>,
    /// Jobs not sent because their destination already existed
    pub skipped: usize,
    /// Jobs never acknowledged because the run was interrupted before or during their send
    pub unsent: usize,
    /// Whether each endpoint acknowledged the shutdown sentinel
    ///
    /// Empty when the run was interrupted and shutdown was not requested.
    pub shutdown_acknowledged: Vec<bool>,
}

impl DispatchReport {
    /// Total jobs acknowledged by any endpoint
    pub fn dispatched(&self) -> usize {
        self.assigned.iter().sum()
    }

    /// True when every job was delivered (or skipped) and every endpoint shut down
    pub fn is_complete(&self) -> bool {
        self.lost.is_empty()
            && self.unsent == 0
            && !self.shutdown_acknowledged.is_empty()
            && self.shutdown_acknowledged.iter().all(|&ok| ok)
    }
}

/// Round-robin job sender
#[derive(Clone, Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher; fails if no endpoints are configured
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Endpoints in assignment order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.config.endpoints
    }

    /// Send every job, then the shutdown sentinel to every endpoint
    pub async fn dispatch<I>(&self, jobs: I) -> DispatchReport
    where
        I: IntoIterator<Item = Job>,
    {
        self.dispatch_until(jobs, &CancellationToken::new(), true)
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but stop sending jobs once `cancel` fires
    ///
    /// After a cancellation the shutdown sentinel is only broadcast when
    /// `shutdown_on_cancel` is set; an uninterrupted run always broadcasts it.
    pub async fn dispatch_until<I>(
        &self,
        jobs: I,
        cancel: &CancellationToken,
        shutdown_on_cancel: bool,
    ) -> DispatchReport
    where
        I: IntoIterator<Item = Job>,
    {
        let endpoints = self.endpoints();
        let mut report = DispatchReport {
            assigned: vec![0; endpoints.len()],
            ..DispatchReport::default()
        };
        let mut index = 0usize;

        for job in jobs {
            if cancel.is_cancelled() {
                report.unsent += 1;
                continue;
            }

            if self.config.skip_existing && job.destination().exists() {
                tracing::info!(path = %job.destination().display(), "Already exists, not dispatching");
                report.skipped += 1;
                continue;
            }

            let slot = index % endpoints.len();
            let endpoint = &endpoints[slot];
            let message = Message::Job(job);

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.send(endpoint, &message) => Some(result),
            };
            let Some(sent) = sent else {
                // The endpoint may or may not have enqueued it; it was never acknowledged
                tracing::warn!(endpoint = %endpoint, name = message.label(), "Send interrupted");
                report.unsent += 1;
                continue;
            };

            match sent {
                Ok(attempts) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        name = message.label(),
                        attempts,
                        "Job acknowledged"
                    );
                    report.assigned[slot] += 1;
                    index += 1;
                }
                Err(Exhausted {
                    attempts,
                    last_error,
                }) => {
                    tracing::error!(
                        endpoint = %endpoint,
                        name = message.label(),
                        attempts,
                        error = %last_error,
                        "Job lost: endpoint never acknowledged it"
                    );
                    if let Message::Job(job) = message {
                        report.lost.push(job);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::warn!(unsent = report.unsent, "Dispatch interrupted");
            if !shutdown_on_cancel {
                return report;
            }
        }

        report.shutdown_acknowledged = self.shutdown_all().await;

        tracing::info!(
            dispatched = report.dispatched(),
            lost = report.lost.len(),
            skipped = report.skipped,
            unsent = report.unsent,
            "Dispatch finished"
        );
        report
    }

    /// Send the shutdown sentinel to every endpoint once
    ///
    /// Returns one acknowledgment flag per endpoint.
    pub async fn shutdown_all(&self) -> Vec<bool> {
        let mut acknowledged = Vec::with_capacity(self.endpoints().len());
        for endpoint in self.endpoints() {
            match self.send(endpoint, &Message::Shutdown).await {
                Ok(_) => {
                    tracing::info!(endpoint = %endpoint, "Shutdown acknowledged");
                    acknowledged.push(true);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempts = e.attempts,
                        error = %e.last_error,
                        "Endpoint did not acknowledge shutdown"
                    );
                    acknowledged.push(false);
                }
            }
        }
        acknowledged
    }

    /// Deliver one message, retrying on a fresh connection up to `send_attempts` times
    ///
    /// Returns the number of attempts used.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        message: &Message,
    ) -> std::result::Result<u32, Exhausted<DispatchError>> {
        let line = match message.encode() {
            Ok(line) => line,
            Err(e) => {
                return Err(Exhausted {
                    attempts: 0,
                    last_error: DispatchError::Io {
                        endpoint: endpoint.to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    },
                });
            }
        };

        // Acknowledgment is near-instant, so resend without waiting
        let retry = RetryConfig::immediate(self.config.send_attempts);
        let line: &[u8] = &line;
        with_retry(&retry, move |_| self.round_trip(endpoint, line))
            .await
            .map(|((), attempts)| attempts)
    }

    /// Connect, write one line, and expect exactly `OK` back
    async fn round_trip(
        &self,
        endpoint: &Endpoint,
        line: &[u8],
    ) -> std::result::Result<(), DispatchError> {
        let address = endpoint.to_string();

        let mut stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(DispatchError::Connect {
                    endpoint: address,
                    source,
                });
            }
            Err(_) => {
                return Err(DispatchError::Timeout {
                    endpoint: address,
                    stage: "connect",
                });
            }
        };

        let exchange = async {
            stream.write_all(line).await?;
            stream.flush().await?;
            read_reply(&mut stream).await
        };

        let reply = match tokio::time::timeout(self.config.ack_timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(source)) => {
                return Err(DispatchError::Io {
                    endpoint: address,
                    source,
                });
            }
            Err(_) => {
                return Err(DispatchError::Timeout {
                    endpoint: address,
                    stage: "acknowledge",
                });
            }
        };

        if is_ack(&reply) {
            Ok(())
        } else {
            Err(DispatchError::UnexpectedReply {
                endpoint: address,
                reply: String::from_utf8_lossy(&reply).into_owned(),
            })
        }
    }
}
