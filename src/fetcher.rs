//! Resilient Fetcher -- idempotent, crash-safe download of one URL to one path.
//!
//! A fetch goes through these steps:
//! 1. If the destination exists and renaming is off, skip (no network call).
//! 2. If it exists and renaming is on, pick the first free `name[N].ext`.
//! 3. Up to `max_attempts` times: GET the URL, stream a 200 body into a random
//!    sibling `*.part` file, fsync it, and rename it onto the destination.
//!
//! The rename is the only commit point. An interrupted transfer can leave a stray
//! `.part` file behind, but never a truncated file under the destination name.
//! Failures are folded into [`FetchOutcome::Exhausted`]; a fetch never returns an
//! error or panics into the pool slot that runs it.

use async_trait::async_trait;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{Error, FailureKind, FetchError, Result};
use crate::retry::{Exhausted, with_retry};
use crate::types::{FetchOutcome, Job};

/// Maximum number of bracketed candidates tried when resolving a collision
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Suffix of in-progress downloads
pub const PART_SUFFIX: &str = ".part";

/// Abstraction over executing one job, enabling testability of the pool and service
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the job to a terminal outcome. Must not panic on ordinary failures.
    async fn run(&self, job: &Job) -> FetchOutcome;
}

/// Per-call fetch options
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOptions {
    /// Disambiguate an existing destination instead of skipping it
    pub allow_rename: bool,
    /// Attempt budget and backoff
    pub retry: RetryConfig,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            allow_rename: false,
            retry: RetryConfig::immediate(3),
        }
    }
}

/// Where a fetch should write, after the pre-check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// The destination already exists and renaming is off
    AlreadyPresent,
    /// Write to this path (the original or a bracketed alternative)
    Write(PathBuf),
}

/// Decide the effective destination for a fetch
pub fn resolve_destination(
    destination: &Path,
    allow_rename: bool,
) -> std::result::Result<Resolved, FetchError> {
    if !destination.exists() {
        return Ok(Resolved::Write(destination.to_path_buf()));
    }
    if !allow_rename {
        return Ok(Resolved::AlreadyPresent);
    }
    unique_bracketed_path(destination).map(Resolved::Write)
}

/// Find the first `name[N].ext` sibling of `path` that does not exist yet
///
/// ```
/// use cluster_dl::fetcher::bracketed_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     bracketed_path(Path::new("/midis/song.mid"), 2),
///     Some(PathBuf::from("/midis/song[2].mid"))
/// );
/// ```
pub fn unique_bracketed_path(path: &Path) -> std::result::Result<PathBuf, FetchError> {
    for counter in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = bracketed_path(path, counter).ok_or_else(|| {
            FetchError::filesystem(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file name is missing or not valid UTF-8",
                ),
            )
        })?;
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(FetchError::RenameExhausted {
        path: path.to_path_buf(),
    })
}

/// Insert `[counter]` before the last extension of the file name
///
/// `archive.tar.gz` becomes `archive.tar[1].gz`; names without an extension
/// (including dotfiles such as `.profile`) get the counter appended.
pub fn bracketed_path(path: &Path, counter: u32) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_str()?;
    let new_name = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}[{counter}].{ext}"),
        _ => format!("{file_name}[{counter}]"),
    };
    Some(path.with_file_name(new_name))
}

/// Random temporary sibling for `destination`, e.g. `song.mid.1f3a9c0b.part`
///
/// The random tag keeps two concurrent attempts for the same destination from
/// writing into one file.
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let tag: u32 = rand::thread_rng().r#gen();
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!("{file_name}.{tag:08x}{PART_SUFFIX}"))
}

/// Production [`JobRunner`] backed by an HTTP client
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection-pooling HTTP client
    ///
    /// The client carries no overall request timeout; [`FetchConfig::idle_timeout`]
    /// bounds each wait for headers or body data instead.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client, config })
    }

    /// Options derived from this fetcher's configuration
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            allow_rename: self.config.allow_rename,
            retry: self.config.retry.clone(),
        }
    }

    /// Fetch `url` to `destination`
    ///
    /// Never returns an error: every failure mode ends in a [`FetchOutcome`].
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        options: &FetchOptions,
    ) -> FetchOutcome {
        let target = match resolve_destination(destination, options.allow_rename) {
            Ok(Resolved::AlreadyPresent) => {
                tracing::info!(path = %destination.display(), "Already exists, skipping");
                return FetchOutcome::AlreadyPresent {
                    path: destination.to_path_buf(),
                };
            }
            Ok(Resolved::Write(path)) => path,
            Err(e) => return give_up(url, destination, 0, e),
        };

        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                let err = FetchError::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                };
                return give_up(url, &target, 0, err);
            }
        };

        tracing::info!(url, path = %target.display(), "Downloading");

        let target_ref: &Path = &target;
        let parsed_ref = &parsed;
        let result = with_retry(&options.retry, move |attempt| {
            self.attempt(parsed_ref, target_ref, attempt)
        })
        .await;

        match result {
            Ok((bytes, attempts)) => {
                tracing::info!(path = %target.display(), bytes, attempts, "Downloaded");
                FetchOutcome::Downloaded {
                    path: target,
                    bytes,
                    attempts,
                }
            }
            Err(Exhausted {
                attempts,
                last_error,
            }) => give_up(url, &target, attempts, last_error),
        }
    }

    /// One GET → `.part` → rename cycle
    async fn attempt(
        &self,
        url: &reqwest::Url,
        destination: &Path,
        attempt: u32,
    ) -> std::result::Result<u64, FetchError> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::filesystem(parent, e))?;
        }

        let idle = self.config.idle_timeout;
        let response = timeout(idle, self.client.get(url.clone()).send())
            .await
            .map_err(|_| stalled(url, idle))?
            .map_err(|e| transport(url, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Advisory only: used for logging, never required
        let expected = response.content_length();
        tracing::debug!(url = %url, attempt, content_length = ?expected, "Streaming response body");

        let temp = temp_path_for(destination);
        let written = match stream_to_file(response, &temp, url, idle).await {
            Ok(written) => written,
            Err(e) => {
                discard(&temp).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected
            && expected != written
        {
            tracing::warn!(url = %url, expected, written, "Body length differs from Content-Length");
        }

        if let Err(e) = tokio::fs::rename(&temp, destination).await {
            discard(&temp).await;
            return Err(FetchError::filesystem(destination, e));
        }

        Ok(written)
    }
}

#[async_trait]
impl JobRunner for HttpFetcher {
    async fn run(&self, job: &Job) -> FetchOutcome {
        let options = self.options();
        self.fetch(&job.url, &job.destination(), &options).await
    }
}

/// Stream the body chunk by chunk into `temp`, then flush and fsync it
///
/// Fails only when no chunk arrives within `idle`.
async fn stream_to_file(
    mut response: reqwest::Response,
    temp: &Path,
    url: &reqwest::Url,
    idle: Duration,
) -> std::result::Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(temp)
        .await
        .map_err(|e| FetchError::filesystem(temp, e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = timeout(idle, response.chunk())
        .await
        .map_err(|_| stalled(url, idle))?
        .map_err(|e| transport(url, e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::filesystem(temp, e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| FetchError::filesystem(temp, e))?;
    file.sync_all()
        .await
        .map_err(|e| FetchError::filesystem(temp, e))?;

    Ok(written)
}

/// Best-effort removal of a failed attempt's temp file
async fn discard(temp: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %e, "Failed to remove partial file");
    }
}

fn transport(url: &reqwest::Url, source: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        source,
    }
}

fn stalled(url: &reqwest::Url, idle: Duration) -> FetchError {
    FetchError::Stalled {
        url: url.to_string(),
        idle,
    }
}

fn give_up(url: &str, path: &Path, attempts: u32, error: FetchError) -> FetchOutcome {
    let kind: FailureKind = error.kind();
    tracing::error!(
        url,
        path = %path.display(),
        attempts,
        kind = %kind,
        error = %error,
        "Could not download"
    );
    FetchOutcome::Exhausted {
        attempts,
        last_error: error.to_string(),
        kind,
    }
}
