//! Core types for cluster-dl

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::FailureKind;

/// Default TCP port a Worker Service listens on
pub const DEFAULT_PORT: u16 = 42069;

/// One file to fetch: a `(name, directory, url)` download request
///
/// Jobs are immutable once created. The destination is always `directory/name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    /// File name inside `directory`
    pub name: String,
    /// Target directory (created on demand by the worker)
    pub directory: PathBuf,
    /// Source URL
    pub url: String,
}

impl Job {
    /// Create a new job
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            url: url.into(),
        }
    }

    /// Final path the fetched file is published at
    pub fn destination(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    /// Check that the job can be acted on
    ///
    /// `name` must be exactly one normal path component, so a job can never write
    /// outside its own directory, and `url` must be an absolute http(s) URL.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("name is empty".to_string());
        }
        let mut components = Path::new(&self.name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(format!("name {:?} is not a plain file name", self.name)),
        }
        if self.directory.as_os_str().is_empty() {
            return Err("directory is empty".to_string());
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| format!("url {:?}: {e}", self.url))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported url scheme {other:?}")),
        }
    }
}

/// Network address of one Worker Service instance
///
/// Serialized as a `"host:port"` string. A bare host uses [`DEFAULT_PORT`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("endpoint is empty".to_string());
        }

        // [v6-addr]:port or [v6-addr]
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in endpoint {s:?}"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, s)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("unexpected text after ']' in endpoint {s:?}")),
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            // A bare IPv6 address has more than one colon and no port
            Some((host, _)) if host.contains(':') => Ok(Self::new(s, DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port, s)?)),
            Some(_) => Err(format!("endpoint {s:?} has no host")),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

fn parse_port(port: &str, endpoint: &str) -> Result<u16, String> {
    port.parse()
        .map_err(|_| format!("invalid port {port:?} in endpoint {endpoint:?}"))
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Coarse terminal status of one fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// The file was downloaded and published
    Succeeded,
    /// The destination already existed; nothing was fetched
    AlreadySatisfied,
    /// Every attempt failed
    Exhausted,
}

/// Terminal result of a Resilient Fetcher invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Body streamed to a temp file and atomically renamed onto `path`
    Downloaded {
        /// Published path (may differ from the requested one after collision renaming)
        path: PathBuf,
        /// Number of body bytes written
        bytes: u64,
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// The destination existed and renaming was not allowed
    AlreadyPresent {
        /// The existing destination
        path: PathBuf,
    },
    /// Attempt budget used up (or a permanent error hit) without success
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Display text of the last failure
        last_error: String,
        /// Classification of the last failure
        kind: FailureKind,
    },
}

impl FetchOutcome {
    /// Map the outcome to its coarse status
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchOutcome::Downloaded { .. } => FetchStatus::Succeeded,
            FetchOutcome::AlreadyPresent { .. } => FetchStatus::AlreadySatisfied,
            FetchOutcome::Exhausted { .. } => FetchStatus::Exhausted,
        }
    }

    /// True unless the fetch was exhausted
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, FetchOutcome::Exhausted { .. })
    }
}

/// Completion counts for one Worker Service run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    /// Jobs submitted to the pool
    pub submitted: usize,
    /// Fetches that published a file
    pub downloaded: usize,
    /// Fetches skipped because the file was already there
    pub already_present: usize,
    /// Fetches that gave up
    pub exhausted: usize,
    /// Pool tasks that panicked instead of returning an outcome
    pub panicked: usize,
}

impl PoolSummary {
    /// Count one finished fetch
    pub fn record(&mut self, outcome: &FetchOutcome) {
        match outcome.status() {
            FetchStatus::Succeeded => self.downloaded += 1,
            FetchStatus::AlreadySatisfied => self.already_present += 1,
            FetchStatus::Exhausted => self.exhausted += 1,
        }
    }

    /// Number of submitted jobs that reached a terminal state
    pub fn completed(&self) -> usize {
        self.downloaded + self.already_present + self.exhausted + self.panicked
    }
}

/// Event emitted by a Worker Service
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was decoded, enqueued and acknowledged
    JobAccepted {
        /// The accepted job
        job: Job,
    },

    /// A fetch reached its terminal state
    FetchFinished {
        /// The job that was fetched
        job: Job,
        /// How it ended
        outcome: FetchOutcome,
    },

    /// The shutdown sentinel arrived; no further jobs will be accepted
    ShutdownReceived,

    /// All submitted fetches have finished
    Drained {
        /// Final completion counts
        summary: PoolSummary,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // --- Job ---

    #[test]
    fn job_destination_joins_directory_and_name() {
        let job = Job::new("song.mid", "/data/midis", "http://example.com/song.mid");
        assert_eq!(job.destination(), PathBuf::from("/data/midis/song.mid"));
    }

    #[test]
    fn job_wire_shape_has_exactly_three_fields() {
        let job = Job::new("a.zip", "/data/redump", "https://archive.org/download/x/a.zip");
        let value = serde_json::to_value(&job).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["name"], "a.zip");
        assert_eq!(obj["directory"], "/data/redump");
        assert_eq!(obj["url"], "https://archive.org/download/x/a.zip");
    }

    #[test]
    fn job_rejects_unknown_fields() {
        let json = r#"{"name":"a","directory":"/d","url":"http://x/a","extra":1}"#;
        assert!(serde_json::from_str::<Job>(json).is_err());
    }

    #[test]
    fn job_validate_accepts_plain_name_and_http_url() {
        let job = Job::new("a.zip", "/data", "http://example.com/a.zip");
        assert!(job.validate().is_ok());
    }

    #[test]
    fn job_validate_rejects_path_escapes_and_bad_urls() {
        let cases = [
            Job::new("", "/data", "http://example.com/a"),
            Job::new("../etc/passwd", "/data", "http://example.com/a"),
            Job::new("sub/a.zip", "/data", "http://example.com/a"),
            Job::new("..", "/data", "http://example.com/a"),
            Job::new("a.zip", "", "http://example.com/a"),
            Job::new("a.zip", "/data", "not a url"),
            Job::new("a.zip", "/data", "ftp://example.com/a.zip"),
        ];
        for job in cases {
            assert!(job.validate().is_err(), "{job:?} should be rejected");
        }
    }

    // --- Endpoint ---

    #[test]
    fn endpoint_parses_host_and_port() {
        let ep: Endpoint = "192.168.1.3:9000".parse().unwrap();
        assert_eq!(ep, Endpoint::new("192.168.1.3", 9000));
    }

    #[test]
    fn endpoint_bare_host_uses_default_port() {
        let ep: Endpoint = "192.168.1.1".parse().unwrap();
        assert_eq!(ep.port, DEFAULT_PORT);
        let ep: Endpoint = "worker-7".parse().unwrap();
        assert_eq!(ep, Endpoint::new("worker-7", DEFAULT_PORT));
    }

    #[test]
    fn endpoint_handles_ipv6_forms() {
        let ep: Endpoint = "[::1]:5000".parse().unwrap();
        assert_eq!(ep, Endpoint::new("::1", 5000));
        assert_eq!(ep.to_string(), "[::1]:5000");

        let ep: Endpoint = "::1".parse().unwrap();
        assert_eq!(ep, Endpoint::new("::1", DEFAULT_PORT));
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!("".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!("host:70000".parse::<Endpoint>().is_err());
        assert!("[::1".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_serializes_as_string() {
        let ep = Endpoint::new("10.0.0.5", 42069);
        assert_eq!(serde_json::to_string(&ep).unwrap(), "\"10.0.0.5:42069\"");
        let back: Endpoint = serde_json::from_str("\"10.0.0.5:42069\"").unwrap();
        assert_eq!(back, ep);
    }

    // --- Outcomes ---

    #[test]
    fn pool_summary_counts_each_status() {
        let mut summary = PoolSummary {
            submitted: 3,
            ..Default::default()
        };
        summary.record(&FetchOutcome::Downloaded {
            path: "/d/a".into(),
            bytes: 10,
            attempts: 1,
        });
        summary.record(&FetchOutcome::AlreadyPresent { path: "/d/b".into() });
        summary.record(&FetchOutcome::Exhausted {
            attempts: 3,
            last_error: "unexpected HTTP status 500".into(),
            kind: FailureKind::HttpStatus,
        });

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.already_present, 1);
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.completed(), summary.submitted);
    }

    #[test]
    fn outcome_status_mapping() {
        let exhausted = FetchOutcome::Exhausted {
            attempts: 3,
            last_error: "boom".into(),
            kind: FailureKind::Transport,
        };
        assert_eq!(exhausted.status(), FetchStatus::Exhausted);
        assert!(!exhausted.is_satisfied());
        assert!(FetchOutcome::AlreadyPresent { path: "/x".into() }.is_satisfied());
    }
}
