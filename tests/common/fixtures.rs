//! Worker, origin and job fixtures

use cluster_dl::{
    Dispatcher, DispatcherConfig, Endpoint, FetchConfig, Job, PoolSummary, RetryConfig,
    WorkerConfig, WorkerService,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A Worker Service running in the background on a loopback port
pub struct RunningWorker {
    pub endpoint: Endpoint,
    pub handle: JoinHandle<cluster_dl::Result<PoolSummary>>,
}

impl RunningWorker {
    /// Wait for the worker to shut down and drain
    pub async fn finish(self) -> PoolSummary {
        tokio::time::timeout(Duration::from_secs(20), self.handle)
            .await
            .expect("worker did not shut down")
            .expect("worker task panicked")
            .expect("worker returned an error")
    }
}

/// Worker configuration with short timeouts suitable for tests
pub fn worker_config(pool_size: usize, allow_rename: bool) -> WorkerConfig {
    WorkerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        pool_size,
        read_timeout: Duration::from_secs(2),
        fetch: FetchConfig {
            idle_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            allow_rename,
            retry: RetryConfig::immediate(3),
            ..FetchConfig::default()
        },
        ..WorkerConfig::default()
    }
}

/// Start a worker backed by the real HTTP fetcher
pub async fn spawn_worker(pool_size: usize) -> RunningWorker {
    let service = WorkerService::bind_http(worker_config(pool_size, false))
        .await
        .unwrap();
    let endpoint = Endpoint::from(service.local_addr().unwrap());
    let handle = tokio::spawn(service.serve());
    RunningWorker { endpoint, handle }
}

/// Start `count` workers
pub async fn spawn_workers(count: usize, pool_size: usize) -> Vec<RunningWorker> {
    let mut workers = Vec::with_capacity(count);
    for _ in 0..count {
        workers.push(spawn_worker(pool_size).await);
    }
    workers
}

/// Dispatcher pointed at the given workers, in order
pub fn dispatcher_for(workers: &[RunningWorker]) -> Dispatcher {
    Dispatcher::new(DispatcherConfig {
        endpoints: workers.iter().map(|w| w.endpoint.clone()).collect(),
        connect_timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_secs(2),
        ..DispatcherConfig::default()
    })
    .unwrap()
}

/// Wait for every worker and add up their summaries
pub async fn finish_all(workers: Vec<RunningWorker>) -> PoolSummary {
    let mut total = PoolSummary::default();
    for worker in workers {
        let s = worker.finish().await;
        total.submitted += s.submitted;
        total.downloaded += s.downloaded;
        total.already_present += s.already_present;
        total.exhausted += s.exhausted;
        total.panicked += s.panicked;
    }
    total
}

/// Body served for `/files/<name>`
pub fn body_for(name: &str) -> Vec<u8> {
    format!("MThd contents of {name}\n").repeat(64).into_bytes()
}

/// Mount a 200 response for each name under `/files/`
pub async fn mount_files(server: &MockServer, names: &[&str]) {
    for name in names {
        Mock::given(method("GET"))
            .and(path(format!("/files/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body_for(name)))
            .mount(server)
            .await;
    }
}

/// One job per name, all targeting `directory`
pub fn jobs_for(server: &MockServer, directory: &Path, names: &[&str]) -> Vec<Job> {
    names
        .iter()
        .map(|name| Job::new(*name, directory, format!("{}/files/{name}", server.uri())))
        .collect()
}

/// Every `.part` file under `dir`, recursively
pub fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap().flatten() {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else if p.to_string_lossy().ends_with(".part") {
                found.push(p);
            }
        }
    }
    found
}
