//! Isolated execution unit
//!
//! A [`SandboxWorker`] owns a dedicated OS thread running a current-thread
//! tokio runtime. Sandbox values are not `Send`, so jobs cross the thread
//! boundary as JSON and results come back the same way. Each worker
//! memoizes compiled sandboxes by exact source text; a compile failure is
//! permanent per source and reported without caching.
//!
//! Workers communicate by message passing only. For stronger isolation
//! than in-process sandboxing, run one job per worker and manage a bounded
//! set of them with [`Pool`](crate::Pool).

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

use crate::cache::{Cache, CacheConfig};
use crate::error::{CompileError, RunError};
use crate::limits::SandboxLimits;
use crate::log::LogSender;
use crate::pool::{HookFuture, ResourceManager};
use crate::sandbox::{Sandbox, SandboxConfig};
use crate::value::Value;

/// Worker-side failure taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerError {
    Compile(CompileError),
    Run(RunError),
    /// The worker thread is gone; the job was dropped
    Closed,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile(err) => write!(f, "{}", err),
            Self::Run(err) => write!(f, "{}", err),
            Self::Closed => write!(f, "worker is closed"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Configuration shared by every sandbox a worker compiles
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub global_names: Vec<String>,
    pub limits: SandboxLimits,
    pub filename: String,
    pub cache: CacheConfig,
    pub log_tx: Option<LogSender>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            global_names: Vec::new(),
            limits: SandboxLimits::default(),
            filename: "query.js".to_string(),
            cache: CacheConfig::default(),
            log_tx: None,
        }
    }
}

struct Job {
    source: String,
    args: serde_json::Value,
    globals: serde_json::Value,
    reply: oneshot::Sender<Result<serde_json::Value, WorkerError>>,
}

/// Handle to a sandbox execution thread
pub struct SandboxWorker {
    tx: mpsc::UnboundedSender<Job>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SandboxWorker {
    /// Spawn the worker thread and its runtime
    pub fn spawn(config: WorkerConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("sandbox-worker".to_string())
            .spawn(move || worker_loop(rx, config))?;
        Ok(Self { tx, handle: Some(handle) })
    }

    /// A worker with no thread behind it; every job fails with
    /// [`WorkerError::Closed`]
    fn closed() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx, handle: None }
    }

    /// Run one query function. `args` is a JSON array of positional
    /// arguments; `globals` a JSON object bound to the declared names.
    pub async fn exec(
        &self,
        source: impl Into<String>,
        args: serde_json::Value,
        globals: serde_json::Value,
    ) -> Result<serde_json::Value, WorkerError> {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            source: source.into(),
            args,
            globals,
            reply,
        };
        self.tx.send(job).map_err(|_| WorkerError::Closed)?;
        rx.await.map_err(|_| WorkerError::Closed)?
    }

    /// Close the job channel and wait for the thread to finish in-flight
    /// work. Dropping the worker also stops it, without waiting.
    pub fn shutdown(self) {
        let Self { tx, handle } = self;
        drop(tx);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn worker_loop(mut rx: mpsc::UnboundedReceiver<Job>, config: WorkerConfig) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("sandbox worker failed to start a runtime: {}", err);
            return;
        }
    };
    let local = LocalSet::new();
    local.block_on(&rt, async move {
        let mut sandboxes: Cache<Rc<Sandbox>> = Cache::new(config.cache.clone());
        while let Some(job) = rx.recv().await {
            let sandbox = match sandboxes.get(&job.source) {
                Some(sandbox) => sandbox,
                None => match build_sandbox(&config, &job.source) {
                    Ok(sandbox) => {
                        let sandbox = Rc::new(sandbox);
                        sandboxes.set(job.source.clone(), Rc::clone(&sandbox));
                        sandbox
                    }
                    Err(err) => {
                        let _ = job.reply.send(Err(WorkerError::Compile(err)));
                        continue;
                    }
                },
            };
            let args = json_args(&job.args);
            let globals = json_globals(&job.globals);
            let result = sandbox
                .run(args, globals)
                .await
                .map(|value| value.to_json())
                .map_err(WorkerError::Run);
            let _ = job.reply.send(result);
        }
    });
}

fn build_sandbox(config: &WorkerConfig, source: &str) -> Result<Sandbox, CompileError> {
    Sandbox::new(SandboxConfig {
        source: source.to_string(),
        filename: config.filename.clone(),
        global_names: config.global_names.clone(),
        limits: config.limits.clone(),
        log_tx: config.log_tx.clone(),
    })
}

fn json_args(args: &serde_json::Value) -> Vec<Value> {
    match args {
        serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
        serde_json::Value::Null => Vec::new(),
        single => vec![Value::from_json(single)],
    }
}

fn json_globals(globals: &serde_json::Value) -> HashMap<String, Value> {
    match globals {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect(),
        _ => HashMap::new(),
    }
}

/// Pool hooks for a bounded set of workers
pub struct SandboxWorkerManager {
    pub config: WorkerConfig,
}

impl ResourceManager for SandboxWorkerManager {
    type Resource = SandboxWorker;

    fn create(&self) -> HookFuture<'_, SandboxWorker> {
        let config = self.config.clone();
        Box::pin(async move {
            match SandboxWorker::spawn(config) {
                Ok(worker) => worker,
                Err(err) => {
                    eprintln!("failed to spawn sandbox worker thread: {}", err);
                    SandboxWorker::closed()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn worker() -> SandboxWorker {
        SandboxWorker::spawn(WorkerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn round_trips_json_args_and_results() {
        let w = worker();
        let result = w
            .exec("async (a, b) => a + b", json!([20, 22]), json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!(42.0));
        w.shutdown();
    }

    #[tokio::test]
    async fn binds_json_globals() {
        let w = SandboxWorker::spawn(WorkerConfig {
            global_names: vec!["user".to_string()],
            ..WorkerConfig::default()
        })
        .unwrap();
        let result = w
            .exec(
                "async () => user.name",
                json!([]),
                json!({ "user": { "name": "ada" } }),
            )
            .await
            .unwrap();
        assert_eq!(result, json!("ada"));
        w.shutdown();
    }

    #[tokio::test]
    async fn reports_compile_errors() {
        let w = worker();
        let err = w.exec("const x = 1", json!([]), json!({})).await.unwrap_err();
        let WorkerError::Compile(err) = &err else {
            panic!("expected a compile error, got {:?}", err);
        };
        assert_eq!(err.message, "Expected AsyncArrowFunctionExpression");
        w.shutdown();
    }

    #[tokio::test]
    async fn reports_run_errors_without_killing_the_worker() {
        let w = worker();
        let err = w
            .exec("async () => { throw new Error('boom'); }", json!([]), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Run(RunError::Exception { .. })));

        // the worker survives and keeps serving jobs
        let result = w.exec("async () => 1 + 1", json!([]), json!({})).await.unwrap();
        assert_eq!(result, json!(2.0));
        w.shutdown();
    }

    #[tokio::test]
    async fn reuses_compiled_sandboxes_per_source() {
        let w = worker();
        // same source twice; the second call hits the sandbox cache
        for _ in 0..2 {
            let result = w.exec("async () => 7", json!([]), json!({})).await.unwrap();
            assert_eq!(result, json!(7.0));
        }
        w.shutdown();
    }

    #[tokio::test]
    async fn jobs_on_a_threadless_worker_fail_closed() {
        let w = SandboxWorker::closed();
        let err = w.exec("async () => 1", json!([]), json!({})).await.unwrap_err();
        assert_eq!(err, WorkerError::Closed);
    }

    #[tokio::test]
    async fn workers_pool_as_resources() {
        use crate::pool::{Pool, PoolConfig};

        let pool = Pool::new(
            SandboxWorkerManager {
                config: WorkerConfig::default(),
            },
            PoolConfig {
                max_resources: 2,
                gc: false,
                ..PoolConfig::default()
            },
        );
        let w = pool.acquire().await.unwrap();
        let result = w.exec("async () => 3 * 3", json!([]), json!({})).await.unwrap();
        assert_eq!(result, json!(9.0));
        pool.release(&w).await;
        pool.destroy().await;
    }
}
