use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use getset::Getters;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::job::{Job, DEFAULT_QUEUE_NAME};
use crate::migrate::migrate;

/// Shared state handed to every handler invocation.
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct WorkerContext {
    pool: PgPool,
}

impl WorkerContext {
    /// A client on the worker's pool, for enqueueing follow-up jobs from
    /// inside a handler.
    pub fn client(&self) -> Client {
        Client::new(self.pool.clone())
    }
}

type WorkerFn = Box<
    dyn Fn(WorkerContext, Job) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// A polling consumer: repeatedly leases jobs from one queue and runs the
/// registered handler for each.
pub struct Worker {
    client: Client,
    queue: String,
    concurrency: usize,
    poll_interval: Duration,
    handlers: Arc<HashMap<String, WorkerFn>>,
}

impl Worker {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// The client this worker leases jobs through.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The queue this worker leases from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            pool: self.client.pool().clone(),
        }
    }

    /// Leases and works a single job.
    ///
    /// Returns `Ok(false)` when no job was eligible. Handler outcomes are
    /// recorded on the job row; storage errors surface to the caller.
    pub async fn work_one(&self) -> crate::errors::Result<bool> {
        let Some(lease) = self.client.lock_job(&self.queue).await? else {
            return Ok(false);
        };

        let job = lease.job().clone();
        match self.run_handler(&job).await {
            Ok(()) => {
                info!(job_id = job.id(), job_type = %job.job_type(), "job completed");
                let deleted = lease.delete().await;
                lease.done().await;
                deleted?;
            }
            Err(message) => {
                warn!(job_id = job.id(), job_type = %job.job_type(), %message, "job failed");
                lease.error(&message).await?;
            }
        }

        Ok(true)
    }

    /// Runs the handler isolated in its own task, so a panic is recorded
    /// as a failure instead of unwinding through the worker.
    async fn run_handler(&self, job: &Job) -> Result<(), String> {
        let Some(handler) = self.handlers.get(job.job_type()) else {
            return Err(format!("unknown job type: {}", job.job_type()));
        };

        let fut = handler(self.context(), job.clone());
        match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(e) => Err(format!("job handler panicked: {e}")),
        }
    }

    /// Works jobs until the queue has no more eligible ones; returns how
    /// many were worked.
    pub async fn run_once(&self) -> crate::errors::Result<usize> {
        let mut worked = 0;
        while self.work_one().await? {
            worked += 1;
        }

        Ok(worked)
    }

    /// Polls the queue with `concurrency` concurrent pollers until the
    /// returned future is dropped.
    ///
    /// Poller starts are staggered across one poll interval so a fleet
    /// does not hit the database in lockstep. Storage errors are logged
    /// and retried at the next poll; retry policy for handler failures is
    /// the backoff recorded on the job row.
    pub async fn run(&self) {
        let pollers = self.concurrency.max(1);
        let stagger = self.poll_interval / pollers as u32;

        let loops = (0..pollers).map(|i| {
            let delay = stagger * i as u32;
            async move {
                tokio::time::sleep(delay).await;
                self.poll_loop().await;
            }
        });

        futures::future::join_all(loops).await;
    }

    async fn poll_loop(&self) {
        loop {
            match self.work_one().await {
                Ok(true) => continue,
                Ok(false) => debug!(queue = %self.queue, "no eligible job"),
                Err(e) => error!(error = %e, "failed to work job"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerBuildError {
    #[error("error occurred while connecting to the postgres database: {0}")]
    ConnectError(#[from] sqlx::Error),
    #[error("error occurred while installing the schema: {0}")]
    MigrateError(#[from] crate::errors::ToilError),
    #[error("missing database_url config")]
    MissingDatabaseUrl,
}

/// Builder for [`Worker`].
#[derive(Default)]
pub struct WorkerOptions {
    queue: Option<String>,
    concurrency: Option<usize>,
    poll_interval: Option<Duration>,
    pg_pool: Option<PgPool>,
    database_url: Option<String>,
    max_pg_conn: Option<u32>,
    handlers: HashMap<String, WorkerFn>,
}

impl WorkerOptions {
    /// Connects (or adopts the configured pool), installs the schema and
    /// builds the worker.
    pub async fn init(self) -> Result<Worker, WorkerBuildError> {
        let pool = match self.pg_pool {
            Some(pool) => pool,
            None => {
                let db_url = self
                    .database_url
                    .ok_or(WorkerBuildError::MissingDatabaseUrl)?;

                PgPoolOptions::new()
                    .max_connections(self.max_pg_conn.unwrap_or(20))
                    .connect(&db_url)
                    .await?
            }
        };

        migrate(&pool).await?;

        Ok(Worker {
            client: Client::new(pool),
            queue: self.queue.unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            concurrency: self.concurrency.unwrap_or_else(num_cpus::get),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_millis(1000)),
            handlers: Arc::new(self.handlers),
        })
    }

    /// Queue to lease from; the default queue when unset.
    pub fn queue(mut self, value: &str) -> Self {
        self.queue = Some(value.into());
        self
    }

    pub fn concurrency(mut self, value: usize) -> Self {
        self.concurrency = Some(value);
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    pub fn pg_pool(mut self, value: PgPool) -> Self {
        self.pg_pool = Some(value);
        self
    }

    pub fn database_url(mut self, value: &str) -> Self {
        self.database_url = Some(value.into());
        self
    }

    pub fn max_pg_conn(mut self, value: u32) -> Self {
        self.max_pg_conn = Some(value);
        self
    }

    /// Registers a handler whose payload is parsed from the job args as
    /// JSON. A payload that fails to parse is a handler failure, recorded
    /// on the row like any other.
    pub fn define_job<T, E, Fut, F>(mut self, job_type: &str, handler: F) -> Self
    where
        T: DeserializeOwned + Send,
        E: Debug,
        Fut: Future<Output = Result<(), E>> + Send,
        F: Fn(WorkerContext, T) -> Fut + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let worker_fn = move |ctx: WorkerContext, job: Job| {
            let handler = handler.clone();
            async move {
                let payload = match serde_json::from_slice(job.args()) {
                    Ok(payload) => payload,
                    Err(e) => return Err(format!("invalid job args: {e}")),
                };

                handler(ctx, payload).await.map_err(|e| format!("{e:?}"))
            }
            .boxed()
        };

        self.handlers.insert(job_type.to_string(), Box::new(worker_fn));
        self
    }

    /// Registers a handler that receives the raw job snapshot.
    pub fn define_raw_job<E, Fut, F>(mut self, job_type: &str, handler: F) -> Self
    where
        E: Debug,
        Fut: Future<Output = Result<(), E>> + Send,
        F: Fn(WorkerContext, Job) -> Fut + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let worker_fn = move |ctx: WorkerContext, job: Job| {
            let handler = handler.clone();
            async move { handler(ctx, job).await.map_err(|e| format!("{e:?}")) }.boxed()
        };

        self.handlers.insert(job_type.to_string(), Box::new(worker_fn));
        self
    }
}
