use sqlx::{PgExecutor, PgPool};
use tracing::debug;

use crate::errors::{Result, ToilError};
use crate::job::NewJob;
use crate::lease::Lease;
use crate::sql;

/// Entry point for producers and consumers.
///
/// A `Client` wraps a connection pool; it is cheap to clone and safe to
/// share across tasks.
#[derive(Clone, Debug)]
pub struct Client {
    pool: PgPool,
}

impl Client {
    pub fn new(pool: PgPool) -> Self {
        Client { pool }
    }

    /// The pool this client draws connections from.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Adds a job to the queue.
    ///
    /// Fields left unset on `job` take the queue defaults. Fails with
    /// [`ToilError::MissingType`] when the job type is empty.
    pub async fn enqueue(&self, job: NewJob) -> Result<()> {
        self.enqueue_in(job, &self.pool).await
    }

    /// Adds a job through a caller-supplied executor, typically an open
    /// transaction.
    ///
    /// The job becomes visible to other sessions only if and when the
    /// caller commits; on rollback the row never existed.
    pub async fn enqueue_in<'e>(&self, job: NewJob, executor: impl PgExecutor<'e>) -> Result<()> {
        if job.job_type().is_empty() {
            return Err(ToilError::MissingType);
        }

        sql::insert_job::insert_job(executor, &job).await
    }

    /// Attempts to lease the next eligible job on `queue`.
    ///
    /// Returns `Ok(None)` when no job is eligible. On success the returned
    /// [`Lease`] holds the job's session advisory lock and the pooled
    /// connection it was taken on; the caller must finish the lease with
    /// [`Lease::error`] or [`Lease::done`].
    pub async fn lock_job(&self, queue: &str) -> Result<Option<Lease>> {
        let mut conn = self.pool.acquire().await?;

        loop {
            let Some(job) = sql::lock_job::find_and_lock_job(&mut conn, queue).await? else {
                return Ok(None);
            };

            // The scan locks the id it returns, but its snapshot can be
            // stale by the time the lock is ours: a competing transaction
            // may have committed a delete of that row in the window.
            // Verify on this session before handing the job out.
            match sql::lock_job::job_exists(&mut conn, *job.id()).await {
                Ok(true) => return Ok(Some(Lease::new(job, conn))),
                Ok(false) => {
                    debug!(job_id = job.id(), "locked row was deleted mid-flight, rescanning");
                    sql::advisory::unlock_job(&mut conn, *job.id()).await?;
                }
                Err(e) => {
                    let _ = sql::advisory::unlock_job(&mut conn, *job.id()).await;
                    return Err(e);
                }
            }
        }
    }
}
