use std::ops::{Deref, DerefMut};

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::errors::{Result, ToilError};
use crate::job::Job;
use crate::sql;

/// An exclusively leased job.
///
/// A lease owns the pooled connection it was acquired on together with the
/// session advisory lock keyed on the job id; both are held until the lease
/// is finished with [`error`](Lease::error) or [`done`](Lease::done).
///
/// Dropping a lease without finishing it returns the connection to the pool
/// but leaves the advisory lock to be cleaned up when the session
/// eventually closes; prefer the explicit path.
pub struct Lease {
    job: Job,
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

/// Exclusive access to the session a lease holds, for callers that want to
/// issue their own statements on it, for example to bracket
/// [`Lease::delete`] in a transaction with raw `begin`/`commit`.
///
/// The guard must be dropped before calling any other method on the lease.
pub struct LeaseConn<'a> {
    guard: MutexGuard<'a, Option<PoolConnection<Postgres>>>,
}

impl Deref for LeaseConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.guard
            .as_deref()
            .expect("LeaseConn is only handed out while the connection is held")
    }
}

impl DerefMut for LeaseConn<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard
            .as_deref_mut()
            .expect("LeaseConn is only handed out while the connection is held")
    }
}

impl Lease {
    pub(crate) fn new(job: Job, conn: PoolConnection<Postgres>) -> Self {
        Lease {
            job,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// The job this lease holds, as it looked when it was locked.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Removes the job's row.
    ///
    /// The lease stays live: the advisory lock and the connection are kept
    /// until [`done`](Lease::done) runs. When called inside a transaction
    /// started on [`conn`](Lease::conn) that later rolls back, the row
    /// reappears and the lease remains valid.
    pub async fn delete(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let conn = slot.as_deref_mut().ok_or(ToilError::LeaseReleased)?;

        sql::delete_job::delete_job(&mut *conn, *self.job.id()).await
    }

    /// Records a failed attempt and finishes the lease.
    ///
    /// Bumps `error_count`, stores `message` and defers the job by the
    /// retry backoff, then releases the advisory lock and returns the
    /// connection to the pool. A subsequent [`done`](Lease::done) is a
    /// no-op.
    pub async fn error(&self, message: &str) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let mut conn = slot.take().ok_or(ToilError::LeaseReleased)?;

        let failed = sql::fail_job::fail_job(
            &mut *conn,
            *self.job.id(),
            self.job.error_count() + 1,
            message,
        )
        .await;

        // The lock release and connection return happen whether or not the
        // update went through; an unlock failure must not mask the update
        // error, and the session releases its locks on close regardless.
        if let Err(e) = sql::advisory::unlock_job(&mut conn, *self.job.id()).await {
            warn!(job_id = self.job.id(), error = %e, "failed to release advisory lock");
        }

        failed
    }

    /// Finishes the lease: releases the advisory lock and returns the
    /// connection to the pool.
    ///
    /// Idempotent; extra calls, including concurrent ones, are no-ops.
    pub async fn done(&self) {
        let mut slot = self.conn.lock().await;
        let Some(mut conn) = slot.take() else {
            return;
        };

        if let Err(e) = sql::advisory::unlock_job(&mut conn, *self.job.id()).await {
            warn!(job_id = self.job.id(), error = %e, "failed to release advisory lock");
        }
    }

    /// Borrows the session the lease holds, or `None` once the lease is
    /// finished.
    pub async fn conn(&self) -> Option<LeaseConn<'_>> {
        let guard = self.conn.lock().await;
        if guard.is_none() {
            return None;
        }

        Some(LeaseConn { guard })
    }
}
