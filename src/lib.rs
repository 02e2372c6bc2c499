//! A durable PostgreSQL job queue built on session advisory locks.
//!
//! Producers enqueue jobs, optionally inside their own transaction, and
//! consumers lease jobs exclusively, run handler code, then delete the job
//! on success or record a failure for retry. Durability, ordering and
//! exactly-once handoff are delegated to PostgreSQL: every leased job is
//! guarded by a session advisory lock keyed on its id, held for the whole
//! lease rather than a single transaction, so handlers are free to manage
//! their own transactions (or none at all) while the job stays locked.
//!
//! If a worker process dies mid-lease, its database sessions die with it
//! and PostgreSQL releases the locks; the job becomes eligible again at
//! its `run_at`.
//!
//! ```no_run
//! use toil::{Client, NewJob, Worker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/app").await?;
//! toil::migrate(&pool).await?;
//!
//! let client = Client::new(pool.clone());
//! client
//!     .enqueue(
//!         NewJob::builder()
//!             .job_type("send_email")
//!             .args(br#"{"to": 1}"#.to_vec())
//!             .build(),
//!     )
//!     .await?;
//!
//! let worker = Worker::options()
//!     .pg_pool(pool)
//!     .define_job("send_email", |_ctx, payload: serde_json::Value| async move {
//!         println!("sending {payload}");
//!         Ok(()) as Result<(), String>
//!     })
//!     .init()
//!     .await?;
//!
//! worker.run().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod errors;
pub mod job;
pub mod lease;
pub mod migrate;
mod sql;
pub mod worker;

pub use client::Client;
pub use errors::{Result, ToilError};
pub use job::{Job, NewJob, NewJobBuilder, DEFAULT_PRIORITY, DEFAULT_QUEUE_NAME};
pub use lease::{Lease, LeaseConn};
pub use migrate::migrate;
pub use worker::{Worker, WorkerBuildError, WorkerContext, WorkerOptions};
