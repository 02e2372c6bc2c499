use indoc::indoc;
use sqlx::{query, PgExecutor};
use tracing::info;

use crate::errors::Result;
use crate::job::{NewJob, DEFAULT_ARGS, DEFAULT_PRIORITY, DEFAULT_QUEUE_NAME};

/// Inserts a job row, applying the queue defaults for unset fields.
///
/// The assigned id is not read back.
pub(crate) async fn insert_job<'e>(executor: impl PgExecutor<'e>, job: &NewJob) -> Result<()> {
    let sql = indoc! {r#"
        insert into jobs (queue, priority, run_at, type, args)
        values ($1::text, $2::smallint, coalesce($3::timestamptz, now()), $4::text, $5::bytea)
    "#};

    query(sql)
        .bind(job.queue().as_deref().unwrap_or(DEFAULT_QUEUE_NAME))
        .bind(job.priority().unwrap_or(DEFAULT_PRIORITY))
        .bind(*job.run_at())
        .bind(job.job_type().as_str())
        .bind(job.args().as_deref().unwrap_or(DEFAULT_ARGS))
        .execute(executor)
        .await?;

    info!(
        job_type = %job.job_type(),
        queue = job.queue().as_deref().unwrap_or(DEFAULT_QUEUE_NAME),
        "job enqueued"
    );

    Ok(())
}
