use indoc::indoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Seconds to defer a job whose failure count just reached `error_count`.
pub(crate) fn retry_delay(error_count: i32) -> i64 {
    (i64::from(error_count) + 1).pow(4) + 3
}

/// Records a failed attempt: stores the new error count and message, and
/// pushes `run_at` out by the retry backoff.
pub(crate) async fn fail_job<'e>(
    executor: impl PgExecutor<'e>,
    id: i64,
    error_count: i32,
    message: &str,
) -> Result<()> {
    let sql = indoc! {r#"
        update jobs
        set error_count = $2::integer,
            last_error = $3::text,
            run_at = now() + $4::bigint * '1 second'::interval
        where id = $1::bigint
    "#};

    query(sql)
        .bind(id)
        .bind(error_count)
        .bind(message)
        .bind(retry_delay(error_count))
        .execute(executor)
        .await?;

    Ok(())
}
