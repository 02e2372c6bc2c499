use indoc::indoc;
use sqlx::{query_as, query_scalar, PgConnection};

use crate::errors::Result;
use crate::job::Job;

/// Walks the eligible rows of `queue` in `(priority, run_at, id)` order,
/// attempting the non-blocking session advisory lock on each visited row,
/// and returns the first row whose lock was taken.
///
/// The recursive scan is used instead of `for update skip locked` because
/// the lock must stay live for the job's entire lease, across statements
/// and outside any transaction; row-level locks end with the transaction.
pub(crate) async fn find_and_lock_job(conn: &mut PgConnection, queue: &str) -> Result<Option<Job>> {
    let sql = indoc! {r#"
        with recursive scan as (
            select (j).*, pg_try_advisory_lock((j).id) as locked
            from (
                select j
                from jobs as j
                where queue = $1::text
                and run_at <= now()
                order by priority, run_at, id
                limit 1
            ) as t1
            union all (
                select (j).*, pg_try_advisory_lock((j).id) as locked
                from (
                    select (
                        select j
                        from jobs as j
                        where queue = $1::text
                        and run_at <= now()
                        and (priority, run_at, id) >
                            (scan.priority, scan.run_at, scan.id)
                        order by priority, run_at, id
                        limit 1
                    ) as j
                    from scan
                    where scan.id is not null
                    limit 1
                ) as t1
            )
        )
        select queue, priority, run_at, id, type, args, error_count, last_error
        from scan
        where locked
        limit 1
    "#};

    let job = query_as(sql).bind(queue).fetch_optional(conn).await?;

    Ok(job)
}

/// Re-checks, on the session that now holds the advisory lock, that the row
/// still exists.
///
/// The scan establishes the row's existence under its own snapshot; a
/// concurrent transaction can commit a delete of that row before the lock
/// was taken, so a lease must not be handed out on the scan result alone.
pub(crate) async fn job_exists(conn: &mut PgConnection, id: i64) -> Result<bool> {
    let found: Option<i64> = query_scalar("select id from jobs where id = $1::bigint")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(found.is_some())
}
