use indoc::indoc;
use sqlx::{query, Acquire, Postgres};
use tracing::info;

use crate::errors::Result;

/// Installs the queue schema if it is not already present.
///
/// Safe to run repeatedly; producers, workers and test harnesses can all
/// call it at startup. The `type` check mirrors the enqueue-time
/// validation so no path can persist an untyped row.
pub async fn migrate<'a, A>(conn: A) -> Result<()>
where
    A: Acquire<'a, Database = Postgres>,
{
    let mut tx = conn.begin().await?;

    query(indoc! {r#"
        create table if not exists jobs (
            priority    smallint    not null default 100,
            run_at      timestamptz not null default now(),
            id          bigserial   primary key,
            type        text        not null check (length(type) > 0),
            args        bytea       not null default '[]'::bytea,
            error_count integer     not null default 0,
            last_error  text,
            queue       text        not null default ''
        )
    "#})
    .execute(&mut *tx)
    .await?;

    query(indoc! {r#"
        create index if not exists jobs_selection_idx
        on jobs (queue, priority, run_at, id)
    "#})
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("queue schema is in place");

    Ok(())
}
