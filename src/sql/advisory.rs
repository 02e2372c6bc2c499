use sqlx::{query_scalar, PgConnection};
use tracing::debug;

use crate::errors::Result;

/// Releases the session advisory lock keyed on a job id.
///
/// Returns whether the lock was actually held by this session.
pub(crate) async fn unlock_job(conn: &mut PgConnection, id: i64) -> Result<bool> {
    let released: bool = query_scalar("select pg_advisory_unlock($1::bigint)")
        .bind(id)
        .fetch_one(conn)
        .await?;

    if !released {
        debug!(job_id = id, "advisory lock was not held at release");
    }

    Ok(released)
}
