use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Removes a job row. Statements issued through a transaction participate
/// in it; the row reappears if the transaction rolls back.
pub(crate) async fn delete_job<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<()> {
    query("delete from jobs where id = $1::bigint")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}
