use thiserror::Error;

/// Errors that can occur while enqueueing, leasing or finishing jobs.
#[derive(Error, Debug)]
pub enum ToilError {
    /// A job was enqueued without a type. Raised before any database
    /// round-trip.
    #[error("job type must not be empty")]
    MissingType,

    /// An error occurred while executing an SQL query.
    #[error("error while executing query: {0}")]
    Sql(#[from] sqlx::Error),

    /// A terminal operation was attempted on a lease that had already been
    /// released.
    #[error("lease already released")]
    LeaseReleased,
}

/// A Result type alias for ToilError.
pub type Result<T> = core::result::Result<T, ToilError>;
