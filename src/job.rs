use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use sqlx::FromRow;

/// Name of the queue used when a job does not specify one.
pub const DEFAULT_QUEUE_NAME: &str = "";

/// Priority assigned to jobs that do not specify one. Lower runs sooner.
pub const DEFAULT_PRIORITY: i16 = 100;

/// Args stored for jobs that do not provide any: an empty JSON array.
pub const DEFAULT_ARGS: &[u8] = b"[]";

/// A queued unit of work, as stored in the database.
///
/// Instances are snapshots: the `Job` carried by a lease reflects the row at
/// the moment it was locked, and mutating it does not write back.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct Job {
    /// Unique identifier, assigned by the database.
    id: i64,
    /// Name of the queue the job belongs to. `""` is the default queue.
    queue: String,
    /// Lower number means the job runs sooner.
    priority: i16,
    /// Earliest time at which the job becomes eligible.
    run_at: DateTime<Utc>,
    /// Identifier of the handler that should run this job.
    #[sqlx(rename = "type")]
    job_type: String,
    /// Opaque payload, conventionally a JSON document.
    args: Vec<u8>,
    /// How many attempts have failed so far.
    error_count: i32,
    /// Why the latest attempt failed, if any attempt has.
    last_error: Option<String>,
}

/// A job to enqueue. Unset fields fall back to the queue defaults.
#[derive(Builder, Getters, Debug, Clone, Default)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), default, pattern = "owned")]
pub struct NewJob {
    /// Identifier of the handler that should run this job. Must be
    /// non-empty.
    #[builder(setter(into))]
    job_type: String,
    /// Queue to place the job on; [`DEFAULT_QUEUE_NAME`] when unset.
    #[builder(setter(into, strip_option))]
    queue: Option<String>,
    /// Priority override; [`DEFAULT_PRIORITY`] when unset.
    #[builder(setter(strip_option))]
    priority: Option<i16>,
    /// Earliest run time; the enqueue time when unset.
    #[builder(setter(strip_option))]
    run_at: Option<DateTime<Utc>>,
    /// Payload bytes; [`DEFAULT_ARGS`] when unset.
    #[builder(setter(into, strip_option))]
    args: Option<Vec<u8>>,
}

impl NewJob {
    /// Creates a job of the given type with every other field defaulted.
    pub fn new(job_type: impl Into<String>) -> Self {
        NewJob {
            job_type: job_type.into(),
            ..Default::default()
        }
    }

    /// Creates a builder for constructing a `NewJob`.
    pub fn builder() -> NewJobBuilder {
        NewJobBuilder::default()
    }
}

impl NewJobBuilder {
    /// Builds the NewJob with all configured values.
    pub fn build(self) -> NewJob {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}
