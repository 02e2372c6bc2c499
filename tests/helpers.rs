#![allow(dead_code)]

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{query_as, query_scalar, PgPool};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use toil::{migrate, Client, Job};

const JOB_COLUMNS: &str = "queue, priority, run_at, id, type, args, error_count, last_error";

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub connect_options: PgConnectOptions,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub fn client(&self) -> Client {
        Client::new(self.test_pool.clone())
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        query_as(&format!("select {JOB_COLUMNS} from jobs order by id asc"))
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get jobs")
    }

    /// First job row by id, if any.
    pub async fn find_one_job(&self) -> Option<Job> {
        query_as(&format!(
            "select {JOB_COLUMNS} from jobs order by id asc limit 1"
        ))
        .fetch_optional(&self.test_pool)
        .await
        .expect("Failed to find job")
    }

    /// Number of sessions of this database holding the advisory lock for a
    /// job id.
    pub async fn advisory_lock_count(&self, id: i64) -> i64 {
        query_scalar(
            "select count(*) from pg_locks \
             where locktype = 'advisory' and objid = $1::bigint \
             and database = (select oid from pg_database where datname = $2::text)",
        )
        .bind(id)
        .bind(&self.name)
        .fetch_one(&self.source_pool)
        .await
        .expect("Failed to count advisory locks")
    }

    /// Connections of the test pool currently checked out.
    pub fn conns_in_use(&self) -> usize {
        self.test_pool.size() as usize - self.test_pool.num_idle()
    }

    /// Connections are returned to the sqlx pool asynchronously, so pool
    /// counters can lag the drop that released them.
    pub async fn wait_until_conns_in_use(&self, expected: usize) {
        for _ in 0..200 {
            if self.conns_in_use() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {expected} connections in use, have {}",
            self.conns_in_use()
        );
    }
}

pub async fn create_test_database_with_conns(max_connections: u32) -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_toil");

    let pg_pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_toil_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(test_options.clone())
        .await
        .expect("Failed to connect to test database");

    migrate(&test_pool).await.expect("Failed to install schema");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        connect_options: test_options,
        name: db_name,
    }
}

pub async fn create_test_database() -> TestDatabase {
    create_test_database_with_conns(4).await
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    with_test_db_and_conns(4, test_fn).await;
}

pub async fn with_test_db_and_conns<F, Fut>(max_connections: u32, test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database_with_conns(max_connections).await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}

async fn init_job_count() -> Mutex<u32> {
    Mutex::new(0)
}

impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        *cell.lock().await
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
