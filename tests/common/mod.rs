//! Shared test fixtures: in-memory database, local storage in a temp dir,
//! fully wired job service and a stub media runner.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mediaconv::database::models::FileDbModel;
use mediaconv::database::repositories::{
    FileRepository, JobRepository, SqlxFileRepository, SqlxJobRepository, SqlxTaskRepository,
    SqlxTenantRepository, TaskRepository, TenantRepository,
};
use mediaconv::database::{init_pool, run_migrations, DbPool};
use mediaconv::jobs::{JobService, MediaProcessHandler};
use mediaconv::media::{MediaRunner, MergeOptions, ProcessOptions, ProgressReporter};
use mediaconv::progress::ProgressBus;
use mediaconv::queue::SqliteWorkQueue;
use mediaconv::quota::QuotaLedger;
use mediaconv::storage::{StorageService, Zone};
use mediaconv::Result;

/// Fully wired test environment over an in-memory database.
pub struct TestEnv {
    pub pool: DbPool,
    pub storage: StorageService,
    pub bus: Arc<ProgressBus>,
    pub queue: Arc<SqliteWorkQueue>,
    pub service: Arc<JobService>,
    pub jobs: Arc<dyn JobRepository>,
    pub files: Arc<dyn FileRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub ledger: QuotaLedger,
    // Keeps the storage root alive for the test's duration.
    _data_dir: TempDir,
}

pub async fn setup() -> TestEnv {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");

    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let backend = mediaconv::storage::LocalBackend::new(data_dir.path())
        .expect("Failed to create local backend");
    let storage = StorageService::new(Arc::new(backend), data_dir.path());

    let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
    let files: Arc<dyn FileRepository> = Arc::new(SqlxFileRepository::new(pool.clone()));
    let tenants: Arc<dyn TenantRepository> = Arc::new(SqlxTenantRepository::new(pool.clone()));
    let tasks: Arc<dyn TaskRepository> = Arc::new(SqlxTaskRepository::new(pool.clone()));

    let bus = Arc::new(ProgressBus::new());
    let queue = Arc::new(SqliteWorkQueue::new(pool.clone()));
    let ledger = QuotaLedger::new(tenants.clone());

    let service = Arc::new(JobService::new(
        jobs.clone(),
        files.clone(),
        ledger.clone(),
        queue.clone(),
        bus.clone(),
        storage.clone(),
    ));

    TestEnv {
        pool,
        storage,
        bus,
        queue,
        service,
        jobs,
        files,
        tenants,
        tasks,
        ledger,
        _data_dir: data_dir,
    }
}

/// Seed an upload-zone file: a real blob on disk plus its row.
pub async fn seed_upload_file(env: &TestEnv, id: &str, name: &str, body: &[u8]) -> FileDbModel {
    let path = env.storage.path_for(Zone::Upload, &format!("{}-{}", id, name));
    tokio::fs::write(&path, body).await.expect("Failed to write blob");

    let file = FileDbModel {
        id: id.to_string(),
        owner_id: None,
        original_name: name.to_string(),
        storage_path: path,
        mime_type: "video/mp4".to_string(),
        size_bytes: body.len() as i64,
        zone: Zone::Upload.as_str().to_string(),
        media_type: Some("video".to_string()),
        expires_at: None,
        created_at: Utc::now(),
    };
    env.files.create_file(&file).await.expect("Failed to insert file row");
    file
}

/// Seed a file row with an arbitrary size and no backing blob (admission
/// only looks at the row).
pub async fn seed_file_row(env: &TestEnv, id: &str, name: &str, size_bytes: i64) -> FileDbModel {
    let file = FileDbModel {
        id: id.to_string(),
        owner_id: None,
        original_name: name.to_string(),
        storage_path: format!("/virtual/{}/{}", id, name),
        mime_type: "video/mp4".to_string(),
        size_bytes,
        zone: Zone::Upload.as_str().to_string(),
        media_type: Some("video".to_string()),
        expires_at: None,
        created_at: Utc::now(),
    };
    env.files.create_file(&file).await.expect("Failed to insert file row");
    file
}

/// What the stub runner was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubMode {
    Process,
    Merge,
}

/// Stub media runner: writes the output file and emits a fixed progress
/// ramp, or fails without touching the filesystem.
pub struct StubMedia {
    pub fail: bool,
    pub calls: AtomicUsize,
    pub last_mode: parking_lot::Mutex<Option<StubMode>>,
}

impl StubMedia {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
            last_mode: parking_lot::Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
            last_mode: parking_lot::Mutex::new(None),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self, output_path: &str, progress: &ProgressReporter) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(mediaconv::Error::media("ffmpeg exited with code 1"));
        }
        for percent in [10, 30, 60, 90] {
            progress.report(percent, "convertFormat");
        }
        tokio::fs::write(output_path, b"converted-bytes").await?;
        progress.report(100, "convertFormat");
        Ok(())
    }
}

#[async_trait]
impl MediaRunner for StubMedia {
    async fn process(
        &self,
        opts: ProcessOptions,
        progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> Result<()> {
        *self.last_mode.lock() = Some(StubMode::Process);
        self.run(&opts.output_path, &progress).await
    }

    async fn merge(
        &self,
        opts: MergeOptions,
        progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> Result<()> {
        *self.last_mode.lock() = Some(StubMode::Merge);
        self.run(&opts.output_path, &progress).await
    }
}

/// Handler wired to the environment with the given stub runner.
pub fn handler(env: &TestEnv, media: Arc<StubMedia>) -> MediaProcessHandler {
    MediaProcessHandler::new(env.service.clone(), env.files.clone(), media)
}

/// Pop the next pending task from a queue and parse its payload.
pub async fn claim_payload(env: &TestEnv, queue: &str) -> (String, serde_json::Value) {
    let task = env
        .tasks
        .claim_next(queue, Utc::now())
        .await
        .expect("claim failed")
        .expect("no task on queue");
    let payload = serde_json::from_str(&task.payload).expect("bad payload json");
    (task.id, payload)
}
