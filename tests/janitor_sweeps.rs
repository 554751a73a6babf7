//! Janitor sweep tests: artifact expiry, stale-job pruning and dormant
//! tenant cleanup.

mod common;

use chrono::{Duration, Utc};

use common::{seed_upload_file, setup, TestEnv};
use mediaconv::database::models::{FileDbModel, JobDbModel, TenantProfileDbModel};
use mediaconv::database::repositories::{FileRepository, JobRepository};
use mediaconv::janitor::Janitor;
use mediaconv::storage::Zone;
use mediaconv::tier::PriorityClass;

fn janitor(env: &TestEnv) -> Janitor {
    Janitor::new(
        env.files.clone(),
        env.jobs.clone(),
        env.tenants.clone(),
        env.storage.clone(),
    )
}

async fn seed_output_file(env: &TestEnv, id: &str, expires_in_hours: i64) -> FileDbModel {
    let path = env.storage.path_for(Zone::Output, &format!("{}.mp4", id));
    tokio::fs::write(&path, b"artifact").await.unwrap();

    let now = Utc::now();
    let file = FileDbModel {
        id: id.to_string(),
        owner_id: None,
        original_name: format!("{}.mp4", id),
        storage_path: path,
        mime_type: "video/mp4".to_string(),
        size_bytes: 8,
        zone: Zone::Output.as_str().to_string(),
        media_type: Some("video".to_string()),
        expires_at: Some(now + Duration::hours(expires_in_hours)),
        created_at: now,
    };
    env.files.create_file(&file).await.unwrap();
    file
}

fn backdated_job(owner_id: Option<&str>, age_days: i64) -> JobDbModel {
    let mut job = JobDbModel::new(
        owner_id.map(|s| s.to_string()),
        PriorityClass::Default,
        &["file-1".to_string()],
        &[],
        "mp4",
        "clip_converted.mp4",
        10.0,
        1,
        false,
        Utc::now() - Duration::days(age_days),
    );
    job.id = format!("job-{}-{}d", owner_id.unwrap_or("anon"), age_days);
    job
}

#[tokio::test]
async fn test_expire_files_sweep() {
    let env = setup().await;
    let expired = seed_output_file(&env, "old", -1).await;
    let fresh = seed_output_file(&env, "fresh", 23).await;
    // Uploads without an expiry are never swept.
    let keeper = seed_upload_file(&env, "keeper", "keep.mp4", b"keep").await;

    let deleted = janitor(&env).expire_files(Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);

    // Expired: gone from storage and the database.
    assert!(!env.storage.exists(&expired.storage_path).await.unwrap());
    assert!(env.files.get_file(&expired.id).await.is_err());

    // Fresh and expiry-less rows survive with their blobs.
    assert!(env.files.get_file(&fresh.id).await.is_ok());
    assert!(env.storage.exists(&fresh.storage_path).await.unwrap());
    assert!(env.files.get_file(&keeper.id).await.is_ok());
    assert!(env.storage.exists(&keeper.storage_path).await.unwrap());
}

#[tokio::test]
async fn test_expire_files_survives_missing_blob() {
    let env = setup().await;
    let expired = seed_output_file(&env, "ghost", -1).await;
    // Blob vanished out from under the row.
    tokio::fs::remove_file(&expired.storage_path).await.unwrap();

    // The sweep logs the blob failure and still removes the row.
    let deleted = janitor(&env).expire_files(Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(env.files.get_file(&expired.id).await.is_err());
}

#[tokio::test]
async fn test_expire_files_is_idempotent() {
    let env = setup().await;
    seed_output_file(&env, "old", -1).await;

    let sweeper = janitor(&env);
    assert_eq!(sweeper.expire_files(Utc::now()).await.unwrap(), 1);
    assert_eq!(sweeper.expire_files(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prune_stale_jobs_retention_split() {
    let env = setup().await;

    // Anonymous: 7-day retention. Authenticated: 30-day retention.
    for job in [
        backdated_job(None, 8),
        backdated_job(None, 2),
        backdated_job(Some("user-1"), 8),
        backdated_job(Some("user-1"), 31),
    ] {
        env.jobs.create_job(&job).await.unwrap();
    }

    let deleted = janitor(&env).prune_stale_jobs(Utc::now()).await.unwrap();
    assert_eq!(deleted, 2);

    assert!(env.jobs.get_job("job-anon-8d").await.is_err());
    assert!(env.jobs.get_job("job-anon-2d").await.is_ok());
    assert!(env.jobs.get_job("job-user-1-8d").await.is_ok());
    assert!(env.jobs.get_job("job-user-1-31d").await.is_err());
}

#[tokio::test]
async fn test_prune_stale_jobs_ignores_status() {
    let env = setup().await;
    let job = backdated_job(Some("user-1"), 31);
    env.jobs.create_job(&job).await.unwrap();
    env.service.complete(&job.id, "out-1").await.unwrap();

    // Completed rows are pruned like any other once past retention.
    let deleted = janitor(&env).prune_stale_jobs(Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_prune_dormant_tenants() {
    let env = setup().await;
    let now = Utc::now();

    let seed = |tenant_id: &str, age_days: i64| TenantProfileDbModel {
        tenant_id: tenant_id.to_string(),
        tier: "free".to_string(),
        period_start: now - Duration::days(age_days),
        minutes_used: 3,
        external_customer_id: None,
        updated_at: now - Duration::days(age_days),
    };

    for profile in [
        seed("anon-dormant", 61),
        seed("anon-active", 3),
        seed("user-dormant", 61),
    ] {
        sqlx::query(
            "INSERT INTO tenant_profiles (tenant_id, tier, period_start, minutes_used, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.tenant_id)
        .bind(&profile.tier)
        .bind(profile.period_start)
        .bind(profile.minutes_used)
        .bind(profile.updated_at)
        .execute(&env.pool)
        .await
        .unwrap();
    }

    let deleted = janitor(&env).prune_dormant_tenants(now).await.unwrap();
    assert_eq!(deleted, 1);

    let remaining: Vec<(String,)> =
        sqlx::query_as("SELECT tenant_id FROM tenant_profiles ORDER BY tenant_id")
            .fetch_all(&env.pool)
            .await
            .unwrap();
    let remaining: Vec<&str> = remaining.iter().map(|r| r.0.as_str()).collect();
    // Dormant authenticated profiles are never touched.
    assert_eq!(remaining, vec!["anon-active", "user-dormant"]);
}
