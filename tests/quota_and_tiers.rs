//! Quota admission, tier routing and size caps.

mod common;

use chrono::{Duration, Utc};

use common::{seed_file_row, seed_upload_file, setup};
use mediaconv::database::repositories::TenantRepository;
use mediaconv::jobs::{CreateJobParams, Operation};

fn params(tenant: &str, file_id: &str, duration: f64) -> CreateJobParams {
    CreateJobParams {
        tenant_id: tenant.to_string(),
        input_file_ids: vec![file_id.to_string()],
        operations: vec![Operation::new("compress")],
        output_format: "mp4".to_string(),
        output_file_name: None,
        input_duration_seconds: duration,
    }
}

#[tokio::test]
async fn test_quota_admission_round_trip() {
    let env = setup().await;
    seed_upload_file(&env, "file-1", "clip.mp4", b"raw").await;

    // Free tier: 50 minutes per period. 3000s = exactly 50 minutes.
    let job = env
        .service
        .create(params("user-q", "file-1", 3000.0))
        .await
        .unwrap();
    assert_eq!(job.conversion_minutes, 50);

    // Completion records the consumed minutes.
    env.service.complete(&job.id, "out-1").await.unwrap();
    assert_eq!(env.ledger.profile("user-q").await.unwrap().minutes_used, 50);

    // The next one-minute job no longer fits, and leaves no row behind.
    let err = env
        .service
        .create(params("user-q", "file-1", 60.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUOTA_EXCEEDED");
    assert_eq!(env.service.list("user-q", None).await.unwrap().len(), 1);

    // A period rollover resets usage and submissions flow again.
    let next_period = Utc::now() + Duration::days(32);
    assert!(env
        .ledger
        .reset_if_period_elapsed("user-q", next_period)
        .await
        .unwrap());
    assert_eq!(env.ledger.profile("user-q").await.unwrap().minutes_used, 0);

    env.service
        .create(params("user-q", "file-1", 60.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_admission_rejects_job_over_remaining_minutes() {
    let env = setup().await;
    seed_upload_file(&env, "file-1", "clip.mp4", b"raw").await;

    // 49 of 50 minutes used; a 2-minute job must be rejected (S2).
    env.ledger.record_minutes("user-s2", 49).await.unwrap();
    let err = env
        .service
        .create(params("user-s2", "file-1", 120.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QUOTA_EXCEEDED");
    assert!(env.service.list("user-s2", None).await.unwrap().is_empty());

    // A 1-minute job still fits exactly.
    env.service
        .create(params("user-s2", "file-1", 60.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_priority_routing_by_tier() {
    let env = setup().await;
    seed_upload_file(&env, "file-1", "clip.mp4", b"raw").await;

    let now = Utc::now();
    env.tenants.set_tier("user-pro", "pro", now).await.unwrap();
    env.tenants.set_tier("user-basic", "basic", now).await.unwrap();

    let pro = env.service.create(params("user-pro", "file-1", 10.0)).await.unwrap();
    let basic = env.service.create(params("user-basic", "file-1", 10.0)).await.unwrap();
    let free = env.service.create(params("user-free", "file-1", 10.0)).await.unwrap();

    assert_eq!(pro.priority_class, "critical");
    assert_eq!(basic.priority_class, "critical");
    assert_eq!(free.priority_class, "default");

    // Only the pro tier gets hardware acceleration.
    assert!(pro.use_hardware_accel);
    assert!(!basic.use_hardware_accel);
    assert!(!free.use_hardware_accel);

    // Two tasks on critical, one on default.
    let queues: Vec<(String,)> =
        sqlx::query_as("SELECT queue FROM tasks WHERE status = 'pending' ORDER BY queue")
            .fetch_all(&env.pool)
            .await
            .unwrap();
    let queues: Vec<&str> = queues.iter().map(|q| q.0.as_str()).collect();
    assert_eq!(queues, vec!["critical", "critical", "default"]);
}

#[tokio::test]
async fn test_file_size_cap_per_tier() {
    let env = setup().await;
    // 600MB input: over the free cap, under the pro cap.
    seed_file_row(&env, "big-1", "big.mp4", 600 * 1024 * 1024).await;

    let err = env
        .service
        .create(params("user-free", "big-1", 10.0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SIZE_EXCEEDED");

    env.tenants
        .set_tier("user-pro", "pro", Utc::now())
        .await
        .unwrap();
    env.service
        .create(params("user-pro", "big-1", 10.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_pro_submissions_both_enqueue() {
    let env = setup().await;
    seed_upload_file(&env, "file-1", "clip.mp4", b"raw").await;
    env.tenants.set_tier("user-pro", "pro", Utc::now()).await.unwrap();

    let (a, b) = tokio::join!(
        env.service.create(params("user-pro", "file-1", 60.0)),
        env.service.create(params("user-pro", "file-1", 60.0)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.id, b.id);
    assert_eq!(a.priority_class, "critical");
    assert_eq!(b.priority_class, "critical");

    // Both completions record usage.
    env.service.complete(&a.id, "out-a").await.unwrap();
    env.service.complete(&b.id, "out-b").await.unwrap();
    assert_eq!(env.ledger.profile("user-pro").await.unwrap().minutes_used, 2);
}

#[tokio::test]
async fn test_anonymous_completion_records_no_minutes() {
    let env = setup().await;
    seed_upload_file(&env, "file-1", "clip.mp4", b"raw").await;

    let job = env
        .service
        .create(params("anon-device-7", "file-1", 120.0))
        .await
        .unwrap();
    assert!(job.owner_id.is_none());

    env.service.complete(&job.id, "out-1").await.unwrap();

    // The per-device profile exists (admission created it) but no usage
    // was recorded for the anonymous owner.
    let profile = env.ledger.profile("anon-device-7").await.unwrap();
    assert_eq!(profile.minutes_used, 0);
    assert_eq!(profile.tier, "free");
}

#[tokio::test]
async fn test_reset_noop_within_period() {
    let env = setup().await;
    env.ledger.record_minutes("user-r", 10).await.unwrap();
    let reset = env
        .ledger
        .reset_if_period_elapsed("user-r", Utc::now())
        .await
        .unwrap();
    assert!(!reset);
    assert_eq!(env.ledger.profile("user-r").await.unwrap().minutes_used, 10);
}
