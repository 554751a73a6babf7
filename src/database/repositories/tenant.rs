//! Tenant profile repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::models::TenantProfileDbModel;
use crate::database::retry::busy_retry;
use crate::database::DbPool;
use crate::Result;

/// Tenant profile repository trait.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Fetch the profile, creating a free-tier one if absent.
    async fn get_or_create(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TenantProfileDbModel>;
    /// Unconditional usage increment (last-writer-wins).
    async fn add_minutes(&self, tenant_id: &str, minutes: i64, now: DateTime<Utc>) -> Result<()>;
    /// Zero the usage counter and move the period start.
    async fn reset_period(&self, tenant_id: &str, period_start: DateTime<Utc>) -> Result<()>;
    /// Change the tier (driven by the billing collaborator).
    async fn set_tier(&self, tenant_id: &str, tier: &str, now: DateTime<Utc>) -> Result<()>;
    /// Janitor sweep: drop anonymous profiles untouched since the cutoff.
    async fn delete_dormant_anonymous(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx implementation of [`TenantRepository`].
pub struct SqlxTenantRepository {
    pool: DbPool,
}

impl SqlxTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for SqlxTenantRepository {
    async fn get_or_create(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TenantProfileDbModel> {
        busy_retry("tenant_get_or_create", || async {
            sqlx::query(
                "INSERT INTO tenant_profiles (tenant_id, tier, period_start, minutes_used, updated_at) \
                 VALUES (?, 'free', ?, 0, ?) ON CONFLICT (tenant_id) DO NOTHING",
            )
            .bind(tenant_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let profile = sqlx::query_as::<_, TenantProfileDbModel>(
                "SELECT * FROM tenant_profiles WHERE tenant_id = ?",
            )
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(profile)
        })
        .await
    }

    async fn add_minutes(&self, tenant_id: &str, minutes: i64, now: DateTime<Utc>) -> Result<()> {
        busy_retry("tenant_add_minutes", || async {
            // Upsert: usage may be recorded for a tenant whose profile was
            // never read (e.g. recording after a restart cleared nothing).
            sqlx::query(
                "INSERT INTO tenant_profiles (tenant_id, tier, period_start, minutes_used, updated_at) \
                 VALUES (?, 'free', ?, ?, ?) ON CONFLICT (tenant_id) DO UPDATE SET \
                 minutes_used = tenant_profiles.minutes_used + excluded.minutes_used, \
                 updated_at = excluded.updated_at",
            )
            .bind(tenant_id)
            .bind(now)
            .bind(minutes)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn reset_period(&self, tenant_id: &str, period_start: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE tenant_profiles SET minutes_used = 0, period_start = ?, updated_at = ? \
             WHERE tenant_id = ?",
        )
        .bind(period_start)
        .bind(period_start)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_tier(&self, tenant_id: &str, tier: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenant_profiles (tenant_id, tier, period_start, minutes_used, updated_at) \
             VALUES (?, ?, ?, 0, ?) ON CONFLICT (tenant_id) DO UPDATE SET tier = excluded.tier, \
             updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(tier)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_dormant_anonymous(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM tenant_profiles WHERE (tenant_id = 'anonymous' OR tenant_id LIKE 'anon-%') \
             AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
