//! Per-tenant quota ledger: conversion-minutes accounting with period reset.
//!
//! Admission (`check_minutes`) and recording (`record_minutes`) are
//! deliberately non-transactional: concurrent submissions can slightly
//! over-consume a period. The drift is bounded by in-flight jobs and capped
//! at the next period reset.

use chrono::{DateTime, Months, Utc};
use std::sync::Arc;

use crate::database::models::TenantProfileDbModel;
use crate::database::repositories::TenantRepository;
use crate::tier::{limits_for, TierLimits};
use crate::{Error, Result};

/// Conversion minutes charged for an input duration.
///
/// `max(1, ceil(seconds / 60))` — audio-only and probe-failed inputs
/// (duration <= 0) still cost one minute.
pub fn conversion_minutes(duration_seconds: f64) -> i64 {
    if duration_seconds <= 0.0 {
        return 1;
    }
    (duration_seconds / 60.0).ceil() as i64
}

/// Usage ledger over the tenant profile table.
#[derive(Clone)]
pub struct QuotaLedger {
    tenants: Arc<dyn TenantRepository>,
}

impl QuotaLedger {
    pub fn new(tenants: Arc<dyn TenantRepository>) -> Self {
        Self { tenants }
    }

    /// The tenant's profile, created with free-tier defaults when absent.
    pub async fn profile(&self, tenant_id: &str) -> Result<TenantProfileDbModel> {
        self.tenants.get_or_create(tenant_id, Utc::now()).await
    }

    /// Tier limits for the tenant.
    pub async fn limits(&self, tenant_id: &str) -> Result<TierLimits> {
        let profile = self.profile(tenant_id).await?;
        Ok(limits_for(&profile.tier))
    }

    /// Admission check: would `delta` more minutes fit this period?
    pub async fn check_minutes(&self, tenant_id: &str, delta: i64) -> Result<()> {
        let profile = self.profile(tenant_id).await?;
        let limits = limits_for(&profile.tier);
        if profile.minutes_used + delta > limits.conversion_minutes_per_period {
            return Err(Error::QuotaExceeded {
                used: profile.minutes_used,
                limit: limits.conversion_minutes_per_period,
            });
        }
        Ok(())
    }

    /// Admission check: does a file of `bytes` fit the tier's size cap?
    pub async fn check_file_size(&self, tenant_id: &str, bytes: i64) -> Result<()> {
        let profile = self.profile(tenant_id).await?;
        let limits = limits_for(&profile.tier);
        if bytes > limits.max_file_size_bytes {
            return Err(Error::SizeExceeded {
                size: bytes,
                limit: limits.max_file_size_bytes,
                tier: profile.tier,
            });
        }
        Ok(())
    }

    /// Record consumed minutes. Called only after successful completion;
    /// partial failures never consume quota.
    pub async fn record_minutes(&self, tenant_id: &str, minutes: i64) -> Result<()> {
        if minutes <= 0 {
            return Ok(());
        }
        self.tenants.add_minutes(tenant_id, minutes, Utc::now()).await
    }

    /// Zero the counter when the usage period has rolled over.
    ///
    /// The period length here is one month from `period_start`; the billing
    /// collaborator drives resets aligned to invoice boundaries.
    pub async fn reset_if_period_elapsed(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let profile = self.tenants.get_or_create(tenant_id, now).await?;
        let period_end = profile
            .period_start
            .checked_add_months(Months::new(1))
            .unwrap_or(profile.period_start);
        if now >= period_end {
            self.tenants.reset_period(tenant_id, now).await?;
            return Ok(true);
        }
        Ok(false)
    }
}
