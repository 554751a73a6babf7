//! Tenant profile database model.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// True when the tenant id denotes an anonymous (per-device) tenant.
///
/// Anonymous jobs and files store `owner_id = NULL`; the full device id is
/// kept only on the quota profile so per-device admission still works.
pub fn is_anonymous_tenant(tenant_id: &str) -> bool {
    tenant_id.is_empty() || tenant_id == "anonymous" || tenant_id.starts_with("anon-")
}

/// Tenant profile: tier plus per-period usage counter.
#[derive(Debug, Clone, FromRow)]
pub struct TenantProfileDbModel {
    pub tenant_id: String,
    pub tier: String,
    pub period_start: DateTime<Utc>,
    pub minutes_used: i64,
    pub external_customer_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantProfileDbModel {
    /// Fresh free-tier profile.
    pub fn new(tenant_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tier: "free".to_string(),
            period_start: now,
            minutes_used: 0,
            external_customer_id: None,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_tenant_detection() {
        assert!(is_anonymous_tenant("anonymous"));
        assert!(is_anonymous_tenant("anon-7c2f"));
        assert!(is_anonymous_tenant(""));
        assert!(!is_anonymous_tenant("user-42"));
        assert!(!is_anonymous_tenant("anonymized")); // prefix must be "anon-"
    }
}
