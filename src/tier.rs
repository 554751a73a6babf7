//! Tier policy: pure map from subscription tier to limits and routing.

use serde::{Deserialize, Serialize};

/// Queue class a job is routed to; runtime weighting determines the share
/// of worker time each class gets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Critical,
    Default,
    Low,
}

impl PriorityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "default" => Some(Self::Default),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Limits attached to a subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub conversion_minutes_per_period: i64,
    pub max_file_size_bytes: i64,
    pub priority: PriorityClass,
    pub use_hardware_accel: bool,
}

const FREE: TierLimits = TierLimits {
    conversion_minutes_per_period: 50,
    max_file_size_bytes: 500 * 1024 * 1024,
    priority: PriorityClass::Default,
    use_hardware_accel: false,
};

/// Limits for a tier. Unknown or empty tiers fall back to `free`.
///
/// The recognized set is closed: free, basic, standard, pro. `basic` routes
/// to `critical` — the runtime has no distinct `high` queue.
pub fn limits_for(tier: &str) -> TierLimits {
    match tier {
        "basic" => TierLimits {
            conversion_minutes_per_period: 1500,
            max_file_size_bytes: 1536 * 1024 * 1024, // 1.5 GB
            priority: PriorityClass::Critical,
            use_hardware_accel: false,
        },
        "standard" => TierLimits {
            conversion_minutes_per_period: 2000,
            max_file_size_bytes: 2 * 1024 * 1024 * 1024,
            priority: PriorityClass::Critical,
            use_hardware_accel: false,
        },
        "pro" => TierLimits {
            conversion_minutes_per_period: 4000,
            max_file_size_bytes: 5 * 1024 * 1024 * 1024,
            priority: PriorityClass::Critical,
            use_hardware_accel: true,
        },
        _ => FREE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tier_defaults() {
        let limits = limits_for("free");
        assert_eq!(limits.conversion_minutes_per_period, 50);
        assert_eq!(limits.max_file_size_bytes, 500 * 1024 * 1024);
        assert_eq!(limits.priority, PriorityClass::Default);
        assert!(!limits.use_hardware_accel);
    }

    #[test]
    fn test_unknown_tier_falls_back_to_free() {
        assert_eq!(limits_for(""), limits_for("free"));
        assert_eq!(limits_for("enterprise"), limits_for("free"));
    }

    #[test]
    fn test_paid_tiers_route_to_critical() {
        assert_eq!(limits_for("basic").priority, PriorityClass::Critical);
        assert_eq!(limits_for("standard").priority, PriorityClass::Critical);
        assert_eq!(limits_for("pro").priority, PriorityClass::Critical);
    }

    #[test]
    fn test_only_pro_gets_hardware_accel() {
        assert!(limits_for("pro").use_hardware_accel);
        assert!(!limits_for("basic").use_hardware_accel);
        assert!(!limits_for("standard").use_hardware_accel);
    }

    #[test]
    fn test_priority_class_round_trip() {
        for class in [
            PriorityClass::Critical,
            PriorityClass::Default,
            PriorityClass::Low,
        ] {
            assert_eq!(PriorityClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(PriorityClass::parse("high"), None);
    }
}
