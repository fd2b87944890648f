use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const PLAN_NAME_PLUS: &str = "Noor Plus";
pub const PLAN_NAME_FREE: &str = "Free";

/// Normalized subscription state. Only these four states are valid locally;
/// every Stripe-reported status collapses into one of them via
/// [`SubscriptionStatus::from_stripe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Free,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Maps a raw Stripe subscription status to the local state machine.
    /// Total over all inputs: unknown strings fall through to `Free`.
    pub fn from_stripe(raw: &str) -> Self {
        match raw {
            // Trialing counts as paid access
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "unpaid" | "incomplete" | "incomplete_expired" => {
                SubscriptionStatus::Canceled
            }
            _ => SubscriptionStatus::Free,
        }
    }

    /// Normalizes the stored text column; anything unrecognized reads as `Free`.
    pub fn from_db(stored: Option<&str>) -> Self {
        match stored {
            Some("active") => SubscriptionStatus::Active,
            Some("past_due") => SubscriptionStatus::PastDue,
            Some("canceled") => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Free => "free",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// The entitlement predicate. `past_due` keeps access (grace period while
    /// the user fixes payment) but is distinguishable from `active` so the
    /// client can prompt remediation. This is the only thing other subsystems
    /// may consult to gate paid features.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }

    pub fn plan_name(&self) -> &'static str {
        if *self == SubscriptionStatus::Active {
            PLAN_NAME_PLUS
        } else {
            PLAN_NAME_FREE
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `user_billing`. `user_id` is an opaque identifier owned by the
/// identity subsystem; rows are created lazily on first billing interaction
/// and never deleted.
#[derive(Debug, Clone)]
pub struct UserBillingRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// The full set of fields a state write sets. Both the webhook pipeline and
/// the reconciliation job build one of these and hand it to the repository's
/// single write routine, so the two paths cannot disagree on what a gateway
/// status means. `stripe_subscription_id: None` clears the reference
/// (subscription deleted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
}

/// Client-facing view returned by the status and sync endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingStatus {
    pub status: SubscriptionStatus,
    pub plan_name: String,
}

impl BillingStatus {
    pub fn from_status(status: SubscriptionStatus) -> Self {
        Self {
            status,
            plan_name: status.plan_name().to_string(),
        }
    }

    pub fn free() -> Self {
        Self::from_status(SubscriptionStatus::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_active_like_statuses_to_active() {
        assert_eq!(
            SubscriptionStatus::from_stripe("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("trialing"),
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn maps_past_due() {
        assert_eq!(
            SubscriptionStatus::from_stripe("past_due"),
            SubscriptionStatus::PastDue
        );
    }

    #[test]
    fn maps_terminal_statuses_to_canceled() {
        for raw in ["canceled", "unpaid", "incomplete", "incomplete_expired"] {
            assert_eq!(
                SubscriptionStatus::from_stripe(raw),
                SubscriptionStatus::Canceled,
                "raw status {raw} should map to canceled"
            );
        }
    }

    #[test]
    fn unknown_statuses_fall_through_to_free() {
        for raw in ["", "paused", "something_new", "ACTIVE"] {
            assert_eq!(SubscriptionStatus::from_stripe(raw), SubscriptionStatus::Free);
        }
    }

    #[test]
    fn mapping_is_deterministic() {
        for raw in ["active", "trialing", "past_due", "canceled", "nonsense"] {
            assert_eq!(
                SubscriptionStatus::from_stripe(raw),
                SubscriptionStatus::from_stripe(raw)
            );
        }
    }

    #[test]
    fn is_paid_matrix() {
        assert!(SubscriptionStatus::Active.is_paid());
        assert!(SubscriptionStatus::PastDue.is_paid());
        assert!(!SubscriptionStatus::Free.is_paid());
        assert!(!SubscriptionStatus::Canceled.is_paid());
    }

    #[test]
    fn from_db_normalizes_unknown_to_free() {
        assert_eq!(
            SubscriptionStatus::from_db(Some("active")),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_db(Some("garbage")),
            SubscriptionStatus::Free
        );
        assert_eq!(SubscriptionStatus::from_db(None), SubscriptionStatus::Free);
    }

    #[test]
    fn plan_name_only_upgrades_for_active() {
        assert_eq!(SubscriptionStatus::Active.plan_name(), PLAN_NAME_PLUS);
        assert_eq!(SubscriptionStatus::PastDue.plan_name(), PLAN_NAME_FREE);
        assert_eq!(SubscriptionStatus::Free.plan_name(), PLAN_NAME_FREE);
    }

    #[test]
    fn billing_status_serializes_camel_case() {
        let status = BillingStatus::from_status(SubscriptionStatus::Active);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["planName"], "Noor Plus");
    }
}
