use async_trait::async_trait;
use time::OffsetDateTime;

use crate::models::billing::{SubscriptionUpdate, UserBillingRecord};

/// Persistence boundary for the billing core: the per-user billing record
/// plus the processed-event ledger. The two tables are independent; the only
/// coupling is that `apply_event` commits the state mutation and the ledger
/// insert as one transaction.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn find_record(&self, user_id: &str) -> Result<Option<UserBillingRecord>, sqlx::Error>;

    /// Lazily provisions the billing record with status `free`. Existing
    /// records are returned unchanged (the email is only filled in if absent).
    async fn get_or_create_record(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<UserBillingRecord, sqlx::Error>;

    /// Set-once: a customer id already on the record is never overwritten.
    async fn set_stripe_customer_id(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), sqlx::Error>;

    async fn find_user_id_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error>;

    async fn find_user_id_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<String>, sqlx::Error>;

    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error>;

    /// Atomically records `event_id` in the ledger and applies the update to
    /// the user's record. Returns `false` without mutating anything when the
    /// event id is already present; two racing deliveries of the same id are
    /// serialized on the ledger's primary key so at most one applies.
    async fn apply_event(
        &self,
        event_id: &str,
        event_type: &str,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error>;

    /// The single shared state-write routine; reconciliation uses it directly
    /// (no ledger row, since the write is derived from a pull, not an event).
    async fn apply_subscription_update(
        &self,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<(), sqlx::Error>;

    /// Storage hygiene only; ledger rows are not needed for correctness after
    /// Stripe's redelivery window has passed.
    async fn prune_processed_events_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<u64, sqlx::Error>;
}
