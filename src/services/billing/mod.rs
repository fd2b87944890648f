use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::billing_repository::BillingRepository;
use crate::models::billing::{BillingStatus, SubscriptionStatus, SubscriptionUpdate};
use crate::services::stripe::{
    CheckoutSession, CreateCheckoutSessionRequest, PortalSession, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo,
};

/// Outcome of webhook ingestion. `BadSignature` must answer 4xx so Stripe
/// does not retry a request that can never verify; `TransientFailure` must
/// answer 5xx so Stripe redelivers and the pipeline re-enters at the dedup
/// check.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("webhook signature verification failed: {0}")]
    BadSignature(String),
    #[error("transient ingestion failure: {0}")]
    TransientFailure(String),
    #[error("ingestion failure: {0}")]
    Unhandled(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("stripe error: {0}")]
    Stripe(#[from] StripeServiceError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("no billing account found")]
    NoBillingAccount,
}

fn db_ingest_err(err: sqlx::Error) -> IngestError {
    IngestError::TransientFailure(err.to_string())
}

fn stripe_ingest_err(err: StripeServiceError) -> IngestError {
    match err {
        // API failures during dispatch happen before the ledger write, so a
        // redelivery retries the whole pipeline safely.
        StripeServiceError::Api(msg) => IngestError::TransientFailure(msg),
        other => IngestError::Unhandled(other.to_string()),
    }
}

// Small helper: nested json lookup
fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

fn extract_i64(val: &serde_json::Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

/// Checkout session payloads carry the user id in metadata (we set it when
/// creating the session), used as a fallback when the customer id has not
/// been persisted yet.
fn extract_checkout_user_id(payload: &serde_json::Value) -> Option<String> {
    extract_str(payload, &["data", "object", "metadata", "user_id"])
        .or_else(|| extract_str(payload, &["data", "object", "client_reference_id"]))
        .map(str::to_string)
}

fn period_end_from_unix(ts: Option<i64>) -> Option<OffsetDateTime> {
    ts.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
}

/// The billing core: webhook ingestion, reconciliation, and the thin
/// checkout/portal initiators. Gateway and storage are injected traits so
/// every path is testable against fakes.
pub struct BillingService {
    repo: Arc<dyn BillingRepository>,
    stripe: Arc<dyn StripeService>,
}

impl BillingService {
    pub fn new(repo: Arc<dyn BillingRepository>, stripe: Arc<dyn StripeService>) -> Self {
        Self { repo, stripe }
    }

    /// Both convergence paths (webhook dispatch and reconciliation) build
    /// their write through this one constructor, so they cannot disagree on
    /// what a gateway status means.
    fn subscription_update(sub: &SubscriptionInfo) -> SubscriptionUpdate {
        SubscriptionUpdate {
            stripe_subscription_id: Some(sub.id.clone()),
            status: SubscriptionStatus::from_stripe(&sub.status),
            current_period_end: period_end_from_unix(sub.current_period_end),
        }
    }

    /// Turns one inbound, possibly-duplicated, possibly-out-of-order gateway
    /// notification into at most one state mutation.
    pub async fn ingest(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), IngestError> {
        let event = self
            .stripe
            .verify_webhook(payload, signature_header)
            .map_err(|err| IngestError::BadSignature(err.to_string()))?;

        // Duplicate delivery is expected, not an error; ack silently.
        if self
            .repo
            .has_processed_event(&event.id)
            .await
            .map_err(db_ingest_err)?
        {
            info!(event_id = %event.id, event_type = %event.r#type, "duplicate stripe event acknowledged");
            return Ok(());
        }

        match event.r#type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.handle_subscription_change(&event).await
            }
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await,
            other => {
                // Forward compatibility: unknown event types are acked without
                // a ledger row since no state was touched.
                info!(event_type = other, "unhandled stripe event acknowledged");
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> Result<(), IngestError> {
        let payload = &event.payload;
        let Some(customer_id) = extract_str(payload, &["data", "object", "customer"]) else {
            warn!(event_id = %event.id, "checkout completion missing customer id");
            return Ok(());
        };
        let Some(subscription_id) = extract_str(payload, &["data", "object", "subscription"])
        else {
            warn!(event_id = %event.id, "checkout completion missing subscription id");
            return Ok(());
        };

        let user_id = match self
            .repo
            .find_user_id_by_customer(customer_id)
            .await
            .map_err(db_ingest_err)?
        {
            Some(id) => Some(id),
            None => extract_checkout_user_id(payload),
        };
        let Some(user_id) = user_id else {
            warn!(event_id = %event.id, customer_id, "unable to resolve user for checkout completion");
            return Ok(());
        };
        if self
            .repo
            .find_record(&user_id)
            .await
            .map_err(db_ingest_err)?
            .is_none()
        {
            // No ledger row: a redelivery after the record exists can still
            // apply, and reconciliation covers the gap regardless.
            warn!(%user_id, event_id = %event.id, "billing record missing for checkout completion");
            return Ok(());
        }

        self.repo
            .set_stripe_customer_id(&user_id, customer_id)
            .await
            .map_err(db_ingest_err)?;

        // Authoritative status comes from the subscription object, not the
        // session payload.
        let sub = self
            .stripe
            .retrieve_subscription(subscription_id)
            .await
            .map_err(stripe_ingest_err)?;
        let update = Self::subscription_update(&sub);

        let applied = self
            .repo
            .apply_event(&event.id, &event.r#type, &user_id, &update)
            .await
            .map_err(db_ingest_err)?;
        if applied {
            info!(%user_id, subscription_id, status = %update.status, "checkout completion applied");
        }
        Ok(())
    }

    async fn handle_subscription_change(&self, event: &StripeEvent) -> Result<(), IngestError> {
        let payload = &event.payload;
        let Some(subscription_id) = extract_str(payload, &["data", "object", "id"]) else {
            warn!(event_id = %event.id, "subscription event missing subscription id");
            return Ok(());
        };
        let raw_status = extract_str(payload, &["data", "object", "status"]).unwrap_or("unknown");
        let period_end = extract_i64(payload, &["data", "object", "current_period_end"]);

        let Some(user_id) = self
            .resolve_user_for_subscription(payload, subscription_id)
            .await
            .map_err(db_ingest_err)?
        else {
            warn!(event_id = %event.id, subscription_id, "subscription event received but user not identified");
            return Ok(());
        };

        // State derives from this payload alone (the mapping is memoryless),
        // so arrival order does not matter for correctness of any single
        // event. Between two racing events for the same subscription the last
        // write wins; a stale winner is repaired by the next reconcile.
        let update = SubscriptionUpdate {
            stripe_subscription_id: Some(subscription_id.to_string()),
            status: SubscriptionStatus::from_stripe(raw_status),
            current_period_end: period_end_from_unix(period_end),
        };

        let applied = self
            .repo
            .apply_event(&event.id, &event.r#type, &user_id, &update)
            .await
            .map_err(db_ingest_err)?;
        if applied {
            info!(%user_id, subscription_id, raw_status, status = %update.status, "subscription state applied");
        }
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &StripeEvent) -> Result<(), IngestError> {
        let payload = &event.payload;
        let Some(subscription_id) = extract_str(payload, &["data", "object", "id"]) else {
            warn!(event_id = %event.id, "subscription deletion missing subscription id");
            return Ok(());
        };

        let Some(user_id) = self
            .resolve_user_for_subscription(payload, subscription_id)
            .await
            .map_err(db_ingest_err)?
        else {
            warn!(event_id = %event.id, subscription_id, "subscription deletion received but user not identified");
            return Ok(());
        };

        let status = extract_str(payload, &["data", "object", "status"])
            .map(SubscriptionStatus::from_stripe)
            .unwrap_or(SubscriptionStatus::Canceled);
        let update = SubscriptionUpdate {
            stripe_subscription_id: None,
            status,
            current_period_end: None,
        };

        let applied = self
            .repo
            .apply_event(&event.id, &event.r#type, &user_id, &update)
            .await
            .map_err(db_ingest_err)?;
        if applied {
            info!(%user_id, subscription_id, "subscription deletion applied; reference cleared");
        }
        Ok(())
    }

    async fn resolve_user_for_subscription(
        &self,
        payload: &serde_json::Value,
        subscription_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        if let Some(user_id) = self
            .repo
            .find_user_id_by_subscription(subscription_id)
            .await?
        {
            return Ok(Some(user_id));
        }
        if let Some(customer_id) = extract_str(payload, &["data", "object", "customer"]) {
            return self.repo.find_user_id_by_customer(customer_id).await;
        }
        Ok(None)
    }

    /// Pull-based repair: forces the local record to match the gateway's
    /// current truth, independent of any webhook history. Safe to call any
    /// time; no record or no customer means there is nothing to reconcile.
    pub async fn reconcile(&self, user_id: &str) -> Result<BillingStatus, BillingError> {
        let Some(record) = self.repo.find_record(user_id).await? else {
            return Ok(BillingStatus::free());
        };
        let Some(customer_id) = record.stripe_customer_id else {
            return Ok(BillingStatus::free());
        };

        let Some(sub) = self
            .stripe
            .most_recent_subscription_for_customer(&customer_id)
            .await?
        else {
            return Ok(BillingStatus::free());
        };

        let update = Self::subscription_update(&sub);
        info!(
            user_id,
            subscription_id = %sub.id,
            raw_status = %sub.status,
            status = %update.status,
            "reconciling subscription state from stripe"
        );
        self.repo.apply_subscription_update(user_id, &update).await?;

        Ok(BillingStatus::from_status(update.status))
    }

    /// The only status surface other subsystems may consult.
    pub async fn billing_status(&self, user_id: &str) -> Result<BillingStatus, BillingError> {
        let record = self.repo.find_record(user_id).await?;
        Ok(record
            .map(|r| BillingStatus::from_status(r.subscription_status))
            .unwrap_or_else(BillingStatus::free))
    }

    /// Lazily provisions the billing record and Stripe customer, then asks
    /// the gateway for a hosted Checkout URL. Never writes subscription
    /// status; only the pipeline and reconciliation do that.
    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        email: &str,
        price_id: &str,
        success_url: String,
        cancel_url: String,
    ) -> Result<CheckoutSession, BillingError> {
        let record = self.repo.get_or_create_record(user_id, email).await?;

        let customer_id = match record.stripe_customer_id {
            Some(id) => id,
            None => {
                let id = self.stripe.create_customer(email, user_id).await?;
                info!(user_id, customer_id = %id, "created stripe customer");
                self.repo.set_stripe_customer_id(user_id, &id).await?;
                id
            }
        };

        let session = self
            .stripe
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer: customer_id,
                price: price_id.to_string(),
                success_url,
                cancel_url,
                metadata: Some(
                    [("user_id".to_string(), user_id.to_string())]
                        .into_iter()
                        .collect(),
                ),
            })
            .await?;

        info!(user_id, session_id = %session.id, "checkout session created");
        Ok(session)
    }

    pub async fn create_portal_session(
        &self,
        user_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, BillingError> {
        let customer_id = self
            .repo
            .find_record(user_id)
            .await?
            .and_then(|r| r.stripe_customer_id)
            .ok_or(BillingError::NoBillingAccount)?;

        Ok(self
            .stripe
            .create_portal_session(&customer_id, return_url)
            .await?)
    }
}
