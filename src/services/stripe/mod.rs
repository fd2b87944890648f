// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper,
// checkout, webhook-events, billing for portal/subscription APIs, and connect to
// satisfy webhook payload types). Touching APIs outside those features requires
// updating Cargo.toml explicitly.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        StripeServiceError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for StripeServiceError {
    fn from(err: stripe::WebhookError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

/// Subscription-mode Checkout session parameters. The service only sells
/// subscriptions, so there is no mode field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub customer: String,
    pub price: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// A verified webhook event: id, type, and the raw payload for path lookups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    /// Raw Stripe status string; normalization happens in the state machine.
    pub status: String,
    /// Unix timestamp (seconds) when the current period ends
    pub current_period_end: Option<i64>,
}

/// Gateway boundary. Injected everywhere (never a module-level singleton) so
/// tests can substitute [`MockStripeService`].
#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<String, StripeServiceError>;

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError>;

    /// Verifies the signature over the exact raw bytes. Callers must pass the
    /// unparsed request body; any re-serialization invalidates verification.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError>;

    /// Most recent subscription for the customer regardless of status, or
    /// None when the customer has never subscribed.
    async fn most_recent_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionInfo>, StripeServiceError>;
}

mod live;
mod mock;

pub use live::LiveStripeService;
pub use mock::MockStripeService;
