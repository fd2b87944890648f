#![allow(dead_code)]
use super::{
    CheckoutSession, CreateCheckoutSessionRequest, PortalSession, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_customers: Arc<Mutex<Vec<(String, String)>>>,
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub portal_requests: Arc<Mutex<Vec<(String, String)>>>,
    pub events: Arc<Mutex<Vec<StripeEvent>>>,
    /// Newest first, matching Stripe's list ordering.
    pub subscriptions: Arc<Mutex<Vec<SubscriptionInfo>>>,
    pub fail_verification: Arc<Mutex<bool>>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(self, sub: SubscriptionInfo) -> Self {
        self.subscriptions.lock().unwrap().insert(0, sub);
        self
    }

    pub fn with_failing_verification(self) -> Self {
        *self.fail_verification.lock().unwrap() = true;
        self
    }
}

fn make_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}_{}", prefix, ts)
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_customer(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<String, StripeServiceError> {
        let id = make_id("cus_test");
        self.created_customers
            .lock()
            .unwrap()
            .push((email.to_string(), user_id.to_string()));
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.last_create_requests.lock().unwrap().push(req.clone());

        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError> {
        self.portal_requests
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        Ok(PortalSession {
            id: make_id("bps_test"),
            url: "https://example.test/portal".into(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if *self.fail_verification.lock().unwrap() {
            return Err(StripeServiceError::Webhook(
                "signature mismatch".to_string(),
            ));
        }
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let id = match val.get("id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => make_id("evt"),
        };
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let evt = StripeEvent {
            id,
            r#type: ty,
            payload: val,
        };
        self.events.lock().unwrap().push(evt.clone());
        Ok(evt)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
            .ok_or_else(|| {
                StripeServiceError::NotFound(format!(
                    "subscription {} not found",
                    subscription_id
                ))
            })
    }

    async fn most_recent_subscription_for_customer(
        &self,
        _customer_id: &str,
    ) -> Result<Option<SubscriptionInfo>, StripeServiceError> {
        Ok(self.subscriptions.lock().unwrap().first().cloned())
    }
}
