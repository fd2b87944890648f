use super::{
    CheckoutSession, CreateCheckoutSessionRequest, PortalSession, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo,
};
use async_trait::async_trait;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }
}

fn subscription_info(sub: &stripe::Subscription) -> SubscriptionInfo {
    SubscriptionInfo {
        id: sub.id.to_string(),
        status: sub.status.to_string(),
        current_period_end: Some(sub.current_period_end),
    }
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_customer(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        // user_id in metadata lets support trace a customer back without DB access
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        params.metadata = Some(metadata);

        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);

        let cid = req
            .customer
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        params.customer = Some(cid);

        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(req.price.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);

        if let Some(ref meta) = req.metadata {
            let mut m = std::collections::HashMap::new();
            for (k, v) in meta.iter() {
                m.insert(k.clone(), v.clone());
            }
            params.metadata = Some(m);
        }

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError> {
        let cid = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;

        let mut params = stripe::CreateBillingPortalSession::new(cid);
        params.return_url = Some(return_url);

        let session = stripe::BillingPortalSession::create(&self.client, params).await?;
        Ok(PortalSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let event =
            stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        let payload =
            serde_json::to_value(&event).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        Ok(StripeEvent {
            id: event.id.to_string(),
            r#type: event.type_.to_string(),
            payload,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let sub = stripe::Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        Ok(subscription_info(&sub))
    }

    async fn most_recent_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionInfo>, StripeServiceError> {
        let cust_id = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;

        // status=all so canceled subscriptions are visible; Stripe lists
        // newest first, and reconciliation only needs the most recent one.
        let mut list_params = stripe::ListSubscriptions::new();
        list_params.customer = Some(cust_id);
        list_params.status = Some(stripe::SubscriptionStatusFilter::All);
        list_params.limit = Some(1);

        let subs = stripe::Subscription::list(&self.client, &list_params).await?;
        Ok(subs.data.first().map(subscription_info))
    }
}
