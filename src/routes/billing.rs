use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, warn};

use crate::responses::JsonResponse;
use crate::services::billing::{BillingError, IngestError};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub user_id: String,
    pub email: String,
    /// Falls back to the configured default price when absent.
    pub price_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub user_id: String,
}

// POST /api/billing/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    // The raw body goes to verification untouched; parsing happens after.
    match app_state.billing.ingest(&body, sig).await {
        Ok(()) => Json(serde_json::json!({ "received": true })).into_response(),
        Err(IngestError::BadSignature(err)) => {
            warn!(error = %err, "stripe webhook verification failed");
            (StatusCode::BAD_REQUEST, "invalid webhook").into_response()
        }
        Err(err) => {
            // 5xx asks Stripe to redeliver; the ledger makes the retry safe.
            error!(%err, "failed to process stripe event");
            JsonResponse::server_error("Failed to process billing event").into_response()
        }
    }
}

// POST /api/billing/checkout
pub async fn create_checkout(
    State(app_state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Response {
    let price_id = req
        .price_id
        .unwrap_or_else(|| app_state.config.stripe.price_id.clone());
    let origin = &app_state.config.frontend_origin;
    let success_url = format!("{origin}/subscribe/success?session_id={{CHECKOUT_SESSION_ID}}");
    let cancel_url = format!("{origin}/subscribe");

    match app_state
        .billing
        .create_checkout_session(&req.user_id, &req.email, &price_id, success_url, cancel_url)
        .await
    {
        Ok(session) => match session.url {
            Some(url) => Json(serde_json::json!({ "checkoutUrl": url })).into_response(),
            None => {
                error!(user_id = %req.user_id, session_id = %session.id, "checkout session created without redirect url");
                JsonResponse::server_error("Failed to start checkout").into_response()
            }
        },
        Err(err) => {
            error!(%err, user_id = %req.user_id, "failed to create checkout session");
            JsonResponse::server_error("Failed to start checkout").into_response()
        }
    }
}

// POST /api/billing/portal
pub async fn create_portal(
    State(app_state): State<AppState>,
    Json(req): Json<PortalRequest>,
) -> Response {
    let origin = &app_state.config.frontend_origin;
    let return_url = format!("{origin}/settings");

    match app_state
        .billing
        .create_portal_session(&req.user_id, &return_url)
        .await
    {
        Ok(session) => Json(serde_json::json!({ "portalUrl": session.url })).into_response(),
        Err(BillingError::NoBillingAccount) => {
            JsonResponse::not_found("No billing account found").into_response()
        }
        Err(err) => {
            error!(%err, user_id = %req.user_id, "failed to create portal session");
            JsonResponse::server_error("Failed to open billing portal").into_response()
        }
    }
}

// GET /api/billing/status?user_id=
pub async fn get_status(
    State(app_state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match app_state.billing.billing_status(&query.user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            error!(%err, user_id = %query.user_id, "failed to load billing status");
            JsonResponse::server_error("Failed to load billing status").into_response()
        }
    }
}

// POST /api/billing/sync
pub async fn sync_subscription(
    State(app_state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> Response {
    match app_state.billing.reconcile(&req.user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            error!(%err, user_id = %req.user_id, "failed to sync subscription state");
            JsonResponse::server_error("Failed to sync subscription").into_response()
        }
    }
}

// GET /api/billing/config — public, non-sensitive client bootstrap values
pub async fn get_config(State(app_state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "publishableKey": app_state.config.stripe.publishable_key,
        "priceId": app_state.config.stripe.price_id,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StripeSettings};
    use crate::db::mock_billing_repository::MockBillingRepository;
    use crate::models::billing::SubscriptionStatus;
    use crate::services::billing::BillingService;
    use crate::services::stripe::{MockStripeService, SubscriptionInfo};
    use crate::state::AppState;
    use axum::extract::State as AxumState;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: String::new(),
            frontend_origin: "https://app.example.test".into(),
            stripe: StripeSettings {
                secret_key: "sk_test_stub".into(),
                publishable_key: "pk_test_stub".into(),
                webhook_secret: "whsec_stub".into(),
                price_id: "price_default".into(),
            },
        })
    }

    fn test_state(repo: &MockBillingRepository, stripe: &MockStripeService) -> AppState {
        AppState {
            billing: Arc::new(BillingService::new(
                Arc::new(repo.clone()),
                Arc::new(stripe.clone()),
            )),
            config: test_config(),
        }
    }

    fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=stub"));
        headers
    }

    fn subscription_body(event_id: &str, status: &str) -> axum::body::Bytes {
        axum::body::Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "id": event_id,
                "type": "customer.subscription.updated",
                "data": { "object": {
                    "id": "sub_1",
                    "customer": "cus_1",
                    "status": status,
                    "current_period_end": 1_700_000_000i64,
                } }
            }))
            .unwrap(),
        )
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn webhook_applies_event_and_acks() {
        let repo = MockBillingRepository::new().with_record(MockBillingRepository::seed_record(
            "user-1",
            Some("cus_1"),
            Some("sub_1"),
            SubscriptionStatus::Free,
        ));
        let stripe = MockStripeService::new();

        let resp = webhook(
            AxumState(test_state(&repo, &stripe)),
            signed_headers(),
            subscription_body("evt_1", "active"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["received"], true);
        assert_eq!(
            repo.record("user-1").unwrap().subscription_status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn webhook_missing_signature_header_is_rejected() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new();

        let resp = webhook(
            AxumState(test_state(&repo, &stripe)),
            HeaderMap::new(),
            subscription_body("evt_1", "active"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(repo.processed_event_count(), 0);
    }

    #[tokio::test]
    async fn webhook_invalid_signature_is_rejected() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new().with_failing_verification();

        let resp = webhook(
            AxumState(test_state(&repo, &stripe)),
            signed_headers(),
            subscription_body("evt_1", "active"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(repo.processed_event_count(), 0);
    }

    #[tokio::test]
    async fn webhook_redelivery_acks_with_single_application() {
        let repo = MockBillingRepository::new().with_record(MockBillingRepository::seed_record(
            "user-1",
            Some("cus_1"),
            Some("sub_1"),
            SubscriptionStatus::Free,
        ));
        let stripe = MockStripeService::new();

        for _ in 0..2 {
            let resp = webhook(
                AxumState(test_state(&repo, &stripe)),
                signed_headers(),
                subscription_body("evt_dup", "active"),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        assert_eq!(repo.processed_event_count(), 1);
        assert_eq!(*repo.state_writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn status_reports_plan_name() {
        let repo = MockBillingRepository::new().with_record(MockBillingRepository::seed_record(
            "user-1",
            Some("cus_1"),
            Some("sub_1"),
            SubscriptionStatus::Active,
        ));
        let stripe = MockStripeService::new();

        let resp = get_status(
            AxumState(test_state(&repo, &stripe)),
            Query(StatusQuery {
                user_id: "user-1".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "active");
        assert_eq!(json["planName"], "Noor Plus");
    }

    #[tokio::test]
    async fn status_for_unknown_user_is_free() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new();

        let resp = get_status(
            AxumState(test_state(&repo, &stripe)),
            Query(StatusQuery {
                user_id: "user-absent".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "free");
        assert_eq!(json["planName"], "Free");
    }

    #[tokio::test]
    async fn checkout_uses_default_price_and_returns_url() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new();

        let resp = create_checkout(
            AxumState(test_state(&repo, &stripe)),
            Json(CheckoutRequest {
                user_id: "user-1".into(),
                email: "user@example.test".into(),
                price_id: None,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["checkoutUrl"], "https://example.test/checkout");

        let captured = stripe.last_create_requests.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].price, "price_default");
        assert!(captured[0]
            .success_url
            .starts_with("https://app.example.test/subscribe/success"));
    }

    #[tokio::test]
    async fn portal_without_account_is_not_found() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new();

        let resp = create_portal(
            AxumState(test_state(&repo, &stripe)),
            Json(PortalRequest {
                user_id: "user-1".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_converges_record_with_gateway() {
        let repo = MockBillingRepository::new().with_record(MockBillingRepository::seed_record(
            "user-1",
            Some("cus_1"),
            None,
            SubscriptionStatus::Canceled,
        ));
        let stripe = MockStripeService::new().with_subscription(SubscriptionInfo {
            id: "sub_9".into(),
            status: "active".into(),
            current_period_end: Some(1_700_000_000),
        });

        let resp = sync_subscription(
            AxumState(test_state(&repo, &stripe)),
            Json(SyncRequest {
                user_id: "user-1".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "active");
        assert_eq!(
            repo.record("user-1").unwrap().subscription_status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn config_exposes_client_bootstrap_values() {
        let repo = MockBillingRepository::new();
        let stripe = MockStripeService::new();

        let resp = get_config(AxumState(test_state(&repo, &stripe))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["publishableKey"], "pk_test_stub");
        assert_eq!(json["priceId"], "price_default");
    }
}
