//! Subscription billing through a Stripe-compatible payment processor.
//!
//! Two directions:
//!
//! - **Outbound**: [`PaymentProvider::create_checkout`] opens a hosted
//!   checkout session for a price, tagged with the user id as client
//!   reference.
//! - **Inbound**: the processor posts signed webhook events.
//!   [`verify_signature`] checks the `Stripe-Signature` header and
//!   [`handle_event`] mirrors customers and subscriptions into the
//!   [`SubscriptionStore`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use archmen_core::models::Subscription;
use archmen_core::store::SubscriptionStore;

use crate::config::BillingConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub user_id: &'a str,
    pub price_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest<'_>) -> Result<CheckoutSession>;
}

pub struct DisabledPaymentProvider;

#[async_trait]
impl PaymentProvider for DisabledPaymentProvider {
    async fn create_checkout(&self, _request: &CheckoutRequest<'_>) -> Result<CheckoutSession> {
        bail!("Billing is disabled. Set [billing] provider in config.")
    }
}

pub struct StripeProvider {
    client: reqwest::Client,
    endpoint: String,
    secret_key: String,
}

impl StripeProvider {
    pub fn new(config: &BillingConfig) -> Result<Self> {
        let secret_key = std::env::var(&config.secret_key_env)
            .with_context(|| format!("{} environment variable not set", config.secret_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build billing HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/checkout/sessions", config.url.trim_end_matches('/')),
            secret_key,
        })
    }
}

#[derive(Deserialize)]
struct StripeCheckoutResponse {
    id: String,
    url: Option<String>,
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_checkout(&self, request: &CheckoutRequest<'_>) -> Result<CheckoutSession> {
        let form = [
            ("mode", "subscription"),
            ("line_items[0][price]", request.price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("client_reference_id", request.user_id),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .context("checkout request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Payment API error {}: {}", status, text);
        }

        let parsed: StripeCheckoutResponse =
            response.json().await.context("invalid checkout response")?;
        let url = parsed
            .url
            .context("checkout session response has no url")?;
        Ok(CheckoutSession { id: parsed.id, url })
    }
}

pub fn create_payment_provider(config: &BillingConfig) -> Result<Arc<dyn PaymentProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledPaymentProvider)),
        "stripe" => Ok(Arc::new(StripeProvider::new(config)?)),
        other => bail!("Unknown billing provider: {}", other),
    }
}

// ============ Webhooks ============

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    BadSignature,
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>…]`).
///
/// The signed payload is `"{t}.{body}"`. Any `v1` entry matching the
/// HMAC-SHA256 of it under `secret` is accepted, provided `t` lies within
/// `tolerance_secs` of `now`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let ts_str = timestamp.ok_or(WebhookError::MalformedHeader)?;
    let ts: i64 = ts_str.parse().map_err(|_| WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now - ts).abs() > tolerance_secs {
        return Err(WebhookError::Expired);
    }

    for sig in signatures {
        let Ok(expected) = hex::decode(sig) else {
            continue;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MissingSecret)?;
        mac.update(ts_str.as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(WebhookError::BadSignature)
}

/// Compute a header value for `body`. Used by tests and local tooling.
pub fn sign_payload(secret: &str, body: &[u8], timestamp: i64) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct CheckoutObject {
    customer: Option<String>,
    client_reference_id: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<SubscriptionItems>,
}

#[derive(Deserialize)]
struct SubscriptionItems {
    data: Vec<SubscriptionItem>,
}

#[derive(Deserialize)]
struct SubscriptionItem {
    price: Option<PriceRef>,
}

#[derive(Deserialize)]
struct PriceRef {
    id: String,
}

/// What a webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    CustomerLinked { customer_id: String, user_id: String },
    SubscriptionSynced { subscription_id: String, status: String },
    Ignored(String),
}

fn parse_object<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, WebhookError> {
    serde_json::from_value(value).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

/// Apply a verified webhook event to the subscription store.
pub async fn handle_event(
    store: &dyn SubscriptionStore,
    body: &[u8],
) -> Result<EventOutcome, HandleError> {
    let envelope: EventEnvelope = serde_json::from_slice(body)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    match envelope.event_type.as_str() {
        "checkout.session.completed" => {
            let obj: CheckoutObject = parse_object(envelope.data.object)?;
            match (obj.customer, obj.client_reference_id) {
                (Some(customer_id), Some(user_id)) => {
                    store.link_customer(&customer_id, &user_id).await?;
                    tracing::info!(%customer_id, %user_id, "linked billing customer");
                    Ok(EventOutcome::CustomerLinked {
                        customer_id,
                        user_id,
                    })
                }
                _ => Ok(EventOutcome::Ignored(envelope.event_type)),
            }
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let obj: SubscriptionObject = parse_object(envelope.data.object)?;
            let user_id = store.user_for_customer(&obj.customer).await?;
            let price_id = obj
                .items
                .and_then(|items| items.data.into_iter().next())
                .and_then(|item| item.price)
                .map(|p| p.id);
            let subscription = Subscription {
                subscription_id: obj.id,
                customer_id: obj.customer,
                user_id,
                status: obj.status,
                price_id,
                current_period_end: obj
                    .current_period_end
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
                updated_at: Utc::now(),
            };
            store.upsert_subscription(&subscription).await?;
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                status = %subscription.status,
                "synced subscription"
            );
            Ok(EventOutcome::SubscriptionSynced {
                subscription_id: subscription.subscription_id,
                status: subscription.status,
            })
        }
        other => {
            tracing::debug!(event_type = other, "ignoring webhook event");
            Ok(EventOutcome::Ignored(envelope.event_type))
        }
    }
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use archmen_core::store::memory::InMemoryStore;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"type":"ping"}"#;
        let header = sign_payload(SECRET, body, 1_700_000_000);
        assert_eq!(
            verify_signature(SECRET, &header, body, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_signature_rejections() {
        let body = br#"{"type":"ping"}"#;
        let header = sign_payload(SECRET, body, 1_700_000_000);
        assert_eq!(
            verify_signature("other", &header, body, 300, 1_700_000_000),
            Err(WebhookError::BadSignature)
        );
        assert_eq!(
            verify_signature(SECRET, &header, b"{}", 300, 1_700_000_000),
            Err(WebhookError::BadSignature)
        );
        assert_eq!(
            verify_signature(SECRET, &header, body, 300, 1_700_000_301),
            Err(WebhookError::Expired)
        );
        assert_eq!(
            verify_signature(SECRET, "garbage", body, 300, 0),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let body = b"{}";
        let good = sign_payload(SECRET, body, 10);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=10,v1=deadbeef,v1={}", good_sig);
        assert_eq!(verify_signature(SECRET, &header, body, 300, 10), Ok(()));
    }

    #[tokio::test]
    async fn test_checkout_then_subscription() {
        let store = InMemoryStore::new();
        let checkout = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_1","customer":"cus_1","client_reference_id":"user-1"}}}"#;
        let outcome = handle_event(&store, checkout).await.unwrap();
        assert!(matches!(outcome, EventOutcome::CustomerLinked { .. }));

        let sub = br#"{"type":"customer.subscription.updated","data":{"object":{"id":"sub_1","customer":"cus_1","status":"active","current_period_end":1893456000,"items":{"data":[{"price":{"id":"price_pro"}}]}}}}"#;
        handle_event(&store, sub).await.unwrap();

        let stored = store.subscription_for_user("user-1").await.unwrap().unwrap();
        assert_eq!(stored.subscription_id, "sub_1");
        assert_eq!(stored.price_id.as_deref(), Some("price_pro"));
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_unknown_event_ignored() {
        let store = InMemoryStore::new();
        let body = br#"{"type":"invoice.paid","data":{"object":{}}}"#;
        assert_eq!(
            handle_event(&store, body).await.unwrap(),
            EventOutcome::Ignored("invoice.paid".into())
        );
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let store = InMemoryStore::new();
        let err = handle_event(&store, b"not json").await.unwrap_err();
        assert!(matches!(err, HandleError::Webhook(WebhookError::InvalidPayload(_))));
    }
}
