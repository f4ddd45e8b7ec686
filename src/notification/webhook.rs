use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::validation_request::{RequestStatus, ValidationRequest};

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationEvent {
    /// Event type identifier, e.g. "validation_requested", "validation_rejected".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub request_id: String,
    pub action_type: String,
    pub resource_id: String,
    pub resource_name: String,
    /// Event-specific details (actors, reasons, deadlines).
    pub details: serde_json::Value,
}

impl ValidationEvent {
    fn base(event_type: &str, request: &ValidationRequest, details: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: request.id.clone(),
            action_type: request.action_type.as_str().to_string(),
            resource_id: request.resource_id.clone(),
            resource_name: request.resource_name.clone(),
            details,
        }
    }

    pub fn requested(request: &ValidationRequest) -> Self {
        Self::base(
            "validation_requested",
            request,
            serde_json::json!({
                "initiated_by": request.initiated_by.id,
                "assigned_approver": request.assigned_approver,
                "reason": request.reason,
                "expires_at": request.expires_at.to_rfc3339(),
            }),
        )
    }

    /// Event for a request that just reached a terminal state; `None`
    /// while it is still pending.
    pub fn decided(request: &ValidationRequest) -> Option<Self> {
        let event_type = match request.status {
            RequestStatus::Accepted => "validation_accepted",
            RequestStatus::Rejected => "validation_rejected",
            RequestStatus::Expired => "validation_expired",
            RequestStatus::Pending => return None,
        };
        Some(Self::base(
            event_type,
            request,
            serde_json::json!({
                "assigned_approver": request.assigned_approver,
                "rejection_reason": request.rejection_reason,
                "decided_at": request.decided_at.map(|t| t.to_rfc3339()),
                "expires_at": request.expires_at.to_rfc3339(),
            }),
        ))
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook secret: {}", e))?;
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    Ok(format!("sha256={}", hex::encode(bytes)))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches validation events to the configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Tontine-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Tontine-Webhook/1.0")
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default webhook HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            urls,
            signing_secret,
        }
    }

    /// A notifier with no targets; every dispatch is a no-op.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    /// Send a signed event to a single URL with retry.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &ValidationEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.signing_secret {
            Some(secret) => Some(hmac_sha256_hex(secret, &payload)?),
            None => None,
        };

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-tontine-delivery-id", &delivery_id)
                .header("x-tontine-timestamp", &timestamp)
                .header("x-tontine-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-tontine-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!("webhook delivery failed after 3 retries: {}", url))
    }

    /// Dispatch an event to all configured URLs (fire-and-forget).
    /// Each URL is attempted independently; failures never reach the caller.
    pub fn dispatch(&self, event: ValidationEvent) {
        if !self.is_enabled() {
            return;
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            for url in &notifier.urls {
                if let Err(e) = notifier.send(url, &event).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
