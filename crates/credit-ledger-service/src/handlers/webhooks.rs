//! Stripe webhook ingress.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::crypto::verify_stripe_signature;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::WebhookEvent;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
///
/// The signature is checked against the raw body before parsing. Events the
/// synchronizer does not recognize are acknowledged so Stripe stops
/// redelivering them; errors return a non-2xx status so it retries.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

        verify_stripe_signature(secret, &body, signature, Utc::now().timestamp()).map_err(
            |e| {
                tracing::warn!(error = %e, "Invalid Stripe webhook signature");
                ApiError::BadRequest("Invalid webhook signature".into())
            },
        )?;
    } else {
        tracing::warn!("Stripe webhook_secret not configured - skipping signature verification");
    }

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    let outcome = state.synchronizer.handle_event(&event).await?;
    tracing::debug!(event_id = %event.id, outcome = ?outcome, "Stripe webhook applied");

    Ok(Json(WebhookResponse { received: true }))
}
