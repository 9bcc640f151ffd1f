//! Forge webhook endpoint: constant-time signature check over the raw
//! body, then hand `pull_request` events to the build service.

use actix_web::{web, HttpRequest, HttpResponse};
use tracing::info;

use github::types::PullRequestEvent;
use github::verify_signature;
use shared::ApiError;

use crate::AppState;

pub async fn forge_webhook(
    state: web::Data<AppState>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    // Prefer the SHA-256 header; fall back to the legacy SHA-1 one.
    let signature = request
        .headers()
        .get("x-hub-signature-256")
        .or_else(|| request.headers().get("x-hub-signature"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing signature header"))?;

    verify_signature(&state.webhook_secret, &body, signature)
        .map_err(|_| ApiError::bad_request("signature verification failed"))?;

    let event_type = request
        .headers()
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match event_type {
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_slice(&body)
                .map_err(|e| ApiError::bad_request(format!("malformed event: {e}")))?;
            info!(
                action = %event.action,
                pr = event.number,
                repo = %event.repository.full_name,
                "pull request event"
            );
            state.service.on_pull_request_event(&event).await?;
        }
        other => {
            // Other event families are accepted and dropped.
            info!(event = %other, "ignoring event type");
        }
    }

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use github::signature::sign_sha256;
    use github::verify_signature;

    #[test]
    fn header_preference_matches_signature_module() {
        let body = br#"{"action":"opened"}"#;
        let header = sign_sha256("secret", body);
        assert!(verify_signature("secret", body, &header).is_ok());
        assert!(verify_signature("other", body, &header).is_err());
    }
}
