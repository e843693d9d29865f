//! Webhook handler for Gitea push events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::SharedState;
use crate::error::WebhookError;
use crate::job::RunOutcome;
use crate::logging::{DEFAULT_LOG_DIRECTORY, LOG_FILE_NAME, LogLevel};
use crate::signature::verify_signature;
use crate::webhook::{GITEA_SIGNATURE_HEADER, HUB_SIGNATURE_HEADER, WebhookEvent};

/// Usage text for a GET on the webhook path
pub async fn webhook_info() -> Json<Value> {
    Json(json!({
        "message": "Gitea Webhook Endpoint",
        "method": "POST required",
        "usage": "Send POST request with Gitea webhook payload",
    }))
}

/// Handles the Gitea webhook POST request.
///
/// Authenticates the raw body, ignores pushes to other branches, and for the
/// tracked branch answers right away while the deployment runs in the
/// background.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let log = state.event_log.as_ref();

    let signature = match headers
        .get(GITEA_SIGNATURE_HEADER)
        .or_else(|| headers.get(HUB_SIGNATURE_HEADER))
    {
        Some(value) => value.to_str().unwrap_or_default(),
        None => {
            log.append(LogLevel::Error, "Missing signature header");
            return Err(WebhookError::MissingSignature);
        }
    };

    if !verify_signature(&body, signature, &state.config.webhook_secret) {
        log.append(LogLevel::Error, "Signature verification failed");
        return Err(WebhookError::InvalidSignature);
    }

    let event = WebhookEvent::from_payload(&body).map_err(|e| {
        log.append(LogLevel::Error, &format!("Failed to handle webhook: {}", e));
        e
    })?;
    debug!("{:?}", event);

    let tracked = state.config.git_branch.as_str();
    if !event.targets_branch(tracked) {
        log.append(
            LogLevel::Info,
            &format!(
                "Skipping push that is not for {} ({})",
                tracked,
                event.branch_ref.as_deref().unwrap_or("no ref")
            ),
        );
        return Ok(Json(json!({ "message": "ignored", "reason": "wrong branch" })));
    }

    let repository = event.repository().map_err(|e| {
        log.append(LogLevel::Error, &format!("Failed to handle webhook: {}", e));
        e
    })?;
    log.append(
        LogLevel::Success,
        &format!("Received push event: {} - {}", repository, tracked),
    );

    spawn_deployment(state.clone());

    Ok(Json(json!({
        "message": "ok",
        "status": "building",
        "log": format!("tail -f {}/{}", DEFAULT_LOG_DIRECTORY, LOG_FILE_NAME),
    })))
}

/// Detach the pipeline from the request. Runs against the shared working
/// directory are serialized by `deploy_lock`.
fn spawn_deployment(state: SharedState) {
    tokio::spawn(async move {
        let _guard = state.deploy_lock.lock().await;
        let run = state.pipeline.run(state.event_log.as_ref()).await;

        let elapsed = run
            .completed_at
            .map(|done| (done - run.started_at).num_milliseconds())
            .unwrap_or_default();
        match &run.outcome {
            RunOutcome::Success => info!("Deployment {} succeeded in {}ms", run.id, elapsed),
            outcome => info!("Deployment {} ended as {:?} after {}ms", run.id, outcome, elapsed),
        }
    });
}
