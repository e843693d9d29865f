//! Webhook related structures

use serde::Deserialize;

use crate::error::WebhookError;

/// Header Gitea puts the bare hex HMAC in
pub const GITEA_SIGNATURE_HEADER: &str = "X-Gitea-Signature";
/// GitHub-style fallback, value prefixed with `sha256=`
pub const HUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    branch_ref: Option<String>,
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: Option<String>,
}

/// Fields of a verified push event the dispatcher acts on
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub branch_ref: Option<String>,
    pub repository_name: Option<String>,
}

impl WebhookEvent {
    /// Decode a push payload. Only `ref` and `repository.name` are read.
    pub fn from_payload(body: &[u8]) -> Result<Self, WebhookError> {
        let payload: PushPayload = serde_json::from_slice(body)?;
        Ok(Self {
            branch_ref: payload.branch_ref,
            repository_name: payload.repository.and_then(|r| r.name),
        })
    }

    /// Branch name with the `refs/heads/` prefix removed
    pub fn branch(&self) -> Option<&str> {
        self.branch_ref
            .as_deref()
            .map(|r| r.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(r))
    }

    /// True when the push targets exactly the tracked branch
    pub fn targets_branch(&self, tracked: &str) -> bool {
        self.branch() == Some(tracked)
    }

    /// Repository name, required once the event is accepted
    pub fn repository(&self) -> Result<&str, WebhookError> {
        self.repository_name
            .as_deref()
            .ok_or_else(|| WebhookError::Payload("missing repository.name".to_string()))
    }
}
