//! HTTP handlers for the webhook endpoint and the liveness probe

pub mod health;
pub mod webhook;

pub use health::{health, not_found};
pub use webhook::{handle_webhook, webhook_info};
