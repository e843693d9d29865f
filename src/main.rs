use gitea_astro_webhook::config::WebhookConfig;
use gitea_astro_webhook::error::WebhookError;
use gitea_astro_webhook::logging::{DEFAULT_LOG_DIRECTORY, FileLogger, TracingEventLog, setup_logging};
use gitea_astro_webhook::pipeline::Pipeline;
use gitea_astro_webhook::{AppState, build_router};
use std::sync::Arc;
use tracing::{self, error, info};

const DEFAULT_CONFIG_PATH: &str = ".env";

fn exit_with(e: WebhookError) -> ! {
    eprintln!("{}", e);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("WEBHOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = WebhookConfig::load(&config_path).unwrap_or_else(|e| exit_with(e));
    let pipeline = Pipeline::from_config(&config).unwrap_or_else(|e| exit_with(e));

    let file_logger = FileLogger::new(DEFAULT_LOG_DIRECTORY);
    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = match setup_logging(&config.log_level, &file_logger) {
        Ok(guard) => guard,
        Err(e) => exit_with(e.into()),
    };

    let port = config.port;
    info!("Gitea webhook service starting");
    info!("Listening on port {}", port);
    info!("Blog path: {}", config.blog_path.display());
    if let Some(repo) = &config.git_repo {
        info!("Repository: {}", repo);
    }
    info!("Tracked branch: {}", config.git_branch);
    info!("Webhook URL: http://localhost:{}/webhook", port);
    info!("Health check: http://localhost:{}/health", port);
    info!("Logging to {}", file_logger.log_path().display());

    let state = Arc::new(AppState::new(config, pipeline, Arc::new(TracingEventLog)));
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
