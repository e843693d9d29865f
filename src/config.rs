//! Env-file configuration, loaded once at startup

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WebhookError};

pub const DEFAULT_PORT: u16 = 28080;
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_INSTALL_COMMAND: &str = "pnpm install";
pub const DEFAULT_BUILD_COMMAND: &str = "pnpm build";

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub port: u16,
    pub webhook_secret: String,
    pub blog_path: PathBuf,
    pub git_repo: Option<String>,
    pub git_branch: String,
    pub log_level: String,
    pub install_command: String,
    pub build_command: String,
}

impl WebhookConfig {
    /// Read and validate an env-file. `#` comments and blank lines are skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WebhookError::Config(format!(
                "config file '{}' does not exist, copy .env.example and fill it in",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            WebhookError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        Self::from_pairs(parse_env_lines(&contents))
    }

    /// Build a config from already-parsed key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into().trim().to_string(), v.into().trim().to_string()))
            .collect();

        let webhook_secret = required(&mut map, "WEBHOOK_SECRET")?;
        let blog_path = PathBuf::from(required(&mut map, "BLOG_PATH")?);

        let port = match optional(&mut map, "PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                WebhookError::Config(format!("PORT '{}' is not a valid port: {}", raw, e))
            })?,
            None => DEFAULT_PORT,
        };

        let install_command = optional(&mut map, "INSTALL_COMMAND")
            .unwrap_or_else(|| DEFAULT_INSTALL_COMMAND.to_string());
        let build_command = optional(&mut map, "BUILD_COMMAND")
            .unwrap_or_else(|| DEFAULT_BUILD_COMMAND.to_string());

        Ok(Self {
            port,
            webhook_secret,
            blog_path,
            git_repo: optional(&mut map, "GIT_REPO"),
            git_branch: optional(&mut map, "GIT_BRANCH")
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            log_level: optional(&mut map, "LOG_LEVEL")
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            install_command,
            build_command,
        })
    }
}

/// Raw `KEY=VALUE` lines, split on the first `=`. Values are kept verbatim
/// apart from trimming: no quoting, escaping or `$VAR` expansion. Comments,
/// blank lines and lines without `=` are skipped.
pub fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn optional(map: &mut HashMap<String, String>, key: &str) -> Option<String> {
    map.remove(key).filter(|v| !v.is_empty())
}

fn required(map: &mut HashMap<String, String>, key: &str) -> Result<String> {
    optional(map, key).ok_or_else(|| {
        WebhookError::Config(format!(
            "WEBHOOK_SECRET and BLOG_PATH must be set; '{}' is missing",
            key
        ))
    })
}
