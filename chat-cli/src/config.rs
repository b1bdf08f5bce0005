//! Settings resolution for relaychat.
//!
//! Precedence: command-line flags, then environment (handled by clap), then
//! the TOML file, then built-in defaults.

use anyhow::{bail, Context, Result};
use chat_client::{ClientConfig, Session};
use std::path::Path;

/// User and token used by `--mock` when none are given.
const DEMO_USER: &str = "demo-user";
const DEMO_TOKEN: &str = "demo-token";

/// Everything needed to start a client.
#[derive(Debug)]
pub struct Settings {
    /// Client configuration.
    pub client: ClientConfig,
    /// Authenticated session.
    pub session: Session,
    /// Whether to run against the in-memory echo server.
    pub mock: bool,
}

impl Settings {
    /// Resolve settings from flags and an optional config file.
    pub fn resolve(
        config_path: Option<&Path>,
        endpoint: Option<String>,
        user: Option<String>,
        token: Option<String>,
        mock: bool,
    ) -> Result<Self> {
        let mut client = match config_path {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(endpoint) = endpoint {
            client = client.with_endpoint(endpoint);
        }
        client.validate().context("Invalid client configuration")?;

        let (user, token) = match (user, token) {
            (Some(user), Some(token)) => (user, token),
            (user, token) if mock => (
                user.unwrap_or_else(|| DEMO_USER.to_string()),
                token.unwrap_or_else(|| DEMO_TOKEN.to_string()),
            ),
            (None, _) => bail!("No user id. Pass --user or set RELAYCHAT_USER."),
            (_, None) => bail!("No access token. Pass --token or set RELAYCHAT_TOKEN."),
        };

        Ok(Self {
            client,
            session: Session::new(user, token),
            mock,
        })
    }
}
