use std::time::Duration;

use crate::proxy::http::{ExecutorConfig, DEFAULT_USER_AGENT};

const DEFAULT_PORT: u16 = 9000;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub request_timeout: Option<Duration>,
    pub allow_private_networks: bool,
    pub user_agent: String,
}

/// Unparsed values, as they come from the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawValues<'a> {
    pub port: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub request_timeout_secs: Option<&'a str>,
    pub allow_private_networks: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl Config {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok();
        let (port, sentry_dsn, environment, timeout, private, user_agent) = (
            var("PORT"),
            var("SENTRY_DSN"),
            var("ENVIRONMENT"),
            var("REQUEST_TIMEOUT_SECS"),
            var("ALLOW_PRIVATE_NETWORKS"),
            var("USER_AGENT"),
        );
        Self::from_raw_values(RawValues {
            port: port.as_deref(),
            sentry_dsn: sentry_dsn.as_deref(),
            environment: environment.as_deref(),
            request_timeout_secs: timeout.as_deref(),
            allow_private_networks: private.as_deref(),
            user_agent: user_agent.as_deref(),
        })
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(raw: RawValues<'_>) -> Self {
        let port = raw.port.and_then(|v| v.trim().parse().ok()).unwrap_or(DEFAULT_PORT);

        let sentry_dsn = raw.sentry_dsn.filter(|s| !s.is_empty()).map(String::from);

        let environment = raw
            .environment
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        let request_timeout = raw
            .request_timeout_secs
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let allow_private_networks = raw
            .allow_private_networks
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"));

        let user_agent = raw
            .user_agent
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Config {
            port,
            sentry_dsn,
            environment,
            request_timeout,
            allow_private_networks,
            user_agent,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            user_agent: self.user_agent.clone(),
            timeout: self.request_timeout,
            allow_private_networks: self.allow_private_networks,
        }
    }
}
