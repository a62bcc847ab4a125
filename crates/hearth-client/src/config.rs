//! Client configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use hearth_shared::constants::{
    DEFAULT_HTTP_PORT, INCOMING_CALL_POLL_INTERVAL, MESSAGE_POLL_INTERVAL, SESSION_POLL_INTERVAL,
};

use crate::call::CallTiming;

/// Shortest poll period accepted from the environment.
const MIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Hearth server.
    /// Env: `HEARTH_SERVER_URL`
    /// Default: `http://127.0.0.1:5000`
    pub server_url: String,

    /// Who this client acts as.
    /// Env: `HEARTH_USER`
    pub username: Option<String>,

    /// Env: `HEARTH_MESSAGE_POLL_MS`
    pub message_poll: Duration,

    /// Env: `HEARTH_INCOMING_POLL_MS`
    pub incoming_poll: Duration,

    /// Env: `HEARTH_SESSION_POLL_MS`
    pub session_poll: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            username: None,
            message_poll: MESSAGE_POLL_INTERVAL,
            incoming_poll: INCOMING_CALL_POLL_INTERVAL,
            session_poll: SESSION_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("HEARTH_SERVER_URL").filter(|u| !u.trim().is_empty()) {
            config.server_url = url.trim().to_string();
        }

        config.username = lookup("HEARTH_USER")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        if let Some(period) = poll_period(&lookup, "HEARTH_MESSAGE_POLL_MS") {
            config.message_poll = period;
        }
        if let Some(period) = poll_period(&lookup, "HEARTH_INCOMING_POLL_MS") {
            config.incoming_poll = period;
        }
        if let Some(period) = poll_period(&lookup, "HEARTH_SESSION_POLL_MS") {
            config.session_poll = period;
        }

        config
    }

    pub fn call_timing(&self) -> CallTiming {
        CallTiming {
            incoming_poll: self.incoming_poll,
            session_poll: self.session_poll,
        }
    }
}

fn poll_period(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let ms: u64 = parsed(lookup, key)?;
    let period = Duration::from_millis(ms);
    if period < MIN_POLL {
        tracing::warn!(key, ms, "Poll period too short, using default");
        return None;
    }
    Some(period)
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config.server_url, "http://127.0.0.1:5000");
        assert_eq!(config.username, None);
        assert_eq!(config.message_poll, Duration::from_secs(3));
        assert_eq!(config.call_timing().incoming_poll, Duration::from_secs(2));
        assert_eq!(config.call_timing().session_poll, Duration::from_secs(1));
    }

    #[test]
    fn overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HEARTH_SERVER_URL", " http://board.local:8080 "),
            ("HEARTH_USER", "grandma"),
            ("HEARTH_MESSAGE_POLL_MS", "1500"),
            ("HEARTH_SESSION_POLL_MS", "500"),
        ]));
        assert_eq!(config.server_url, "http://board.local:8080");
        assert_eq!(config.username.as_deref(), Some("grandma"));
        assert_eq!(config.message_poll, Duration::from_millis(1500));
        assert_eq!(config.session_poll, Duration::from_millis(500));
        assert_eq!(config.incoming_poll, Duration::from_secs(2));
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HEARTH_USER", "   "),
            ("HEARTH_MESSAGE_POLL_MS", "often"),
            ("HEARTH_INCOMING_POLL_MS", "5"),
        ]));
        assert_eq!(config.username, None);
        assert_eq!(config.message_poll, Duration::from_secs(3));
        assert_eq!(config.incoming_poll, Duration::from_secs(2));
    }
}
