//! Client configuration.

use std::time::Duration;

use rand::Rng;
use relief_budget_core::SessionId;
use url::Url;

use crate::error::{Result, SyncError};

/// Reconnect delay policy: `min(base * 2^retry + jitter, max_delay)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random offset added to each delay.
    pub max_jitter: Duration,
    /// Reconnect attempts allowed before giving up.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `retry` (0-based) with an explicit jitter.
    pub fn delay(&self, retry: u32, jitter: Duration) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry));
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    /// Delay before reconnect attempt `retry` with a random jitter.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
        };
        self.delay(retry, jitter)
    }

    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

/// Settings for the HTTP client, the duplex channel and the client timers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// HTTP origin of the budget server, e.g. `https://portal.example.org`.
    pub base_url: String,
    pub ws_path: String,
    pub subprotocol: Option<String>,
    pub request_timeout: Duration,
    /// Upper bound on one duplex channel handshake.
    pub connect_timeout: Duration,
    /// Quiet window of the change broadcaster.
    pub debounce: Duration,
    pub backoff: BackoffPolicy,
    pub visibility_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            ws_path: "/ws".to_string(),
            subprotocol: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            debounce: Duration::from_millis(300),
            backoff: BackoffPolicy::default(),
            visibility_reconnect_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(25),
        }
    }
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads `RB_*` variables, falling back to defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let backoff = BackoffPolicy {
            base_delay: env_millis("RB_RECONNECT_BASE_MS", defaults.backoff.base_delay),
            max_delay: env_millis("RB_RECONNECT_MAX_MS", defaults.backoff.max_delay),
            max_jitter: env_millis("RB_RECONNECT_JITTER_MS", defaults.backoff.max_jitter),
            max_retries: std::env::var("RB_RECONNECT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff.max_retries),
        };
        Self {
            base_url: std::env::var("RB_BASE_URL").unwrap_or(defaults.base_url),
            ws_path: std::env::var("RB_WS_PATH").unwrap_or(defaults.ws_path),
            subprotocol: std::env::var("RB_WS_SUBPROTOCOL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            request_timeout: env_millis("RB_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            connect_timeout: env_millis("RB_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            debounce: env_millis("RB_DEBOUNCE_MS", defaults.debounce),
            backoff,
            visibility_reconnect_delay: env_millis(
                "RB_VISIBILITY_RECONNECT_MS",
                defaults.visibility_reconnect_delay,
            ),
            heartbeat_interval: env_millis("RB_HEARTBEAT_MS", defaults.heartbeat_interval),
        }
    }

    /// Duplex channel URL derived from the HTTP origin.
    ///
    /// `http` maps to `ws` and `https` to `wss`; the session id and session
    /// key travel as `sessionId` and `token` query parameters.
    pub fn ws_url(&self, session_id: &SessionId, token: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyncError::invalid_url(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.base_url
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::invalid_url(format!("cannot use {} as ws origin", url)))?;
        url.set_path(&self.ws_path);
        url.set_fragment(None);
        url.query_pairs_mut()
            .clear()
            .append_pair("sessionId", &session_id.to_string())
            .append_pair("token", token);
        Ok(url)
    }

    /// Absolute HTTP endpoint for `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_non_decreasing_and_bounded() {
        let policy = BackoffPolicy::default();
        let jitter = Duration::from_millis(400);
        let mut previous = Duration::ZERO;
        for retry in 0..12 {
            let delay = policy.delay(retry, jitter);
            assert!(delay >= previous, "retry {} went down", retry);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(policy.delay(0, jitter), Duration::from_millis(2400));
        assert_eq!(policy.delay(2, Duration::ZERO), Duration::from_secs(8));
        assert_eq!(policy.delay(10, jitter), Duration::from_secs(30));
    }

    #[test]
    fn test_random_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..50 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_retry_ceiling() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn test_ws_url_mirrors_http_origin() {
        let session = SessionId::new();
        let config = SyncConfig::new("https://portal.example.org/");
        let url = config.ws_url(&session, "abc").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("sessionId".to_string(), session.to_string()),
                ("token".to_string(), "abc".to_string()),
            ]
        );

        let plain = SyncConfig::new("http://localhost:8080");
        assert_eq!(plain.ws_url(&session, "t").unwrap().scheme(), "ws");
    }

    #[test]
    fn test_ws_url_rejects_other_schemes() {
        let config = SyncConfig::new("ftp://portal.example.org");
        assert!(matches!(
            config.ws_url(&SessionId::new(), "t"),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = SyncConfig::new("http://localhost:8080/");
        assert_eq!(
            config.endpoint("/budget/validate"),
            "http://localhost:8080/budget/validate"
        );
    }
}
