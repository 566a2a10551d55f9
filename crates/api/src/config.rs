use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use tessera_core::retry::{RetryPolicy, DEFAULT_MAX_DELAY};
use tessera_relay::GatewayConfig;

/// Invalid environment configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: IpAddr,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Device polling and rule settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name of the device source; scopes the bus topic.
    pub source_name: String,
    /// Hub base URL. Polling is disabled when unset.
    pub source_url: Option<String>,
    pub source_token: String,
    pub poll_interval: Duration,
    /// JSON rules file. The built-in rule set is used when unset.
    pub rituals_path: Option<PathBuf>,
}

/// Outbound relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub ledger_url: Option<String>,
    pub spatial_url: Option<String>,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub forward_timeout: Duration,
    pub health_timeout: Duration,
}

impl RelayConfig {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: self.backoff,
                max_delay: DEFAULT_MAX_DELAY,
            },
            attempt_timeout: self.forward_timeout,
        }
    }

    /// Longest one destination can take to settle: every attempt running
    /// into its timeout, plus the backoff waits between attempts.
    pub fn forward_budget(&self) -> Duration {
        let retry = self.gateway_config().retry;
        let attempts = retry.max_attempts.max(1);

        let mut waits = Duration::ZERO;
        for attempt in 1..attempts {
            let delay = retry.delay_for(attempt);
            if delay.is_zero() || delay == retry.max_delay {
                // Constant from here on.
                waits = waits.saturating_add(delay.saturating_mul(attempts - attempt));
                break;
            }
            waits = waits.saturating_add(delay);
        }

        self.forward_timeout.saturating_mul(attempts).saturating_add(waits)
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `DEVICE_SOURCE_NAME`   | `homeassistant`            |
    /// | `DEVICE_SOURCE_URL`    | unset (polling disabled)   |
    /// | `DEVICE_SOURCE_TOKEN`  | empty                      |
    /// | `POLL_INTERVAL_SECS`   | `30`                       |
    /// | `LEDGER_URL`           | unset                      |
    /// | `SPATIAL_URL`          | unset                      |
    /// | `FORWARD_MAX_ATTEMPTS` | `3`                        |
    /// | `FORWARD_BACKOFF_MS`   | `500`                      |
    /// | `FORWARD_TIMEOUT_SECS` | `5`                        |
    /// | `HEALTH_TIMEOUT_SECS`  | `3`                        |
    /// | `RITUALS_PATH`         | unset (built-in rules)     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let cors_origins: Vec<String> = env
            .string("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in &cors_origins {
            HeaderValue::from_str(origin).map_err(|e| ConfigError {
                var: "CORS_ORIGINS",
                value: origin.clone(),
                reason: e.to_string(),
            })?;
        }

        let server = ServerConfig {
            host: env.parse("HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: env.parse("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env.positive("REQUEST_TIMEOUT_SECS", 30)?,
        };

        let pipeline = PipelineConfig {
            source_name: env.string("DEVICE_SOURCE_NAME", "homeassistant"),
            source_url: env.optional("DEVICE_SOURCE_URL"),
            source_token: env.string("DEVICE_SOURCE_TOKEN", ""),
            poll_interval: Duration::from_secs(env.positive("POLL_INTERVAL_SECS", 30)?),
            rituals_path: env.optional("RITUALS_PATH").map(PathBuf::from),
        };

        let relay = RelayConfig {
            ledger_url: env.optional("LEDGER_URL"),
            spatial_url: env.optional("SPATIAL_URL"),
            max_attempts: env.positive("FORWARD_MAX_ATTEMPTS", 3)? as u32,
            backoff: Duration::from_millis(env.parse("FORWARD_BACKOFF_MS", 500)?),
            forward_timeout: Duration::from_secs(env.positive("FORWARD_TIMEOUT_SECS", 5)?),
            health_timeout: Duration::from_secs(env.positive("HEALTH_TIMEOUT_SECS", 3)?),
        };

        check_request_timeout(&server, &relay)?;

        Ok(Self {
            server,
            pipeline,
            relay,
        })
    }
}

/// `/forward` and `/health` must settle before the request timeout cuts
/// them off.
fn check_request_timeout(server: &ServerConfig, relay: &RelayConfig) -> Result<(), ConfigError> {
    let limit = Duration::from_secs(server.request_timeout_secs);
    let reject = |reason: String| ConfigError {
        var: "REQUEST_TIMEOUT_SECS",
        value: server.request_timeout_secs.to_string(),
        reason,
    };

    let budget = relay.forward_budget();
    if budget >= limit {
        return Err(reject(format!(
            "must exceed the forward retry budget of {budget:?}"
        )));
    }
    if relay.health_timeout >= limit {
        return Err(reject(format!(
            "must exceed HEALTH_TIMEOUT_SECS ({}s)",
            relay.health_timeout.as_secs()
        )));
    }
    Ok(())
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-blank value of `key`, trimmed.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError {
                var: key,
                value: raw,
                reason: e.to_string(),
            }),
        }
    }

    /// Like [`Env::parse`] for counts and durations that must be non-zero.
    fn positive(&self, key: &'static str, default: u32) -> Result<u64, ConfigError> {
        let value: u32 = self.parse(key, default)?;
        if value == 0 {
            return Err(ConfigError {
                var: key,
                value: value.to_string(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(u64::from(value))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.server.bind_addr().to_string(), "0.0.0.0:3000");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.cors_origins, ["http://localhost:5173"]);
        assert_eq!(config.pipeline.source_name, "homeassistant");
        assert!(config.pipeline.source_url.is_none());
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(30));
        assert!(config.relay.ledger_url.is_none());
        assert_eq!(config.relay.max_attempts, 3);
        assert_eq!(config.relay.backoff, Duration::from_millis(500));
        assert_eq!(config.relay.forward_timeout, Duration::from_secs(5));
        assert_eq!(config.relay.health_timeout, Duration::from_secs(3));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PORT", "8080"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("LEDGER_URL", "http://ledger:9000"),
            ("SPATIAL_URL", "  "),
            ("FORWARD_MAX_ATTEMPTS", "5"),
            ("REQUEST_TIMEOUT_SECS", "60"),
            ("RITUALS_PATH", "/etc/tessera/rituals.json"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.cors_origins, ["http://a.test", "http://b.test"]);
        assert_eq!(config.relay.ledger_url.as_deref(), Some("http://ledger:9000"));
        assert!(config.relay.spatial_url.is_none());
        assert_eq!(config.relay.gateway_config().retry.max_attempts, 5);
        assert_eq!(
            config.pipeline.rituals_path,
            Some(PathBuf::from("/etc/tessera/rituals.json"))
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert_matches!(load(&[("PORT", "eighty")]), Err(ConfigError { var: "PORT", .. }));
        assert_matches!(load(&[("HOST", "localhost")]), Err(ConfigError { var: "HOST", .. }));
        assert_matches!(
            load(&[("FORWARD_MAX_ATTEMPTS", "0")]),
            Err(ConfigError { var: "FORWARD_MAX_ATTEMPTS", .. })
        );
        assert_matches!(
            load(&[("POLL_INTERVAL_SECS", "-1")]),
            Err(ConfigError { var: "POLL_INTERVAL_SECS", .. })
        );
    }

    #[test]
    fn forward_budget_counts_attempts_and_backoff() {
        let config = load(&[]).unwrap();
        // 3 x 5s attempts + 500ms + 1s of backoff.
        assert_eq!(config.relay.forward_budget(), Duration::from_millis(16_500));

        let single = load(&[("FORWARD_MAX_ATTEMPTS", "1"), ("FORWARD_BACKOFF_MS", "0")]).unwrap();
        assert_eq!(single.relay.forward_budget(), Duration::from_secs(5));
    }

    #[test]
    fn request_timeout_must_outlast_forwarding_and_health() {
        assert_matches!(
            load(&[("FORWARD_MAX_ATTEMPTS", "10")]),
            Err(ConfigError { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            load(&[
                ("FORWARD_TIMEOUT_SECS", "2"),
                ("FORWARD_MAX_ATTEMPTS", "1"),
                ("REQUEST_TIMEOUT_SECS", "1"),
            ]),
            Err(ConfigError { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            load(&[("HEALTH_TIMEOUT_SECS", "30")]),
            Err(ConfigError { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert!(load(&[("FORWARD_MAX_ATTEMPTS", "10"), ("REQUEST_TIMEOUT_SECS", "600")]).is_ok());
    }

    #[test]
    fn invalid_cors_origin_is_rejected() {
        assert_matches!(
            load(&[("CORS_ORIGINS", "http://ok.test,bad\norigin")]),
            Err(ConfigError { var: "CORS_ORIGINS", .. })
        );
    }
}
