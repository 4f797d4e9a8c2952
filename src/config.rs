//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::assessment::gateway::GatewayConfig;
use crate::assessment::orchestrator::SessionLimits;
use crate::error::ConfigError;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./data/mindful-match.db";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 60;

/// How the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// HTTP + WebSocket server.
    Server,
    /// One session in the terminal.
    Cli,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "cli" => Ok(Self::Cli),
            other => Err(format!("expected 'server' or 'cli', got '{other}'")),
        }
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone)]
pub struct AssessmentConfig {
    /// Whether bot messages are paced at human speed.
    pub pacing: bool,
    /// Multiplier on every pacing delay.
    pub pacing_scale: f64,
    /// Upper bound on a single analysis call.
    pub gateway_timeout: Duration,
    /// In-memory lifetime of sessions in server mode.
    pub session_limits: SessionLimits,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            pacing: true,
            pacing_scale: 1.0,
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            session_limits: SessionLimits::default(),
        }
    }
}

impl AssessmentConfig {
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            timeout: self.gateway_timeout,
            ..Default::default()
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: SecretString,
    pub model: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub mode: RunMode,
    /// Directory for daily rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub assessment: AssessmentConfig,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".into()))?;

        let model = lookup("MINDFUL_MATCH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port: u16 = lookup("MINDFUL_MATCH_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let db_path = lookup("MINDFUL_MATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let mode = match lookup("MINDFUL_MATCH_MODE") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "MINDFUL_MATCH_MODE".into(),
                message,
            })?,
            None => RunMode::Server,
        };

        let log_dir = lookup("MINDFUL_MATCH_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let gateway_timeout = lookup("MINDFUL_MATCH_GATEWAY_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS));

        let defaults = SessionLimits::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
        };
        let session_limits = SessionLimits {
            idle_timeout: secs("MINDFUL_MATCH_SESSION_IDLE_SECS")
                .unwrap_or(defaults.idle_timeout),
            completed_retention: secs("MINDFUL_MATCH_COMPLETED_RETENTION_SECS")
                .unwrap_or(defaults.completed_retention),
        };

        let pacing = lookup("MINDFUL_MATCH_PACING")
            .map(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "off" | "false" | "0"))
            .unwrap_or(true);

        let pacing_scale: f64 = lookup("MINDFUL_MATCH_PACING_SCALE")
            .and_then(|s| s.parse().ok())
            .filter(|s: &f64| s.is_finite() && *s >= 0.0)
            .unwrap_or(1.0);

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            port,
            db_path,
            mode,
            log_dir,
            assessment: AssessmentConfig {
                pacing,
                pacing_scale,
                gateway_timeout,
                session_limits,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            config(&[("ANTHROPIC_API_KEY", "  ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("ANTHROPIC_API_KEY", "sk-test")]).unwrap();
        assert_eq!(cfg.api_key.expose_secret(), "sk-test");
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.mode, RunMode::Server);
        assert!(cfg.log_dir.is_none());
        assert!(cfg.assessment.pacing);
        assert_eq!(cfg.assessment.gateway_timeout, Duration::from_secs(60));
        assert_eq!(cfg.assessment.session_limits, SessionLimits::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MINDFUL_MATCH_PORT", "9000"),
            ("MINDFUL_MATCH_MODE", "CLI"),
            ("MINDFUL_MATCH_PACING", "off"),
            ("MINDFUL_MATCH_PACING_SCALE", "0.25"),
            ("MINDFUL_MATCH_GATEWAY_TIMEOUT_SECS", "15"),
            ("MINDFUL_MATCH_LOG_DIR", "/tmp/logs"),
            ("MINDFUL_MATCH_SESSION_IDLE_SECS", "600"),
            ("MINDFUL_MATCH_COMPLETED_RETENTION_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.mode, RunMode::Cli);
        assert!(!cfg.assessment.pacing);
        assert_eq!(cfg.assessment.pacing_scale, 0.25);
        assert_eq!(cfg.assessment.gateway().timeout, Duration::from_secs(15));
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(
            cfg.assessment.session_limits,
            SessionLimits {
                idle_timeout: Duration::from_secs(600),
                completed_retention: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn bad_numbers_fall_back_but_bad_mode_fails() {
        let cfg = config(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MINDFUL_MATCH_PORT", "not-a-port"),
            ("MINDFUL_MATCH_GATEWAY_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.assessment.gateway_timeout, Duration::from_secs(60));

        let err = config(&[("ANTHROPIC_API_KEY", "k"), ("MINDFUL_MATCH_MODE", "daemon")]);
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }
}
