use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::warn;

/// Lower bound on the poll close interval; keeps scan load on the store bounded.
pub const MIN_CLOSE_INTERVAL_SECONDS: u64 = 15;
pub const DEFAULT_CLOSE_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_STARTUP_DELAY_SECONDS: u64 = 30;

const DEFAULT_MAIL_TIMEOUT_MS: u64 = 10_000;
const MIN_MAIL_TIMEOUT_MS: u64 = 100;
const MAX_MAIL_TIMEOUT_MS: u64 = 120_000;

const DISABLE_BACKGROUND_JOBS_VAR: &str = "AMPA_DISABLE_BACKGROUND_JOBS";

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub mail: MailConfig,
    pub portal: PortalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("AMPA_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("AMPA_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        // AMPA__SCHEDULER__CLOSE_INTERVAL_SECONDS=30, AMPA__MAIL__API_TOKEN=...
        builder = builder.add_source(
            Environment::with_prefix("AMPA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        if background_jobs_disabled_by_env() {
            self.scheduler.enabled = false;
        }
        self.mail.ensure_bounds()?;
        self.portal.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_enabled")]
    pub enabled: bool,
    /// Signed so that negative values clamp to the floor instead of failing to parse.
    pub close_interval_seconds: Option<i64>,
    pub startup_delay_seconds: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            close_interval_seconds: None,
            startup_delay_seconds: None,
        }
    }
}

impl SchedulerConfig {
    /// Effective tick interval. Values under the floor are clamped, never rejected.
    pub fn close_interval(&self) -> Duration {
        let configured = self
            .close_interval_seconds
            .unwrap_or(DEFAULT_CLOSE_INTERVAL_SECONDS as i64);
        if configured < MIN_CLOSE_INTERVAL_SECONDS as i64 {
            warn!(
                configured,
                floor = MIN_CLOSE_INTERVAL_SECONDS,
                "Poll close interval below floor, clamping"
            );
        }
        Duration::from_secs(clamp_close_interval(configured))
    }

    pub fn startup_delay(&self) -> Duration {
        let seconds = self
            .startup_delay_seconds
            .unwrap_or(DEFAULT_STARTUP_DELAY_SECONDS);
        assert!(seconds <= 3_600, "Startup delay cannot exceed one hour");
        Duration::from_secs(seconds)
    }

    const fn default_enabled() -> bool {
        true
    }
}

pub fn clamp_close_interval(seconds: i64) -> u64 {
    u64::try_from(seconds)
        .unwrap_or(0)
        .max(MIN_CLOSE_INTERVAL_SECONDS)
}

fn background_jobs_disabled_by_env() -> bool {
    std::env::var(DISABLE_BACKGROUND_JOBS_VAR)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// HTTP relay accepting `{"raw": <base64url RFC 822>}`.
    pub relay_url: String,
    pub api_token: Option<String>,
    pub default_sender: String,
    pub request_timeout_ms: Option<u64>,
}

impl MailConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_MAIL_TIMEOUT_MS))
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(!self.relay_url.is_empty(), "Mail relay URL must be set");
        assert!(
            self.default_sender.contains('@'),
            "Mail default sender must be an address"
        );
        let millis = self.request_timeout_ms.unwrap_or(DEFAULT_MAIL_TIMEOUT_MS);
        anyhow::ensure!(
            (MIN_MAIL_TIMEOUT_MS..=MAX_MAIL_TIMEOUT_MS).contains(&millis),
            "Mail request timeout {millis}ms outside {MIN_MAIL_TIMEOUT_MS}..={MAX_MAIL_TIMEOUT_MS}ms"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// External base URL used when linking members back to a poll.
    pub base_url: String,
}

impl PortalConfig {
    fn ensure_bounds(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid portal base URL {}", self.base_url))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub polls_max_capacity: u64,
    pub polls_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            polls_max_capacity: 1_000,
            polls_ttl_seconds: 30,
        }
    }
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.polls_max_capacity >= 10,
            "Poll cache capacity must be at least 10"
        );
        assert!(
            self.polls_ttl_seconds <= 3_600,
            "Poll cache TTL cannot exceed one hour"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_interval_defaults_to_sixty_seconds() {
        let config = SchedulerConfig::default();
        assert_eq!(config.close_interval(), Duration::from_secs(60));
    }

    #[test]
    fn close_interval_below_floor_is_clamped() {
        let config = SchedulerConfig {
            close_interval_seconds: Some(5),
            ..SchedulerConfig::default()
        };
        assert_eq!(config.close_interval(), Duration::from_secs(15));

        let zero = SchedulerConfig {
            close_interval_seconds: Some(0),
            ..SchedulerConfig::default()
        };
        assert_eq!(zero.close_interval(), Duration::from_secs(15));
    }

    #[test]
    fn close_interval_above_floor_is_kept() {
        let config = SchedulerConfig {
            close_interval_seconds: Some(45),
            ..SchedulerConfig::default()
        };
        assert_eq!(config.close_interval(), Duration::from_secs(45));
        assert_eq!(clamp_close_interval(15), 15);
    }

    #[test]
    fn negative_close_interval_is_clamped_not_rejected() {
        let raw = r#"
            [scheduler]
            close_interval_seconds = -5
        "#;
        let parsed: SchedulerConfig = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .and_then(|settings| settings.get("scheduler"))
            .expect("negative interval parses");
        assert_eq!(parsed.close_interval_seconds, Some(-5));
        assert_eq!(parsed.close_interval(), Duration::from_secs(15));
        assert_eq!(clamp_close_interval(i64::MIN), 15);
    }

    #[test]
    fn mail_timeout_bounds_are_validated() {
        let mut mail = MailConfig {
            relay_url: "https://mail.example.org/send".to_string(),
            api_token: None,
            default_sender: "no-reply@ampa-jnt.es".to_string(),
            request_timeout_ms: Some(50),
        };
        assert!(mail.ensure_bounds().is_err());
        mail.request_timeout_ms = Some(200_000);
        assert!(mail.ensure_bounds().is_err());
        mail.request_timeout_ms = None;
        assert!(mail.ensure_bounds().is_ok());
        assert_eq!(mail.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn startup_delay_defaults_to_thirty_seconds() {
        assert_eq!(
            SchedulerConfig::default().startup_delay(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn truthy_values_match_background_job_switch() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("on"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn scheduler_section_is_optional() {
        let raw = r#"
            [server]
            port = 8080

            [database]
            url = "postgres://ampa@localhost/ampa"
            max_connections = 8

            [mail]
            relay_url = "https://mail.example.org/send"
            default_sender = "no-reply@ampa-jnt.es"

            [portal]
            base_url = "https://ampa-jnt.es"
        "#;
        let parsed: ApiConfig = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .expect("config parses");
        assert!(parsed.scheduler.enabled);
        assert_eq!(parsed.scheduler.close_interval(), Duration::from_secs(60));
        assert_eq!(parsed.cache.polls_ttl_seconds, 30);
        assert_eq!(parsed.mail.request_timeout(), Duration::from_secs(10));
    }
}
