//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use payment::{KakaoPayConfig, OrchestratorConfig};
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `KAKAO_PAY_BASE_URL`, `KAKAO_PAY_SECRET_KEY`, `KAKAO_PAY_CID`: gateway
///   access. Without a secret key the sandbox gateway is used.
/// - `CALLBACK_BASE_URL`: public origin the gateway redirects buyers to
/// - `PAYMENT_RESULT_URL`: storefront page that shows the payment result
/// - `APPROVE_TIMEOUT_MS`, `STEP_TIMEOUT_MS`, `GATEWAY_HTTP_TIMEOUT_MS`
/// - `PENDING_TTL_SECS`, `SETTLED_RETENTION_SECS`, `HOUSEKEEPING_INTERVAL_SECS`
/// - `SEED_STOCK` (`P1=10,P2=5`) and `SEED_COUPONS` (`C1=1000`): initial
///   contents of the in-memory inventory and coupon ledger
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub kakao_base_url: String,
    pub kakao_secret_key: Option<String>,
    pub kakao_cid: String,
    pub callback_base_url: String,
    pub payment_result_url: String,
    pub approve_timeout: Duration,
    pub step_timeout: Duration,
    pub gateway_http_timeout: Duration,
    pub pending_ttl: Duration,
    pub settled_retention: Duration,
    pub housekeeping_interval: Duration,
    pub seed_stock: Vec<(String, u32)>,
    pub seed_coupons: Vec<(String, i64)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |var: &str, default: String| lookup(var).unwrap_or(default);

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            host: string("HOST", defaults.host),
            port: parsed(&lookup, "PORT", defaults.port)?,
            log_level: string("RUST_LOG", defaults.log_level),
            log_format,
            kakao_base_url: string("KAKAO_PAY_BASE_URL", defaults.kakao_base_url),
            kakao_secret_key: lookup("KAKAO_PAY_SECRET_KEY").filter(|key| !key.is_empty()),
            kakao_cid: string("KAKAO_PAY_CID", defaults.kakao_cid),
            callback_base_url: string("CALLBACK_BASE_URL", defaults.callback_base_url),
            payment_result_url: string("PAYMENT_RESULT_URL", defaults.payment_result_url),
            approve_timeout: millis(&lookup, "APPROVE_TIMEOUT_MS", defaults.approve_timeout)?,
            step_timeout: millis(&lookup, "STEP_TIMEOUT_MS", defaults.step_timeout)?,
            gateway_http_timeout: millis(
                &lookup,
                "GATEWAY_HTTP_TIMEOUT_MS",
                defaults.gateway_http_timeout,
            )?,
            pending_ttl: secs(&lookup, "PENDING_TTL_SECS", defaults.pending_ttl)?,
            settled_retention: secs(&lookup, "SETTLED_RETENTION_SECS", defaults.settled_retention)?,
            housekeeping_interval: secs(
                &lookup,
                "HOUSEKEEPING_INTERVAL_SECS",
                defaults.housekeeping_interval,
            )?,
            seed_stock: pairs(&lookup, "SEED_STOCK")?,
            seed_coupons: pairs(&lookup, "SEED_COUPONS")?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the orchestrator timeouts.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            approve_timeout: self.approve_timeout,
            step_timeout: self.step_timeout,
        }
    }

    /// Returns the Kakao Pay client settings, or `None` when no secret key
    /// is configured.
    pub fn kakao_pay_config(&self) -> Option<KakaoPayConfig> {
        let secret_key = self.kakao_secret_key.clone()?;
        Some(KakaoPayConfig {
            base_url: self.kakao_base_url.clone(),
            secret_key,
            cid: self.kakao_cid.clone(),
            callback_base_url: self.callback_base_url.clone(),
            request_timeout: self.gateway_http_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            kakao_base_url: "https://open-api.kakaopay.com".to_string(),
            kakao_secret_key: None,
            kakao_cid: "TC0ONETIME".to_string(),
            callback_base_url: "http://localhost:3000".to_string(),
            payment_result_url: "https://candy-site.vercel.app/payResult".to_string(),
            approve_timeout: Duration::from_millis(10_000),
            step_timeout: Duration::from_millis(5_000),
            gateway_http_timeout: Duration::from_millis(15_000),
            pending_ttl: Duration::from_secs(1_800),
            settled_retention: Duration::from_secs(86_400),
            housekeeping_interval: Duration::from_secs(60),
            seed_stock: Vec::new(),
            seed_coupons: Vec::new(),
        }
    }
}

fn parsed<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn millis<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parsed(lookup, var, default_ms).map(Duration::from_millis)
}

fn secs<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, var, default.as_secs()).map(Duration::from_secs)
}

/// Parses `KEY=VALUE` pairs separated by commas.
fn pairs<F, T>(lookup: &F, var: &'static str) -> Result<Vec<(String, T)>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(var) else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, T), ConfigError> {
            let invalid = || ConfigError::Invalid {
                var,
                value: entry.to_string(),
            };
            let (key, value) = entry.split_once('=').ok_or_else(invalid)?;
            let value = value.trim().parse().map_err(|_| invalid())?;
            Ok((key.trim().to_string(), value))
        })
        .collect()
}
