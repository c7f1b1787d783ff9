use facepay::{
    AccountAddress, Amount, Currency, RewardRate, SessionConfig, DEFAULT_BIOMETRIC_WINDOW_SECS,
    DEFAULT_CHECK_TIMEOUT_SECS, DEFAULT_MATCH_THRESHOLD, DEFAULT_ORACLE_TIMEOUT_SECS,
    DEFAULT_TRANSFER_TIMEOUT_SECS, MAX_BIOMETRIC_WINDOW_SECS,
};
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_DB_PATH: &str = "./facepay.db";
const DEFAULT_RATE_LIMIT_RPM: u64 = 120;
const MIN_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct TerminalConfig {
    /// Merchant account every payment goes to
    pub merchant_address: AccountAddress,
    pub currency: Currency,
    pub biometric_window_secs: u64,
    /// Recognition oracle base URL and API token
    pub oracle_url: String,
    pub oracle_token: String,
    pub oracle_timeout_secs: u64,
    pub match_threshold: f64,
    /// Sponsored transfer service and the HMAC key for its requests
    pub sponsor_url: String,
    pub sponsor_shared_secret: Vec<u8>,
    pub transfer_timeout_secs: u64,
    /// Credential custody service
    pub custody_url: String,
    pub custody_token: Option<String>,
    /// External checks (None = stage passes)
    pub proximity_url: Option<String>,
    pub security_url: Option<String>,
    pub check_timeout_secs: u64,
    pub reward_rate: RewardRate,
    pub max_payment_amount: Option<Amount>,
    /// SQLite file for enrollments and the attempt ledger
    pub db_path: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rpm: u64,
    /// Bearer token for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Bearer token for revoke, reconcile and attempt inspection (None = open)
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for TerminalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalConfig")
            .field("merchant_address", &self.merchant_address)
            .field("currency", &self.currency)
            .field("biometric_window_secs", &self.biometric_window_secs)
            .field("oracle_url", &self.oracle_url)
            .field("oracle_token", &"[REDACTED]")
            .field("oracle_timeout_secs", &self.oracle_timeout_secs)
            .field("match_threshold", &self.match_threshold)
            .field("sponsor_url", &self.sponsor_url)
            .field("sponsor_shared_secret", &"[REDACTED]")
            .field("transfer_timeout_secs", &self.transfer_timeout_secs)
            .field("custody_url", &self.custody_url)
            .field(
                "custody_token",
                &self.custody_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("proximity_url", &self.proximity_url)
            .field("security_url", &self.security_url)
            .field("check_timeout_secs", &self.check_timeout_secs)
            .field("reward_rate", &self.reward_rate)
            .field("max_payment_amount", &self.max_payment_amount)
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl TerminalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::MissingRequired(name));

        let merchant = required("MERCHANT_ADDRESS")?;
        let merchant_address = AccountAddress::new(merchant.as_str())
            .map_err(|_| ConfigError::InvalidAddress(merchant))?;

        let currency = match get("PAYMENT_CURRENCY") {
            Some(c) => c.parse().map_err(|e: facepay::FacepayError| ConfigError::InvalidValue {
                name: "PAYMENT_CURRENCY",
                reason: e.to_string(),
            })?,
            None => Currency::Usdc,
        };

        let biometric_window_secs =
            parse_or("BIOMETRIC_WINDOW_SECS", get("BIOMETRIC_WINDOW_SECS"), DEFAULT_BIOMETRIC_WINDOW_SECS)?;
        if !(1..=MAX_BIOMETRIC_WINDOW_SECS).contains(&biometric_window_secs) {
            return Err(ConfigError::InvalidValue {
                name: "BIOMETRIC_WINDOW_SECS",
                reason: format!("must be between 1 and {MAX_BIOMETRIC_WINDOW_SECS}"),
            });
        }

        let oracle_url = validated_url(required("ORACLE_URL")?)?;
        let oracle_token = required("ORACLE_TOKEN")?;
        let oracle_timeout_secs =
            parse_or("ORACLE_TIMEOUT_SECS", get("ORACLE_TIMEOUT_SECS"), DEFAULT_ORACLE_TIMEOUT_SECS)?;

        let match_threshold: f64 =
            parse_or("MATCH_THRESHOLD", get("MATCH_THRESHOLD"), DEFAULT_MATCH_THRESHOLD)?;
        if !(0.0..=1.0).contains(&match_threshold) {
            return Err(ConfigError::InvalidValue {
                name: "MATCH_THRESHOLD",
                reason: format!("{match_threshold} is outside [0, 1]"),
            });
        }

        let sponsor_url = validated_url(required("SPONSOR_URL")?)?;
        let sponsor_shared_secret = required("SPONSOR_SHARED_SECRET")?.into_bytes();
        if sponsor_shared_secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "SPONSOR_SHARED_SECRET is only {} bytes (minimum {MIN_SECRET_LEN} recommended), \
                 use `openssl rand -hex 32` to generate a secure secret",
                sponsor_shared_secret.len()
            );
        }
        let transfer_timeout_secs = parse_or(
            "TRANSFER_TIMEOUT_SECS",
            get("TRANSFER_TIMEOUT_SECS"),
            DEFAULT_TRANSFER_TIMEOUT_SECS,
        )?;

        let custody_url = validated_url(required("CUSTODY_URL")?)?;
        let custody_token = get("CUSTODY_TOKEN");

        let proximity_url = get("PROXIMITY_URL").map(validated_url).transpose()?;
        let security_url = get("SECURITY_URL").map(validated_url).transpose()?;
        let check_timeout_secs =
            parse_or("CHECK_TIMEOUT_SECS", get("CHECK_TIMEOUT_SECS"), DEFAULT_CHECK_TIMEOUT_SECS)?;

        let reward_rate = match get("REWARD_RATE") {
            Some(r) => RewardRate::parse(&r).map_err(|e| ConfigError::InvalidValue {
                name: "REWARD_RATE",
                reason: e.to_string(),
            })?,
            None => RewardRate::ONE,
        };

        let max_payment_amount = get("MAX_PAYMENT_AMOUNT")
            .map(|m| {
                Amount::parse(&m).map_err(|e| ConfigError::InvalidValue {
                    name: "MAX_PAYMENT_AMOUNT",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let db_path = get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let rate_limit_rpm = parse_or("RATE_LIMIT_RPM", get("RATE_LIMIT_RPM"), DEFAULT_RATE_LIMIT_RPM)?;

        let allowed_origins: Vec<String> = get("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if allowed_origins.iter().any(|o| o == "*") {
            tracing::error!(
                "Wildcard CORS origin '*' is not allowed for payment endpoints. \
                 Specify explicit origins in ALLOWED_ORIGINS."
            );
            return Err(ConfigError::InvalidUrl(
                "wildcard CORS origin '*' is not allowed".to_string(),
            ));
        }

        let metrics_token = get("METRICS_TOKEN");
        let admin_token = get("ADMIN_TOKEN");

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }
        if admin_token.is_none() {
            tracing::warn!(
                "ADMIN_TOKEN not set, revoke, reconcile and attempt inspection are unauthenticated"
            );
        }
        if proximity_url.is_none() {
            tracing::warn!("PROXIMITY_URL not set, the proximity stage always passes");
        }
        if security_url.is_none() {
            tracing::warn!("SECURITY_URL not set, the security stage always passes");
        }

        Ok(Self {
            merchant_address,
            currency,
            biometric_window_secs,
            oracle_url,
            oracle_token,
            oracle_timeout_secs,
            match_threshold,
            sponsor_url,
            sponsor_shared_secret,
            transfer_timeout_secs,
            custody_url,
            custody_token,
            proximity_url,
            security_url,
            check_timeout_secs,
            reward_rate,
            max_payment_amount,
            db_path,
            port,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
            admin_token,
        })
    }

    /// Session settings for the payment machine.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.merchant_address.clone())
            .with_currency(self.currency)
            .with_biometric_window(Duration::from_secs(self.biometric_window_secs))
            .with_reward_rate(self.reward_rate);
        config.oracle_timeout = Duration::from_secs(self.oracle_timeout_secs);
        config.check_timeout = Duration::from_secs(self.check_timeout_secs);
        config.transfer_timeout = Duration::from_secs(self.transfer_timeout_secs);
        match self.max_payment_amount {
            Some(max) => config.with_max_payment_amount(max),
            None => config,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            reason: format!("cannot parse '{v}'"),
        }),
        None => Ok(default),
    }
}

fn validated_url(raw: String) -> Result<String, ConfigError> {
    match Url::parse(&raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {
            Ok(raw.trim_end_matches('/').to_string())
        }
        _ => Err(ConfigError::InvalidUrl(raw)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
