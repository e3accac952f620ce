use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub public_base_url: String,
    pub webhook_signing_secret: String,
    pub provider: ProviderSettings,
    pub provider_timeout: Duration,
    pub skip_provider_probe: bool,
    pub delivery: DeliverySettings,
    pub rate_limit: RateLimitSettings,
    pub inbound_default_owner: Option<String>,
}

/// Credentials for the single carrier wired into this deployment.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    Twilio {
        account_sid: String,
        auth_token: String,
        from_number: String,
        status_callback_url: Option<String>,
    },
    TextLink {
        api_key: String,
        sim_card_id: Option<i64>,
    },
    EasySend {
        api_key: String,
        api_host: String,
        sender: String,
    },
    Verify {
        api_key: String,
        api_host: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryBackend {
    InProcess,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub backend: DeliveryBackend,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub claim_lease: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub backend: RateLimitBackend,
    pub submit_limit: u32,
    pub submit_window: Duration,
    pub api_rps: u32,
    pub webhook_rps: u32,
    pub outbound_rps: Option<u32>,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            backend: DeliveryBackend::InProcess,
            concurrency: 5,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            claim_lease: Duration::from_secs(120),
            poll_interval: Duration::from_millis(750),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            submit_limit: 30,
            submit_window: Duration::from_secs(60),
            api_rps: 50,
            webhook_rps: 200,
            outbound_rps: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let provider = ProviderSettings::from_env()?;
        let webhook_signing_secret = match env::var("WEBHOOK_SIGNING_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => match &provider {
                ProviderSettings::Twilio { auth_token, .. } => auth_token.clone(),
                _ => get_env("WEBHOOK_SIGNING_SECRET")?,
            },
        };

        let defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            backend: match get_env_or("DELIVERY_BACKEND", "in_process").as_str() {
                "in_process" | "memory" => DeliveryBackend::InProcess,
                "postgres" | "durable" => DeliveryBackend::Postgres,
                other => {
                    return Err(Error::Config(format!(
                        "Invalid value for DELIVERY_BACKEND: {}",
                        other
                    )))
                }
            },
            concurrency: get_env_parse_or("DELIVERY_CONCURRENCY", defaults.concurrency)?.max(1),
            max_attempts: get_env_parse_or("DELIVERY_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            base_delay: Duration::from_millis(get_env_parse_or(
                "DELIVERY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_secs(get_env_parse_or(
                "DELIVERY_MAX_DELAY_SECS",
                defaults.max_delay.as_secs(),
            )?),
            claim_lease: Duration::from_secs(get_env_parse_or(
                "DELIVERY_CLAIM_LEASE_SECS",
                defaults.claim_lease.as_secs(),
            )?),
            poll_interval: defaults.poll_interval,
        };

        let limits = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            backend: match get_env_or("RATE_LIMIT_BACKEND", "memory").as_str() {
                "memory" => RateLimitBackend::Memory,
                "postgres" => RateLimitBackend::Postgres,
                other => {
                    return Err(Error::Config(format!(
                        "Invalid value for RATE_LIMIT_BACKEND: {}",
                        other
                    )))
                }
            },
            submit_limit: get_env_parse_or("SUBMIT_RATE_LIMIT", limits.submit_limit)?,
            submit_window: Duration::from_secs(get_env_parse_or(
                "SUBMIT_RATE_WINDOW_SECS",
                limits.submit_window.as_secs(),
            )?),
            api_rps: get_env_parse_or("API_RPS", limits.api_rps)?,
            webhook_rps: get_env_parse_or("WEBHOOK_RPS", limits.webhook_rps)?,
            outbound_rps: match env::var("OUTBOUND_RPS") {
                Ok(raw) if !raw.trim().is_empty() => Some(parse_value("OUTBOUND_RPS", &raw)?),
                _ => None,
            },
        };

        let config = Self {
            server_address: get_env_or("SERVER_ADDRESS", "0.0.0.0:3000"),
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            public_base_url: public_base_url()?,
            webhook_signing_secret,
            provider,
            provider_timeout: Duration::from_secs(get_env_parse_or("PROVIDER_TIMEOUT_SECS", 15)?),
            skip_provider_probe: get_env_parse_or("SKIP_PROVIDER_PROBE", false)?,
            delivery,
            rate_limit,
            inbound_default_owner: env::var("INBOUND_DEFAULT_OWNER")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// A delivery lease must outlive the carrier call it guards, otherwise a
    /// second worker can reclaim a message whose send is still in flight.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.claim_lease <= self.provider_timeout {
            return Err(Error::Config(format!(
                "DELIVERY_CLAIM_LEASE_SECS ({}s) must exceed PROVIDER_TIMEOUT_SECS ({}s)",
                self.delivery.claim_lease.as_secs(),
                self.provider_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

impl ProviderSettings {
    pub fn from_env() -> Result<Self> {
        match get_env_or("SMS_PROVIDER", "twilio").to_ascii_lowercase().as_str() {
            "twilio" => Ok(ProviderSettings::Twilio {
                account_sid: get_env("TWILIO_ACCOUNT_SID")?,
                auth_token: get_env("TWILIO_AUTH_TOKEN")?,
                from_number: get_env("TWILIO_PHONE_NUMBER")?,
                status_callback_url: env::var("TWILIO_STATUS_CALLBACK_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
            }),
            "textlink" => Ok(ProviderSettings::TextLink {
                api_key: get_env("TEXTLINK_API_KEY")?,
                sim_card_id: match env::var("TEXTLINK_SIM_ID") {
                    Ok(raw) if !raw.trim().is_empty() => Some(parse_value("TEXTLINK_SIM_ID", &raw)?),
                    _ => None,
                },
            }),
            "easysend" => Ok(ProviderSettings::EasySend {
                api_key: get_env("RAPIDAPI_KEY")?,
                api_host: get_env("RAPIDAPI_HOST")?,
                sender: get_env_or("EASYSEND_SENDER", "SMSApp"),
            }),
            "verify" => Ok(ProviderSettings::Verify {
                api_key: get_env("RAPIDAPI_KEY")?,
                api_host: get_env_or("RAPIDAPI_HOST", "sms-verify3.p.rapidapi.com"),
            }),
            other => Err(Error::Config(format!(
                "Unsupported SMS_PROVIDER: {}",
                other
            ))),
        }
    }
}

/// Externally visible origin the carrier signs callbacks against.
fn public_base_url() -> Result<String> {
    let raw = get_env("PUBLIC_BASE_URL")?;
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid value for PUBLIC_BASE_URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "PUBLIC_BASE_URL must be http(s): {}",
            raw
        )));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn get_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!("Missing environment variable: {}", name))),
    }
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(name, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider_timeout: u64, claim_lease: u64) -> Config {
        Config {
            server_address: "127.0.0.1:0".into(),
            database_url: "postgres://localhost/sms".into(),
            jwt_secret: "secret".into(),
            public_base_url: "https://sms.example.com".into(),
            webhook_signing_secret: "token".into(),
            provider: ProviderSettings::TextLink {
                api_key: "key".into(),
                sim_card_id: None,
            },
            provider_timeout: Duration::from_secs(provider_timeout),
            skip_provider_probe: true,
            delivery: DeliverySettings {
                claim_lease: Duration::from_secs(claim_lease),
                ..DeliverySettings::default()
            },
            rate_limit: RateLimitSettings::default(),
            inbound_default_owner: None,
        }
    }

    #[test]
    fn lease_must_outlive_the_provider_timeout() {
        assert!(config(15, 120).validate().is_ok());
        assert!(matches!(config(15, 15).validate(), Err(Error::Config(_))));
        assert!(matches!(config(300, 120).validate(), Err(Error::Config(_))));
    }
}
