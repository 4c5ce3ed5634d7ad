//! Environment-driven worker configuration
//!
//! All backend and provider selection happens here, once, at startup.

use std::time::Duration;

use anyhow::Result;

/// Notification provider mode
///
/// Configured via the NOTIFY_MODE env var: "log" (default) or "webhook".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NotifyMode {
    /// Log every send; always succeeds (development)
    #[default]
    Log,
    /// POST every send to WEBHOOK_URL (push-gateway integration)
    Webhook,
}

impl std::str::FromStr for NotifyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" | "" => Ok(NotifyMode::Log),
            "webhook" => Ok(NotifyMode::Webhook),
            _ => anyhow::bail!("Unknown notify mode: {}. Use 'log' or 'webhook'", s),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres connection string; absent means in-memory stores
    pub database_url: Option<String>,

    /// Notification provider selection
    pub notify_mode: NotifyMode,

    /// Target for webhook-mode sends
    pub webhook_url: Option<String>,

    /// How often the expiry sweeper runs
    pub sweep_interval: Duration,

    /// Token lifetime for callback steps without their own timeout
    pub token_ttl: Duration,
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let notify_mode: NotifyMode = std::env::var("NOTIFY_MODE").unwrap_or_default().parse()?;

        let webhook_url = std::env::var("WEBHOOK_URL").ok();
        if notify_mode == NotifyMode::Webhook && webhook_url.is_none() {
            anyhow::bail!("NOTIFY_MODE=webhook requires WEBHOOK_URL");
        }

        let sweep_interval = std::env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let token_ttl = std::env::var("CALLBACK_TOKEN_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(|h: u64| Duration::from_secs(h * 3600))
            .unwrap_or(Duration::from_secs(72 * 3600));

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            notify_mode,
            webhook_url,
            sweep_interval,
            token_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_mode_parsing() {
        assert_eq!("log".parse::<NotifyMode>().unwrap(), NotifyMode::Log);
        assert_eq!("".parse::<NotifyMode>().unwrap(), NotifyMode::Log);
        assert_eq!(
            "WEBHOOK".parse::<NotifyMode>().unwrap(),
            NotifyMode::Webhook
        );
        assert!("carrier-pigeon".parse::<NotifyMode>().is_err());
    }
}
