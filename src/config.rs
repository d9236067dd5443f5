use crate::constants::{
    DEFAULT_CAPTCHA_TTL_SECS, DEFAULT_CLEAN_INTERVAL_SECS, DEFAULT_MAX_OBJECT_SIZE,
    DEFAULT_MAX_STORAGE, DEFAULT_TTL_SECS,
};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage_root: PathBuf,
    pub max_object_size: u64,
    pub max_storage: u64,
    pub ttl: Duration,
    pub clean_interval: Duration,
    pub captcha_enabled: bool,
    pub captcha_ttl: Duration,
    pub purge_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            storage_root: PathBuf::from("./data"),
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            max_storage: DEFAULT_MAX_STORAGE,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            clean_interval: Duration::from_secs(DEFAULT_CLEAN_INTERVAL_SECS),
            captcha_enabled: true,
            captcha_ttl: Duration::from_secs(DEFAULT_CAPTCHA_TTL_SECS),
            purge_on_start: true,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()?,
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            max_object_size: env::var("MAX_OBJECT_SIZE")
                .unwrap_or_else(|_| defaults.max_object_size.to_string())
                .parse()?,
            max_storage: env::var("MAX_STORAGE")
                .unwrap_or_else(|_| defaults.max_storage.to_string())
                .parse()?,
            ttl: Duration::from_secs(
                env::var("TTL_SECS")
                    .unwrap_or_else(|_| defaults.ttl.as_secs().to_string())
                    .parse()?,
            ),
            clean_interval: Duration::from_secs(
                env::var("CLEAN_INTERVAL_SECS")
                    .unwrap_or_else(|_| defaults.clean_interval.as_secs().to_string())
                    .parse()?,
            ),
            captcha_enabled: env::var("CAPTCHA_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            captcha_ttl: Duration::from_secs(
                env::var("CAPTCHA_TTL_SECS")
                    .unwrap_or_else(|_| defaults.captcha_ttl.as_secs().to_string())
                    .parse()?,
            ),
            purge_on_start: env::var("PURGE_ON_START")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the store and sweeper cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_object_size == 0 {
            anyhow::bail!("MAX_OBJECT_SIZE must be greater than zero");
        }
        if self.max_object_size > self.max_storage {
            anyhow::bail!(
                "MAX_OBJECT_SIZE ({}) exceeds MAX_STORAGE ({})",
                self.max_object_size,
                self.max_storage
            );
        }
        if self.ttl.is_zero() {
            anyhow::bail!("TTL_SECS must be greater than zero");
        }
        if self.clean_interval.is_zero() {
            anyhow::bail!("CLEAN_INTERVAL_SECS must be greater than zero");
        }
        if self.clean_interval > self.ttl {
            tracing::warn!(
                clean_interval_secs = self.clean_interval.as_secs(),
                ttl_secs = self.ttl.as_secs(),
                "Sweep interval is longer than the TTL; objects may outlive it noticeably"
            );
        }
        Ok(())
    }

    /// Largest request body accepted by the upload route
    pub fn body_limit(&self) -> usize {
        let limit = self
            .max_object_size
            .saturating_add(crate::constants::MULTIPART_OVERHEAD);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}
