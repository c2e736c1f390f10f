//! Controller configuration from environment variables.

use crate::error::ControllerError;
use std::str::FromStr;
use std::time::Duration;
use vsphere_client::{ClientOptions, Credentials, DEFAULT_API_RELEASE, DEFAULT_PAGE_SIZE};

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Endpoint and login of the vSphere server
    pub credentials: Credentials,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// VI/JSON release path segment
    pub api_release: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Deadline for a single reconcile
    pub reconcile_timeout: Duration,
    /// Requeue interval after a successful reconcile
    pub resync_interval: Duration,
    /// Maximum concurrent reconciles
    pub concurrency: u16,
    /// Error backoff lower bound, in seconds
    pub backoff_min_secs: u64,
    /// Error backoff upper bound, in seconds
    pub backoff_max_secs: u64,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let url = get("GOVMOMI_URL").ok_or_else(|| {
            ControllerError::InvalidConfig("GOVMOMI_URL environment variable is required".to_string())
        })?;
        let credentials = Credentials::from_url(&url, get("GOVMOMI_USERNAME"), lookup("GOVMOMI_PASSWORD"))
            .map_err(|e| ControllerError::InvalidConfig(format!("GOVMOMI_URL: {e}")))?;

        let config = Self {
            credentials,
            insecure: parse_or(&get, "VSPHERE_INSECURE", false)?,
            api_release: get("VSPHERE_API_RELEASE").unwrap_or_else(|| DEFAULT_API_RELEASE.to_string()),
            request_timeout: Duration::from_secs(parse_or(&get, "VSPHERE_REQUEST_TIMEOUT_SECS", 30)?),
            namespace: get("WATCH_NAMESPACE"),
            reconcile_timeout: Duration::from_secs(parse_or(&get, "RECONCILE_TIMEOUT_SECS", 120)?),
            resync_interval: Duration::from_secs(parse_or(&get, "RESYNC_INTERVAL_SECS", 300)?),
            concurrency: parse_or(&get, "RECONCILE_CONCURRENCY", 4)?,
            backoff_min_secs: parse_or(&get, "BACKOFF_MIN_SECS", 5)?,
            backoff_max_secs: parse_or(&get, "BACKOFF_MAX_SECS", 300)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.request_timeout.is_zero() || self.reconcile_timeout.is_zero() || self.resync_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "timeouts and resync interval must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.backoff_min_secs == 0 || self.backoff_min_secs > self.backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds must satisfy 0 < BACKOFF_MIN_SECS ({}) <= BACKOFF_MAX_SECS ({})",
                self.backoff_min_secs, self.backoff_max_secs
            )));
        }
        Ok(())
    }

    /// HTTP options for the vSphere client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            insecure: self.insecure,
            timeout: self.request_timeout,
            api_release: self.api_release.clone(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{name}={raw}: {e}"))),
    }
}
