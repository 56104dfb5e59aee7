//! Configuration management for MockStack.
//!
//! All configuration is driven by environment variables.

use crate::scope::{DEFAULT_ACCOUNT, DEFAULT_REGION, ResourceScope};

/// Global configuration for MockStack.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockStackConfig {
    /// Bind address for the gateway.
    pub gateway_listen: String,
    /// Region every resource is created in.
    pub default_region: String,
    /// Account every resource belongs to.
    pub default_account: String,
    /// Log level.
    pub log_level: String,
    /// Services to enable. Empty means every compiled-in service.
    pub services: Vec<String>,
}

impl Default for MockStackConfig {
    fn default() -> Self {
        Self {
            gateway_listen: "127.0.0.1:4566".to_owned(),
            default_region: DEFAULT_REGION.to_owned(),
            default_account: DEFAULT_ACCOUNT.to_owned(),
            log_level: "info".to_owned(),
            services: Vec::new(),
        }
    }
}

impl MockStackConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if `DEFAULT_ACCOUNT_ID` is not a 12-digit account ID
    /// or `DEFAULT_REGION` is not a region name.
    pub fn from_env() -> crate::MockStackResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_REGION") {
            config.default_region = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_ACCOUNT_ID") {
            config.default_account = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("SERVICES") {
            config.services = parse_services_value(&v);
        }

        ResourceScope::new(&*config.default_account, &*config.default_region)?;
        Ok(config)
    }

    /// The (account, region) scope resources are created under.
    #[must_use]
    pub fn scope(&self) -> ResourceScope {
        ResourceScope {
            account: self.default_account.clone(),
            region: self.default_region.clone(),
        }
    }

    /// Whether the named service is enabled by this configuration.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| s == name)
    }
}

/// Parse a comma-separated services string into lower-cased service names.
#[must_use]
pub fn parse_services_value(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
