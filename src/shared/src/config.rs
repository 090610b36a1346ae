//! Settings gate for the service aggregation layer
//!
//! The web layer reads the dashboard settings once at startup and hands the
//! resulting `ConfigGate` to every request context by reference. Nothing in
//! the core reads settings from anywhere else.

use crate::types::TlsPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Which catalog URL a client should be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointInterface {
    #[serde(rename = "publicURL")]
    Public,
    #[serde(rename = "internalURL")]
    Internal,
    #[serde(rename = "adminURL")]
    Admin,
}

impl Default for EndpointInterface {
    fn default() -> Self {
        EndpointInterface::Public
    }
}

impl std::str::FromStr for EndpointInterface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publicURL" | "public" => Ok(EndpointInterface::Public),
            "internalURL" | "internal" => Ok(EndpointInterface::Internal),
            "adminURL" | "admin" => Ok(EndpointInterface::Admin),
            _ => Err(format!("Invalid endpoint type: {}", s)),
        }
    }
}

/// Subset of `HORIZON_CONFIG` the core consults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Whether the compute floating-IP backend offers one-click association
    pub simple_ip_management: bool,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            simple_ip_management: true,
        }
    }
}

/// Tenant whose public images are listed as official
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterTenant {
    /// Tenant (project) id
    pub tenant: String,
    /// Label shown next to matching images
    #[serde(default)]
    pub text: Option<String>,
    /// Icon class shown next to matching images
    #[serde(default)]
    pub icon: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Log format: `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Read-only dashboard settings consumed by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigGate {
    /// Disable TLS certificate verification in every client
    #[serde(rename = "OPENSTACK_SSL_NO_VERIFY")]
    pub ssl_no_verify: bool,
    /// CA bundle passed to every client
    #[serde(rename = "OPENSTACK_SSL_CACERT")]
    pub ssl_cacert: Option<PathBuf>,
    /// Default server-side list cap
    #[serde(rename = "API_RESULT_LIMIT")]
    pub api_result_limit: usize,
    /// Page size for paginated listings
    #[serde(rename = "API_PAGE_SIZE")]
    pub page_size: usize,
    /// Dashboard behaviour toggles
    #[serde(rename = "HORIZON_CONFIG")]
    pub horizon_config: HorizonConfig,
    /// Tenants whose public images are marked official
    #[serde(rename = "IMAGES_LIST_FILTER_TENANTS")]
    pub images_list_filter_tenants: Vec<FilterTenant>,
    /// Catalog interface clients are bound to
    #[serde(rename = "OPENSTACK_ENDPOINT_TYPE")]
    pub endpoint_type: EndpointInterface,
    /// Catalog region filter
    #[serde(rename = "OPENSTACK_REGION")]
    pub region: Option<String>,
    /// Explicit endpoints by service type, bypassing the catalog
    #[serde(rename = "OPENSTACK_ENDPOINT_OVERRIDES")]
    pub endpoint_overrides: HashMap<String, String>,
    /// Upper bound on concurrent metering workers per request
    #[serde(rename = "METERING_MAX_WORKERS")]
    pub metering_max_workers: usize,
    /// Request timeout in seconds
    #[serde(rename = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,
    /// Login page used for NotAuthorized redirects
    #[serde(rename = "LOGIN_URL")]
    pub login_url: String,
    /// Logging configuration
    #[serde(rename = "LOGGING")]
    pub logging: LoggingConfig,
}

impl Default for ConfigGate {
    fn default() -> Self {
        Self {
            ssl_no_verify: false,
            ssl_cacert: None,
            api_result_limit: 1000,
            page_size: 20,
            horizon_config: HorizonConfig::default(),
            images_list_filter_tenants: Vec::new(),
            endpoint_type: EndpointInterface::Public,
            region: None,
            endpoint_overrides: HashMap::new(),
            metering_max_workers: 8,
            request_timeout: 30,
            login_url: "/auth/login/".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigGate {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read settings file")?;

        let config: ConfigGate =
            serde_yaml::from_str(&content).context("Failed to parse settings file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Only the binary calls this; inside the core the gate is always passed
    /// in through the request context.
    pub fn from_env() -> Result<Self> {
        let mut config = ConfigGate::default();

        if let Ok(value) = std::env::var("OPENSTACK_SSL_NO_VERIFY") {
            config.ssl_no_verify = parse_flag(&value)
                .with_context(|| format!("Invalid OPENSTACK_SSL_NO_VERIFY: {}", value))?;
        }

        if let Ok(path) = std::env::var("OPENSTACK_SSL_CACERT") {
            config.ssl_cacert = Some(PathBuf::from(path));
        }

        if let Ok(limit) = std::env::var("API_RESULT_LIMIT") {
            config.api_result_limit = limit.parse().context("Invalid API_RESULT_LIMIT")?;
        }

        if let Ok(page_size) = std::env::var("API_PAGE_SIZE") {
            config.page_size = page_size.parse().context("Invalid API_PAGE_SIZE")?;
        }

        if let Ok(value) = std::env::var("HORIZON_SIMPLE_IP_MANAGEMENT") {
            config.horizon_config.simple_ip_management = parse_flag(&value)
                .with_context(|| format!("Invalid HORIZON_SIMPLE_IP_MANAGEMENT: {}", value))?;
        }

        if let Ok(endpoint_type) = std::env::var("OPENSTACK_ENDPOINT_TYPE") {
            config.endpoint_type = endpoint_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
        }

        if let Ok(region) = std::env::var("OPENSTACK_REGION") {
            config.region = Some(region);
        }

        if let Ok(workers) = std::env::var("METERING_MAX_WORKERS") {
            config.metering_max_workers =
                workers.parse().context("Invalid METERING_MAX_WORKERS")?;
        }

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT") {
            config.request_timeout = timeout.parse().context("Invalid REQUEST_TIMEOUT")?;
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Merge configuration with CLI overrides
    pub fn merge_with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(no_verify) = overrides.ssl_no_verify {
            self.ssl_no_verify = no_verify;
        }

        if let Some(cacert) = overrides.ssl_cacert {
            self.ssl_cacert = Some(cacert);
        }

        if let Some(endpoint_type) = overrides.endpoint_type {
            self.endpoint_type = endpoint_type;
        }

        if let Some(region) = overrides.region {
            self.region = Some(region);
        }

        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_result_limit == 0 {
            return Err(anyhow::anyhow!("API_RESULT_LIMIT must be greater than 0"));
        }

        if self.page_size == 0 {
            return Err(anyhow::anyhow!("API_PAGE_SIZE must be greater than 0"));
        }

        if self.metering_max_workers == 0 {
            return Err(anyhow::anyhow!(
                "METERING_MAX_WORKERS must be greater than 0"
            ));
        }

        if self.request_timeout == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT must be greater than 0"));
        }

        if self.login_url.is_empty() {
            return Err(anyhow::anyhow!("LOGIN_URL is required"));
        }

        if let Some(cacert) = &self.ssl_cacert {
            if !cacert.exists() {
                return Err(anyhow::anyhow!(
                    "OPENSTACK_SSL_CACERT points to a missing file: {}",
                    cacert.display()
                ));
            }
        }

        for (service, endpoint) in &self.endpoint_overrides {
            Url::parse(endpoint).with_context(|| {
                format!("Invalid endpoint override for {}: {}", service, endpoint)
            })?;
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => return Err(anyhow::anyhow!("Unknown log format: {}", other)),
        }

        Ok(())
    }

    /// Save configuration to a YAML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize settings")?;

        tokio::fs::write(path, content)
            .await
            .context("Failed to write settings file")?;

        Ok(())
    }

    /// TLS policy every client built under this gate must apply
    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy {
            insecure: self.ssl_no_verify,
            ca_file: self.ssl_cacert.clone(),
        }
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Whether the simple association shortcut is enabled
    pub fn simple_ip_management(&self) -> bool {
        self.horizon_config.simple_ip_management
    }

    /// Filter entry for an image owner, if that owner is an official tenant
    pub fn official_tenant(&self, owner: &str) -> Option<&FilterTenant> {
        self.images_list_filter_tenants
            .iter()
            .find(|t| t.tenant == owner)
    }
}

/// Configuration overrides from CLI arguments
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub ssl_no_verify: Option<bool>,
    pub ssl_cacert: Option<PathBuf>,
    pub endpoint_type: Option<EndpointInterface>,
    pub region: Option<String>,
    pub log_level: Option<String>,
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("expected a boolean flag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validation() {
        let config = ConfigGate::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api_result_limit, 1000);
        assert!(config.simple_ip_management());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = ConfigGate::default();
        config.metering_max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigGate::default();
        config.ssl_cacert = Some(PathBuf::from("/nonexistent/ca-bundle.pem"));
        assert!(config.validate().is_err());

        let mut config = ConfigGate::default();
        config
            .endpoint_overrides
            .insert("compute".to_string(), "not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_file_roundtrip() {
        let mut config = ConfigGate::default();
        config.ssl_no_verify = true;
        config.region = Some("RegionTwo".to_string());
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).await.unwrap();
        let loaded = ConfigGate::from_file(temp_file.path()).await.unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_canonical_option_names() {
        let yaml = r#"
OPENSTACK_SSL_NO_VERIFY: true
API_RESULT_LIMIT: 50
HORIZON_CONFIG:
  simple_ip_management: false
IMAGES_LIST_FILTER_TENANTS:
  - tenant: "t-official"
    text: "Official"
OPENSTACK_ENDPOINT_TYPE: internalURL
"#;
        let config: ConfigGate = serde_yaml::from_str(yaml).unwrap();

        assert!(config.ssl_no_verify);
        assert_eq!(config.api_result_limit, 50);
        assert_eq!(config.page_size, 20);
        assert!(!config.simple_ip_management());
        assert_eq!(config.endpoint_type, EndpointInterface::Internal);
        assert!(config.official_tenant("t-official").is_some());
        assert!(config.official_tenant("t-other").is_none());
    }

    #[test]
    fn test_from_env_reads_option_names() {
        std::env::set_var("API_RESULT_LIMIT", "75");
        std::env::set_var("OPENSTACK_REGION", "RegionTwo");
        std::env::set_var("HORIZON_SIMPLE_IP_MANAGEMENT", "off");

        let config = ConfigGate::from_env();

        std::env::remove_var("API_RESULT_LIMIT");
        std::env::remove_var("OPENSTACK_REGION");
        std::env::remove_var("HORIZON_SIMPLE_IP_MANAGEMENT");

        let config = config.unwrap();
        assert_eq!(config.api_result_limit, 75);
        assert_eq!(config.region.as_deref(), Some("RegionTwo"));
        assert!(!config.simple_ip_management());
    }

    #[test]
    fn test_tls_policy_follows_settings() {
        let mut config = ConfigGate::default();
        assert!(!config.tls_policy().insecure);

        config.ssl_no_verify = true;
        let policy = config.tls_policy();
        assert!(policy.insecure);
        assert!(policy.ca_file.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let overrides = ConfigOverrides {
            ssl_no_verify: Some(true),
            ssl_cacert: None,
            endpoint_type: Some(EndpointInterface::Admin),
            region: Some("RegionOne".to_string()),
            log_level: Some("debug".to_string()),
        };

        let config = ConfigGate::default()
            .merge_with_overrides(overrides)
            .unwrap();

        assert!(config.ssl_no_verify);
        assert_eq!(config.endpoint_type, EndpointInterface::Admin);
        assert_eq!(config.region.as_deref(), Some("RegionOne"));
        assert_eq!(config.logging.level, "debug");
    }
}
