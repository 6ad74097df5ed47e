use std::env;
use std::time::Duration;

use crate::error::{Result, XmlmcError};

pub const DEFAULT_XMLMC_PATH: &str = "xmlmc";
pub const DEFAULT_DAV_PATH: &str = "dav";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_INSTANCE_URL_TEMPLATE: &str = "https://eurapi.hornbill.com/{instance}/";

/// Connection settings for one XMLMC instance
#[derive(Debug, Clone, PartialEq)]
pub struct XmlmcConfig {
    /// Bare instance name or a full server URL
    pub instance: String,
    pub xmlmc_path: String,
    pub dav_path: String,
    /// Static API key; when set, calls bypass logon
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Pattern used to turn a bare instance name into a URL; must contain `{instance}`
    pub instance_url_template: String,
}

impl Default for XmlmcConfig {
    fn default() -> Self {
        Self {
            instance: String::new(),
            xmlmc_path: DEFAULT_XMLMC_PATH.to_string(),
            dav_path: DEFAULT_DAV_PATH.to_string(),
            api_key: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            instance_url_template: DEFAULT_INSTANCE_URL_TEMPLATE.to_string(),
        }
    }
}

impl XmlmcConfig {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_endpoints(mut self, xmlmc_path: impl Into<String>, dav_path: impl Into<String>) -> Self {
        self.xmlmc_path = xmlmc_path.into();
        self.dav_path = dav_path.into();
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Loads configuration from the environment (and a `.env` file when present).
    ///
    /// `XMLMC_INSTANCE` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let instance = env::var("XMLMC_INSTANCE")
            .map_err(|_| XmlmcError::Config("XMLMC_INSTANCE must be set".to_string()))?;

        let mut config = Self::new(instance);

        if let Ok(path) = env::var("XMLMC_PATH") {
            config.xmlmc_path = path;
        }
        if let Ok(path) = env::var("XMLMC_DAV_PATH") {
            config.dav_path = path;
        }
        if let Ok(key) = env::var("XMLMC_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(timeout) = env::var("XMLMC_TIMEOUT_SECONDS") {
            config.timeout_seconds = timeout.trim().parse().map_err(|_| {
                XmlmcError::Config(format!("XMLMC_TIMEOUT_SECONDS is not a number: {}", timeout))
            })?;
        }
        if let Ok(template) = env::var("XMLMC_INSTANCE_URL_TEMPLATE") {
            config.instance_url_template = template;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance.trim().is_empty() {
            return Err(XmlmcError::Config("instance name or URL cannot be empty".to_string()));
        }
        if self.xmlmc_path.trim_matches('/').is_empty() {
            return Err(XmlmcError::Config("xmlmc endpoint path cannot be empty".to_string()));
        }
        if self.dav_path.trim_matches('/').is_empty() {
            return Err(XmlmcError::Config("dav endpoint path cannot be empty".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(XmlmcError::Config("timeout_seconds must be greater than zero".to_string()));
        }
        if !self.instance_url_template.contains("{instance}") {
            return Err(XmlmcError::Config(format!(
                "instance URL template '{}' has no {{instance}} placeholder",
                self.instance_url_template
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
