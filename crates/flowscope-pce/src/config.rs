use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "FLOWSCOPE_CONFIG";

/// Connection details for one PCE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub fqdn: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_org")]
    pub org: u32,
    pub user: String,
    pub key: String,
    #[serde(default)]
    pub disable_tls_verification: bool,
}

fn default_port() -> u16 {
    8443
}

fn default_org() -> u32 {
    1
}

impl PceConfig {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowscope")
            .join("pce.toml")
    }

    /// Resolve the config location: explicit path, then `FLOWSCOPE_CONFIG`,
    /// then `~/.flowscope/pce.toml`.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => Self::default_path(),
        }
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| {
            format!("cannot read PCE config at {}", path.display())
        })?;
        toml::from_str(&contents).with_context(|| format!("invalid PCE config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(fqdn) = std::env::var("FLOWSCOPE_PCE_FQDN") {
            self.fqdn = fqdn;
        }
        if let Some(port) = std::env::var("FLOWSCOPE_PCE_PORT").ok().and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(org) = std::env::var("FLOWSCOPE_PCE_ORG").ok().and_then(|o| o.parse().ok()) {
            self.org = org;
        }
        if let Ok(user) = std::env::var("FLOWSCOPE_PCE_USER") {
            self.user = user;
        }
        if let Ok(key) = std::env::var("FLOWSCOPE_PCE_KEY") {
            self.key = key;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fqdn.is_empty() {
            anyhow::bail!("PCE fqdn is empty");
        }
        if self.user.is_empty() || self.key.is_empty() {
            anyhow::bail!("PCE API user and key are required");
        }
        Ok(())
    }

    /// Root that job and datafile hrefs are relative to.
    pub fn api_root(&self) -> String {
        format!("https://{}:{}/api/v2", self.fqdn, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("{}/orgs/{}", self.api_root(), self.org)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.fqdn)
    }
}
