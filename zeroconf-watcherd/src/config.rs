use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{MDNS_GROUP_V4, MDNS_PORT};
use shared::types::PublishedService;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub browser: BrowserConfig,
    pub publisher: PublisherConfig,
    pub publish: Vec<PublishEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Adapter names to bind; empty means every usable adapter
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// Feed SRV records from the authority section into the cache
    #[serde(default)]
    pub track_srv_authorities: bool,
    /// Service types whose instances are logged periodically
    #[serde(default)]
    pub watch: Vec<String>,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub log_traffic: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Address placed in A records; defaults to the first bound adapter
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
}

/// One `[[publish]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishEntry {
    pub long_name: String,
    /// Host label; defaults to the system host name
    #[serde(default)]
    pub short_name: Option<String>,
    pub service_type: String,
    pub port: u16,
    #[serde(default)]
    pub txt: BTreeMap<String, String>,
}

fn default_group() -> Ipv4Addr {
    MDNS_GROUP_V4
}

fn default_port() -> u16 {
    MDNS_PORT
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_report_interval() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            interfaces: Vec::new(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            track_srv_authorities: false,
            watch: Vec::new(),
            report_interval_secs: default_report_interval(),
            log_traffic: false,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            address: None,
        }
    }
}

impl BrowserConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl PublisherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl PublishEntry {
    /// Build the service, filling the host label from the system host name
    /// when none is configured.
    pub fn to_service(&self) -> Result<PublishedService> {
        let short_name = match &self.short_name {
            Some(name) => name.clone(),
            None => system_short_name()?,
        };

        Ok(PublishedService {
            long_name: self.long_name.clone(),
            short_name,
            service_type: self.service_type.clone(),
            port: self.port,
            txt: self.txt.clone(),
        })
    }
}

fn system_short_name() -> Result<String> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    // mDNS host names live directly under "local."
    Ok(hostname.split('.').next().unwrap_or_default().to_string())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Timer periods feed `tokio::time::interval`, which panics on zero.
    pub fn validate(&self) -> Result<()> {
        if self.browser.sweep_interval_ms == 0 {
            bail!("browser.sweep_interval_ms must be greater than zero");
        }
        if self.browser.report_interval_secs == 0 {
            bail!("browser.report_interval_secs must be greater than zero");
        }
        if self.publisher.tick_interval_ms == 0 {
            bail!("publisher.tick_interval_ms must be greater than zero");
        }
        Ok(())
    }
}
