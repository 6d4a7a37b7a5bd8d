use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use validator::Validate;

use crate::bus::Topics;
use crate::controller::{ManualSettings, MpcSettings};
use crate::domain::PlantParameters;
use crate::repo::HistoryConfig;
use crate::simulation::SimulationSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "AZRU__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub bus: BusConfig,
    #[validate(nested)]
    pub simulation: SimulationSettings,
    #[validate(nested)]
    pub plant: PlantParameters,
    #[validate(nested)]
    pub mpc: MpcSettings,
    #[validate(nested)]
    pub manual: ManualSettings,
    #[validate(nested)]
    pub history: HistoryConfig,
    #[validate(nested)]
    pub tariff: TariffConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 8080,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per subscriber before new ones are dropped
    #[validate(range(min = 1))]
    pub capacity: usize,
    pub topics: Topics,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            topics: Topics::default(),
        }
    }
}

/// Remote source of colour-tariff grades. When `base_url` is unset the
/// scenario's own calendar is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TariffConfig {
    pub base_url: Option<String>,
    #[validate(range(min = 1))]
    pub http_timeout_seconds: u64,
    #[validate(range(min = 1))]
    pub cache_ttl_seconds: u64,
    #[validate(range(min = 1))]
    pub refresh_minutes: u64,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            http_timeout_seconds: 10,
            cache_ttl_seconds: 6 * 3600,
            refresh_minutes: 60,
        }
    }
}

impl Config {
    /// The TOML file at `path` (or `config/default.toml`) overlaid with
    /// `AZRU__`-prefixed environment variables. Missing keys take their
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration out of range")?;
        Ok(cfg)
    }
}
