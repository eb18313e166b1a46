use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "miniscan.yaml";
pub const ENV_DB: &str = "MINISCAN_DB";
pub const ENV_LOG: &str = "MINISCAN_LOG";

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IntakeConfig {
    pub max_in_flight: Option<usize>,
    pub max_deliveries: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GenerateConfig {
    pub count: Option<u64>,
    pub qps: Option<u32>,
    pub seed: Option<u64>,
    pub stale_ratio: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
}

/// Load the YAML config at `path`, or `./miniscan.yaml` if it exists, then
/// apply environment overrides. A missing default file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { Some(p.to_path_buf()) } else { None }
        }
    };
    let mut cfg = match path {
        Some(p) => {
            let s = fs::read_to_string(&p).with_context(|| format!("reading config {}", p.display()))?;
            parse_config(&s).with_context(|| format!("parsing config {}", p.display()))?
        }
        None => Config::default(),
    };
    cfg.apply_env(|k| std::env::var(k).ok());
    Ok(cfg)
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}

impl Config {
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(db) = get(ENV_DB).filter(|v| !v.is_empty()) {
            self.store.path = Some(PathBuf::from(db));
        }
        if let Some(level) = get(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log.level = Some(level);
        }
    }
}
