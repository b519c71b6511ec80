use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::db::Driver;
use crate::duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: Database,
    #[serde(default)]
    pub rate_limit: RateLimits,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub driver: Driver,
    pub source: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    #[serde(
        default = "default_cleanup_period",
        deserialize_with = "duration::deserialize"
    )]
    pub cleanup_period: Duration,
    /// SQLite file mirroring the primary when the primary is not SQLite.
    #[serde(default = "default_replica_path")]
    pub replica_path: PathBuf,
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Deadlines applied to individual store operations.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_simple", deserialize_with = "duration::deserialize")]
    pub simple: Duration,
    #[serde(default = "default_list", deserialize_with = "duration::deserialize")]
    pub list: Duration,
    #[serde(default = "default_batch", deserialize_with = "duration::deserialize")]
    pub batch: Duration,
    #[serde(
        default = "default_migration",
        deserialize_with = "duration::deserialize"
    )]
    pub migration: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub get_pastes: Tiers,
    #[serde(default)]
    pub new_pastes: Tiers,
}

/// Per-IP request allowance for each window; `0` disables that window.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct Tiers {
    #[serde(default)]
    pub per_5_min: u32,
    #[serde(default)]
    pub per_15_min: u32,
    #[serde(default)]
    pub per_1_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("failed to deserialize config")
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            simple: default_simple(),
            list: default_list(),
            batch: default_batch(),
            migration: default_migration(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_body_size: default_max_body_size(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_max_open_conns() -> u32 {
    25
}

fn default_max_idle_conns() -> u32 {
    5
}

fn default_cleanup_period() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_replica_path() -> PathBuf {
    PathBuf::from("pastes-backup.db")
}

fn default_simple() -> Duration {
    Duration::from_secs(5)
}

fn default_list() -> Duration {
    Duration::from_secs(10)
}

fn default_batch() -> Duration {
    Duration::from_secs(30)
}

fn default_migration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}
