//! Engine configuration.
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```toml
//! addr = "127.0.0.1:8080"
//! max_body_bytes = 1048576
//! shutdown_grace_ms = 10000
//! ```
//!
//! Environment variables override the file: `SWITCHYARD_ADDR`,
//! `SWITCHYARD_MAX_BODY_BYTES` and `SWITCHYARD_SHUTDOWN_GRACE_MS`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Listen address. Port `0` picks a free port; see
    /// [`Engine::local_addr`](crate::Engine::local_addr).
    pub addr: SocketAddr,
    /// Largest request body the context will read.
    pub max_body_bytes: usize,
    /// Drain period used when the engine is stopped by a signal.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_body_bytes: 2 * 1024 * 1024,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Applies `SWITCHYARD_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.overridden_by(|key| std::env::var(key).ok())
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn overridden_by(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(addr) = lookup("SWITCHYARD_ADDR") {
            self.addr = parse_env("SWITCHYARD_ADDR", &addr)?;
        }
        if let Some(limit) = lookup("SWITCHYARD_MAX_BODY_BYTES") {
            self.max_body_bytes = parse_env("SWITCHYARD_MAX_BODY_BYTES", &limit)?;
        }
        if let Some(grace) = lookup("SWITCHYARD_SHUTDOWN_GRACE_MS") {
            self.shutdown_grace_ms = parse_env("SWITCHYARD_SHUTDOWN_GRACE_MS", &grace)?;
        }
        Ok(self)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}
