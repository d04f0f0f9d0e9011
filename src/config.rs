//! Configuration loading.
//!
//! Settings come from, in increasing priority: built-in defaults, an optional
//! JSON file, `SCRATCH_BRIDGE_*` environment variables, and finally CLI flags
//! (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, net::IpAddr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT};

/// How inbound bytes are cut into frames.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Every socket read is one frame. Matches existing clients, but a frame
    /// split or merged by TCP is misparsed.
    #[default]
    Chunk,
    /// Frames are `\n`-terminated and buffered across reads.
    Line,
}

impl std::str::FromStr for Framing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chunk" => Ok(Self::Chunk),
            "line" => Ok(Self::Line),
            other => anyhow::bail!("unknown framing mode '{other}' (expected 'chunk' or 'line')"),
        }
    }
}

/// Configuration for a bridge instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// TCP port to listen on. `0` picks a free port.
    pub port: u16,
    /// Address to bind.
    pub bind_address: IpAddr,
    /// Frame boundary handling.
    pub framing: Framing,
    /// Close a connection after this many idle seconds. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
    /// Deadline in seconds for writing one reply.
    pub write_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS
                .parse()
                .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
            framing: Framing::Chunk,
            read_timeout_secs: None,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT.as_secs(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with the given port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Default config file location: `<config dir>/scratch-bridge/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scratch-bridge").join("config.json"))
    }

    /// Loads configuration with environment overrides applied.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// read if present and silently skipped otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::load_from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses a JSON config file. Missing keys fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `SCRATCH_BRIDGE_*` overrides from `lookup`. Unparseable values
    /// are logged and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("SCRATCH_BRIDGE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => log::warn!("Ignoring SCRATCH_BRIDGE_PORT={port}: {e}"),
            }
        }

        if let Some(bind) = lookup("SCRATCH_BRIDGE_BIND") {
            match bind.parse::<IpAddr>() {
                Ok(addr) => self.bind_address = addr,
                Err(e) => log::warn!("Ignoring SCRATCH_BRIDGE_BIND={bind}: {e}"),
            }
        }

        if let Some(framing) = lookup("SCRATCH_BRIDGE_FRAMING") {
            match framing.parse::<Framing>() {
                Ok(framing) => self.framing = framing,
                Err(e) => log::warn!("Ignoring SCRATCH_BRIDGE_FRAMING: {e}"),
            }
        }

        if let Some(secs) = lookup("SCRATCH_BRIDGE_READ_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.read_timeout_secs = (secs > 0).then_some(secs);
            }
        }

        if let Some(secs) = lookup("SCRATCH_BRIDGE_WRITE_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.write_timeout_secs = secs;
            }
        }
    }

    /// Idle read deadline, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    /// Reply write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 12345);
        assert_eq!(config.bind_address.to_string(), "127.0.0.1");
        assert_eq!(config.framing, Framing::Chunk);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file_fills_missing_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"port": 17801, "framing": "line"}"#).unwrap();

        let config = BridgeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.port, 17801);
        assert_eq!(config.framing, Framing::Line);
        assert_eq!(config.write_timeout_secs, 5);
    }

    #[test]
    fn test_load_explicit_missing_file_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = BridgeConfig::load(Some(&tmp.path().join("absent.json"))).unwrap_err();
        assert!(
            err.to_string().contains("Failed to read config file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_invalid_json_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ port: ").unwrap();
        assert!(BridgeConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup_from(&[
            ("SCRATCH_BRIDGE_PORT", "4000"),
            ("SCRATCH_BRIDGE_FRAMING", "LINE"),
            ("SCRATCH_BRIDGE_READ_TIMEOUT", "30"),
            ("SCRATCH_BRIDGE_WRITE_TIMEOUT", "2"),
            ("SCRATCH_BRIDGE_BIND", "0.0.0.0"),
        ]));
        assert_eq!(config.port, 4000);
        assert_eq!(config.framing, Framing::Line);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.write_timeout(), Duration::from_secs(2));
        assert_eq!(config.bind_address.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_bad_overrides_ignored() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup_from(&[
            ("SCRATCH_BRIDGE_PORT", "not-a-port"),
            ("SCRATCH_BRIDGE_FRAMING", "xml"),
            ("SCRATCH_BRIDGE_READ_TIMEOUT", "0"),
        ]));
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_framing_serializes_lowercase() {
        let json = serde_json::to_string(&BridgeConfig::with_port(1)).unwrap();
        assert!(json.contains("\"framing\":\"chunk\""), "got {json}");
        assert!(!json.contains("read_timeout_secs"));
    }
}
