use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::error::{KimchiError, Result};

/// Harness settings. Everything has a default, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KimchiConfig {
    /// Where server data dirs and `kimchi.log` go; a temp dir when unset.
    pub base_dir: Option<PathBuf>,
    /// Ports are handed out from `base_port + 1` upwards.
    pub base_port: u16,
    pub authorities: usize,
    pub providers: usize,
    pub mixes: usize,
    /// Harness log level (`RUST_LOG` wins when set).
    pub log_level: String,
    /// Level written by every server into its own log.
    pub server_log_level: String,
    pub tail_poll_ms: u64,
    /// Upper bound on the tail completion barrier; unbounded when unset.
    pub shutdown_deadline_secs: Option<u64>,
    /// Seconds the client waits for its first usable consensus.
    pub pki_retrieval_delay_secs: u64,
    pub user: String,
    pub service: String,
}

impl Default for KimchiConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            base_port: 30000,
            authorities: 3,
            providers: 2,
            mixes: 6,
            log_level: "info".into(),
            server_log_level: "DEBUG".into(),
            tail_poll_ms: 250,
            shutdown_deadline_secs: None,
            pki_retrieval_delay_secs: 30,
            user: "aLiCe".into(),
            service: "loop".into(),
        }
    }
}

impl KimchiConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&data)
            .map_err(|e| KimchiError::config(format!("toml parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let cfg = Self::default().with_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `KIMCHI_*` variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(v) = env::var("KIMCHI_BASE_DIR") {
            self.base_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("KIMCHI_BASE_PORT") {
            self.base_port = parse_var("KIMCHI_BASE_PORT", &v)?;
        }
        if let Ok(v) = env::var("KIMCHI_AUTHORITIES") {
            self.authorities = parse_var("KIMCHI_AUTHORITIES", &v)?;
        }
        if let Ok(v) = env::var("KIMCHI_PROVIDERS") {
            self.providers = parse_var("KIMCHI_PROVIDERS", &v)?;
        }
        if let Ok(v) = env::var("KIMCHI_MIXES") {
            self.mixes = parse_var("KIMCHI_MIXES", &v)?;
        }
        if let Ok(v) = env::var("KIMCHI_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = env::var("KIMCHI_TAIL_POLL_MS") {
            self.tail_poll_ms = parse_var("KIMCHI_TAIL_POLL_MS", &v)?;
        }
        if let Ok(v) = env::var("KIMCHI_SHUTDOWN_DEADLINE_SECS") {
            self.shutdown_deadline_secs = Some(parse_var("KIMCHI_SHUTDOWN_DEADLINE_SECS", &v)?);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let allowed = ["trace", "debug", "info", "warn", "error"];
        if !allowed.contains(&self.log_level.as_str()) {
            return Err(KimchiError::config(format!("invalid log_level: {}", self.log_level)));
        }
        if nyx_control::logging::level_rank(&self.server_log_level).is_none() {
            return Err(KimchiError::config(format!(
                "invalid server_log_level: {}",
                self.server_log_level
            )));
        }
        if self.authorities == 0 {
            return Err(KimchiError::config("at least one authority is required"));
        }
        if self.providers == 0 {
            return Err(KimchiError::config("at least one provider is required"));
        }
        let needed = self.authorities + self.providers + self.mixes;
        if u32::from(self.base_port) + needed as u32 > u32::from(u16::MAX) {
            return Err(KimchiError::config(format!(
                "{needed} ports from base_port {} exceed the port range",
                self.base_port
            )));
        }
        if self.tail_poll_ms == 0 {
            return Err(KimchiError::config("tail_poll_ms must be positive"));
        }
        if self.user.is_empty() || self.user.contains(char::is_whitespace) {
            return Err(KimchiError::config(format!("invalid user name: {:?}", self.user)));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, v: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    v.trim().parse().map_err(|e| KimchiError::config(format!("{name}={v}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_topology() -> Result<()> {
        let cfg = KimchiConfig::default();
        cfg.validate()?;
        assert_eq!((cfg.authorities, cfg.providers, cfg.mixes), (3, 2, 6));
        assert_eq!(cfg.base_port, 30000);
        assert_eq!(cfg.tail_poll_ms, 250);
        Ok(())
    }

    #[test]
    fn partial_toml_keeps_defaults() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kimchi.toml");
        fs::write(&path, "mixes = 3\nbase_port = 31000\nshutdown_deadline_secs = 20\n")?;
        let cfg = KimchiConfig::load_from_file(&path)?;
        assert_eq!(cfg.mixes, 3);
        assert_eq!(cfg.base_port, 31000);
        assert_eq!(cfg.shutdown_deadline_secs, Some(20));
        assert_eq!(cfg.authorities, 3);
        Ok(())
    }

    #[test]
    fn rejects_impossible_settings() {
        let bad = [
            KimchiConfig { authorities: 0, ..KimchiConfig::default() },
            KimchiConfig { providers: 0, ..KimchiConfig::default() },
            KimchiConfig { base_port: u16::MAX - 3, ..KimchiConfig::default() },
            KimchiConfig { log_level: "loud".into(), ..KimchiConfig::default() },
            KimchiConfig { server_log_level: "chatty".into(), ..KimchiConfig::default() },
            KimchiConfig { tail_poll_ms: 0, ..KimchiConfig::default() },
            KimchiConfig { user: "a b".into(), ..KimchiConfig::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }
}
