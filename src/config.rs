use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::alist::RetryPolicy;
use crate::sync::mount::Scheme;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// One mount per line: `<localRoot>#alist#<remoteRoot>#<host:port>#<token>`.
    #[serde(default)]
    pub mounts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Standard 5-field cron expression; empty disables scheduled runs.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Run once immediately when the daemon starts.
    #[serde(default)]
    pub run_on_start: bool,
    #[serde(default)]
    pub https: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Where the cache, rebuild flag and run lock live.
    pub state_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            schedule: default_schedule(),
            run_on_start: false,
            https: false,
            request_timeout_secs: default_request_timeout(),
            max_depth: default_max_depth(),
            state_dir: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_schedule() -> String {
    "0 2 * * *".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_depth() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            backoff: default_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    3000
}
fn default_backoff() -> f64 {
    1.0
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
        }
    }
}

impl Config {
    pub fn scheme(&self) -> Scheme {
        if self.general.https {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.general.request_timeout_secs.max(1))
    }

    /// Configured state directory, or `$XDG_DATA_HOME/strmsync`.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.general.state_dir {
            Some(p) => Ok(p.clone()),
            None => {
                let dir = dirs::data_dir().context("Could not determine data directory")?;
                Ok(dir.join("strmsync"))
            }
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("strmsync").join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read config file: {}\n\
             See config/strmsync.example.toml for an example.",
            path.display()
        )
    })?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;

    if config.general.max_depth == 0 {
        anyhow::bail!("general.max_depth must be at least 1");
    }
    if !config.retry.backoff.is_finite() || config.retry.backoff < 1.0 {
        anyhow::bail!("retry.backoff must be a finite number >= 1.0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_minimal_config() {
        let cfg = parse_config("").unwrap();
        assert!(cfg.general.enabled);
        assert_eq!(cfg.general.schedule, "0 2 * * *");
        assert_eq!(cfg.general.request_timeout_secs, 30);
        assert_eq!(cfg.scheme(), Scheme::Http);
        assert_eq!(cfg.retry.policy(), RetryPolicy::default());
        assert!(cfg.mounts.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
mounts = """
/strm/movies#alist#/aliyun/Movies#192.168.1.10:5244#alist-token
"""

[general]
schedule = "*/30 * * * *"
run_on_start = true
https = true
max_depth = 16
state_dir = "/var/lib/strmsync"

[retry]
max_attempts = 5
delay_ms = 500
backoff = 2.0
"#,
        )
        .unwrap();

        assert_eq!(cfg.scheme(), Scheme::Https);
        assert!(cfg.general.run_on_start);
        assert_eq!(cfg.general.max_depth, 16);
        assert_eq!(cfg.state_dir().unwrap(), PathBuf::from("/var/lib/strmsync"));
        assert_eq!(cfg.retry.policy().max_attempts, 5);
        assert_eq!(cfg.retry.policy().delay, Duration::from_millis(500));
        assert!(cfg.mounts.contains("#alist#"));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        assert!(parse_config("[retry]\nbackoff = 0.5\n").is_err());
    }

    #[test]
    fn test_rejects_non_finite_backoff() {
        assert!(parse_config("[retry]\nbackoff = inf\n").is_err());
        assert!(parse_config("[retry]\nbackoff = nan\n").is_err());
    }

    #[test]
    fn test_large_retry_values_give_bounded_policy() {
        let cfg = parse_config("[retry]\ndelay_ms = 9223372036854775807\nbackoff = 1e300\n")
            .unwrap();
        assert_eq!(cfg.retry.policy().delay, Duration::from_millis(i64::MAX as u64));
    }
}
