// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration for the boot supervisor and the daemon watchdog
//!
//! Precedence (lowest to highest):
//! 1. programmatic defaults
//! 2. the YAML file given on the command line
//! 3. `BOOTKEEPER_*` environment variables, nested keys split on `__`
//! 4. command line flags, applied by the caller after loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::readiness::{CommandProbe, Probe, TcpProbe};
use crate::retry::RetryPolicy;
use crate::service::ServiceSpec;
use crate::Error;

pub const ENV_PREFIX: &str = "BOOTKEEPER_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub times: u32,
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            times: 5,
            interval_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.times, Duration::from_millis(self.interval_ms))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// default level (trace, debug, info, warn, error), `RUST_LOG` still applies on top
    pub level: String,
    pub format: LogFormat,
    /// when set, events are also appended to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_file: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub command: Vec<String>,
    pub pid_file: PathBuf,
    /// start position, defaults to the position in the list
    #[serde(default)]
    pub rank: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// shown in the start and exit banners
    pub name: String,
    pub check_interval_ms: u64,
    pub log: LogConfig,
    pub services: Vec<ServiceConfig>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            name: "bootkeeper".to_string(),
            check_interval_ms: 5_000,
            log: LogConfig::default(),
            services: Vec::new(),
        }
    }
}

impl BootConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config: Self = figment(Self::default(), path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.check_interval_ms == 0 {
            return Err(Error::from("check_interval_ms must be positive"));
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Service descriptors, ranks defaulting to list position
    pub fn service_specs(&self) -> Vec<ServiceSpec> {
        self.services
            .iter()
            .enumerate()
            .map(|(position, service)| {
                ServiceSpec::new(
                    service.name.clone(),
                    service.command.clone(),
                    service.pid_file.clone(),
                    service.rank.unwrap_or(position as u32),
                )
            })
            .collect()
    }
}

/// The readiness probe for the watched daemon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeConfig {
    /// ready when the command exits 0
    Command { argv: Vec<String> },
    /// ready when a TCP connection is accepted
    Tcp { address: String },
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig::Tcp {
            address: "127.0.0.1:2379".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub name: String,
    pub command: Vec<String>,
    pub retry: RetryConfig,
    pub log: LogConfig,
    /// offset of the daemon's own severity letter in each output line
    pub raw_log_symbol_pos: Option<usize>,
    pub probe: ProbeConfig,
    pub probe_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: "etcd".to_string(),
            command: Vec::new(),
            retry: RetryConfig::default(),
            log: LogConfig::default(),
            raw_log_symbol_pos: None,
            probe: ProbeConfig::default(),
            probe_timeout_ms: 5_000,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config: Self = figment(Self::default(), path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::from("name must not be empty"));
        }
        if self.command.is_empty() {
            return Err(Error::from(format!("no command configured for {}", self.name)));
        }
        if self.retry.times == 0 {
            return Err(Error::from("retry.times must be at least 1"));
        }
        if let ProbeConfig::Command { argv } = &self.probe {
            if argv.is_empty() {
                return Err(Error::from("probe command must not be empty"));
            }
        }

        Ok(())
    }

    pub fn probe(&self) -> Probe {
        let timeout = Duration::from_millis(self.probe_timeout_ms);
        match &self.probe {
            ProbeConfig::Command { argv } => Probe::Command(CommandProbe::new(argv.clone(), timeout)),
            ProbeConfig::Tcp { address } => Probe::Tcp(TcpProbe::new(address.clone(), timeout)),
        }
    }
}

fn figment<T: Serialize>(defaults: T, path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(defaults))
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_boot_config() {
        let file = write_yaml(
            r#"
name: judge
check_interval_ms: 250
services:
  - name: etcd
    command: ["etcd-daemon"]
    pid_file: /run/etcd.pid
  - name: judge
    command: ["judge-daemon", "--verbose"]
    pid_file: /run/judge.pid
    rank: 7
"#,
        );

        let config = BootConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "judge");
        assert_eq!(config.check_interval(), Duration::from_millis(250));
        assert_eq!(config.log, LogConfig::default());

        let specs = config.service_specs();
        assert_eq!(specs[0].name, "etcd");
        assert_eq!(specs[0].rank, 0);
        assert_eq!(specs[1].command, vec!["judge-daemon", "--verbose"]);
        assert_eq!(specs[1].rank, 7);
    }

    #[test]
    fn test_daemon_config_probe() {
        let file = write_yaml(
            r#"
name: etcd
command: ["etcd", "--data-dir", "/var/lib/etcd"]
raw_log_symbol_pos: 27
probe:
  type: command
  argv: ["etcdctl", "endpoint", "health"]
log:
  level: debug
  format: json
"#,
        );

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.raw_log_symbol_pos, Some(27));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(
            config.probe,
            ProbeConfig::Command {
                argv: vec!["etcdctl".into(), "endpoint".into(), "health".into()]
            }
        );
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_daemon_config_requires_command() {
        let file = write_yaml("name: etcd\n");
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut boot = BootConfig::default();
        boot.check_interval_ms = 0;
        assert!(boot.validate().is_err());

        let mut daemon = DaemonConfig {
            command: vec!["etcd".to_string()],
            ..DaemonConfig::default()
        };
        assert!(daemon.validate().is_ok());
        daemon.retry.times = 0;
        assert!(daemon.validate().is_err());
    }
}
