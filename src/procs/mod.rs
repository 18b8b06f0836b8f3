// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod boot;
mod daemon;

pub use boot::Boot;
pub use daemon::Daemon;

use std::path::PathBuf;

use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::config::{LogConfig, RetryConfig};
use crate::Error;

pub const CONFIG: &str = "config";
pub const PRINT_LOG: &str = "print-log";
pub const RETRY_TIMES: &str = "retry-times";
pub const RETRY_INTERVAL_MS: &str = "retry-interval-ms";
pub const CHECK_INTERVAL_MS: &str = "check-interval-ms";

/// A trait to define common construction of a process role
///
/// Each role is one subcommand of the `bootkeeper` binary.
#[async_trait(?Send)]
pub trait Process {
    const NAME: &'static str;

    /// CLI SubCommand arguments, without the common options
    fn inner_sub_command() -> Command;

    fn sub_command() -> Command {
        default_subcommand_opts(Self::inner_sub_command())
    }

    async fn run(args: &ArgMatches) -> Result<(), Error>;
}

fn default_subcommand_opts(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(CONFIG)
            .short('c')
            .long(CONFIG)
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf))
            .required(true)
            .help("YAML configuration file"),
    )
    .arg(
        Arg::new(PRINT_LOG)
            .long(PRINT_LOG)
            .action(ArgAction::SetTrue)
            .help("Log to stdout only, ignoring any configured log file"),
    )
}

fn retry_opts(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(RETRY_TIMES)
            .long(RETRY_TIMES)
            .value_name("NUMBER")
            .value_parser(value_parser!(u32).range(1..))
            .help("Total attempts of key operations"),
    )
    .arg(
        Arg::new(RETRY_INTERVAL_MS)
            .long(RETRY_INTERVAL_MS)
            .value_name("MILLIS")
            .value_parser(value_parser!(u64))
            .help("Interval between attempts of key operations"),
    )
}

fn config_path(args: &ArgMatches) -> Result<PathBuf, Error> {
    let path = args
        .get_one::<PathBuf>(CONFIG)
        .cloned()
        .ok_or_else(|| Error::from("config is a required parameter"))?;

    if !path.is_file() {
        return Err(Error::from(format!("config file not found: {}", path.display())));
    }

    Ok(path)
}

fn apply_log_overrides(args: &ArgMatches, log: &mut LogConfig) {
    if args.get_flag(PRINT_LOG) {
        log.log_file = None;
    }
}

fn apply_retry_overrides(args: &ArgMatches, retry: &mut RetryConfig) {
    if let Some(times) = args.get_one::<u32>(RETRY_TIMES) {
        retry.times = *times;
    }
    if let Some(interval) = args.get_one::<u64>(RETRY_INTERVAL_MS) {
        retry.interval_ms = *interval;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_overrides() {
        let args = Daemon::sub_command().get_matches_from(vec![
            "daemon",
            "--config",
            "/etc/bootkeeper/etcd.yaml",
            "--print-log",
            "--retry-times",
            "9",
            "--retry-interval-ms",
            "250",
        ]);

        let mut log = LogConfig {
            log_file: Some(PathBuf::from("/var/log/etcd.log")),
            ..LogConfig::default()
        };
        let mut retry = RetryConfig::default();
        apply_log_overrides(&args, &mut log);
        apply_retry_overrides(&args, &mut retry);

        assert_eq!(log.log_file, None);
        assert_eq!(retry.times, 9);
        assert_eq!(retry.interval_ms, 250);
    }

    #[test]
    fn test_zero_retry_times_rejected() {
        let result = Daemon::sub_command().try_get_matches_from(vec![
            "daemon",
            "--config",
            "x.yaml",
            "--retry-times",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = Boot::sub_command().get_matches_from(vec![
            "boot",
            "--config",
            "/nonexistent/bootkeeper.yaml",
        ]);
        assert!(config_path(&args).is_err());
    }
}
