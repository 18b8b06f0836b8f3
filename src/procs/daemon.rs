// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use async_trait::async_trait;
use clap::{ArgMatches, Command};
use tracing::info;

use crate::config::DaemonConfig;
use crate::logging;
use crate::procs::{self, Process};
use crate::watchdog::ReadinessWatchdog;
use crate::Error;

/// Run one critical daemon under a readiness watchdog
///
/// Rules:
///   - the daemon's stdout and stderr are relayed to the log
///   - the daemon is killed if it is not ready within the retry budget
///   - exits once the daemon's output closes and its exit status has been reaped
#[derive(Debug)]
pub struct Daemon;

#[async_trait(?Send)]
impl Process for Daemon {
    const NAME: &'static str = "daemon";

    fn inner_sub_command() -> Command {
        procs::retry_opts(
            Command::new(Self::NAME)
                .about("Launch a daemon, relay its output, and kill it if it never becomes ready"),
        )
    }

    async fn run(args: &ArgMatches) -> Result<(), Error> {
        let mut config = DaemonConfig::load(procs::config_path(args)?)?;
        procs::apply_log_overrides(args, &mut config.log);
        procs::apply_retry_overrides(args, &mut config.retry);
        config.validate()?;

        let _log = logging::init(&config.log)?;

        let watchdog = ReadinessWatchdog::new(
            config.name.clone(),
            config.command.clone(),
            config.probe(),
            config.retry.policy(),
        )
        .with_symbol_pos(config.raw_log_symbol_pos);

        let report = watchdog.run().await?;
        info!(
            service = %config.name,
            verdict = ?report.verdict,
            killed = report.killed,
            status = %report.status,
            "Exiting."
        );

        Ok(())
    }
}
