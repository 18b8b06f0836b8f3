// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use async_trait::async_trait;
use clap::{value_parser, Arg, ArgMatches, Command};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BootConfig;
use crate::logging;
use crate::procs::{self, Process};
use crate::signals;
use crate::supervisor::ServiceSupervisor;
use crate::Error;

/// Start services in order and keep them running
///
/// Rules:
///   - every configured service gets a pid file, reset on startup
///   - services are checked every check interval and restarted when down
///   - SIGINT, SIGTERM and SIGQUIT stop the checks and tear services down in reverse order
#[derive(Debug)]
pub struct Boot;

#[async_trait(?Send)]
impl Process for Boot {
    const NAME: &'static str = "boot";

    fn inner_sub_command() -> Command {
        Command::new(Self::NAME)
            .about("Start the configured services in order and restart them when they die")
            .arg(
                Arg::new(procs::CHECK_INTERVAL_MS)
                    .long(procs::CHECK_INTERVAL_MS)
                    .value_name("MILLIS")
                    .value_parser(value_parser!(u64).range(1..))
                    .help("Interval between service checks"),
            )
    }

    async fn run(args: &ArgMatches) -> Result<(), Error> {
        let mut config = BootConfig::load(procs::config_path(args)?)?;
        procs::apply_log_overrides(args, &mut config.log);
        if let Some(interval) = args.get_one::<u64>(procs::CHECK_INTERVAL_MS) {
            config.check_interval_ms = *interval;
        }
        config.validate()?;

        let _log = logging::init(&config.log)?;
        info!("{} boot program started.", config.name);

        let mut supervisor =
            ServiceSupervisor::configure(config.service_specs(), config.check_interval())?;

        let shutdown = CancellationToken::new();
        let _signals = signals::cancel_on_shutdown_signal(shutdown.clone())?;

        supervisor.run(shutdown).await;

        info!("{} boot program exiting.", config.name);
        Ok(())
    }
}
