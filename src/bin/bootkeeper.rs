// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use clap::Command;
use tokio::runtime;

use bootkeeper::procs::{Boot, Daemon, Process};
use bootkeeper::Error;

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn main() -> Result<(), Error> {
    let args = Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Boot::sub_command().setup_clap_app())
        .subcommand(Daemon::sub_command().setup_clap_app())
        .get_matches();

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match args.subcommand() {
            Some((Boot::NAME, args)) => Boot::run(args).await,
            Some((Daemon::NAME, args)) => Daemon::run(args).await,
            Some((arg, _)) => Err(Error::from(format!("unexpected subcommand: {}", arg))),
            None => Err(Error::from("command required")),
        }
    })
}
