// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::pipe::{Pipe, PipeEnd, Read};
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// Services share the supervisor's own stdio
    pub fn inherit() -> Self {
        Self {
            stdin: Stdio::inherit(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// A child whose stdout and stderr arrive on one pipe
pub struct Relayed {
    pub child: Child,
    pub output: PipeEnd<Read>,
}

/// Spawns `argv[0]` with the remaining arguments.
pub fn new_process(argv: &[String], stdio: StdIoConf) -> Result<Child, Error> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::from("empty command line"))?;

    let child = Command::new(program)
        .args(args)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr)
        .spawn()
        .map_err(|e| Error::from(format!("failed to spawn {}: {}", program, e)))?;

    Ok(child)
}

/// Spawns `argv` with stdout and stderr combined into a single readable stream.
pub fn new_relayed_process(argv: &[String]) -> Result<Relayed, Error> {
    let (output, write) = Pipe::new()?.split();

    let child = new_process(
        argv,
        StdIoConf {
            stdin: Stdio::null(),
            stderr: write.stdio()?,
            stdout: write.stdio()?,
        },
    )?;
    // the child holds the only writers now, EOF arrives when it closes them
    drop(write);

    Ok(Relayed { child, output })
}

/// Sends `signal` to the process, a process that is already gone is not an error.
pub fn signal(pid: u32, signal: Signal) -> Result<(), Error> {
    let pid = i32::try_from(pid).map_err(|_| Error::from(format!("pid out of range: {}", pid)))?;

    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}

/// Requests a graceful stop with SIGINT
pub fn interrupt(child: &Child) -> Result<(), Error> {
    match child.id() {
        Some(pid) => signal(pid, Signal::SIGINT),
        // already reaped
        None => Ok(()),
    }
}
