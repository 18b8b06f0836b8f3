// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;

use tokio::process::Child;

use crate::marker::MarkerFile;
use crate::Error;

/// Immutable description of a supervised service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// argument vector, the first element is the program
    pub command: Vec<String>,
    pub pid_file: PathBuf,
    /// lower ranks start first and stop last
    pub rank: u32,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, pid_file: impl Into<PathBuf>, rank: u32) -> Self {
        Self {
            name: name.into(),
            command,
            pid_file: pid_file.into(),
            rank,
        }
    }
}

/// A service and the handle of the process last started for it
#[derive(Debug)]
pub struct Service {
    spec: ServiceSpec,
    marker: MarkerFile,
    process: Option<Child>,
}

impl Service {
    pub(crate) fn new(spec: ServiceSpec) -> Self {
        let marker = MarkerFile::new(spec.pid_file.clone());
        Self {
            spec,
            marker,
            process: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn marker(&self) -> &MarkerFile {
        &self.marker
    }

    /// Pid of the tracked process, if one is tracked and not yet reaped
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// True if a tracked process exists and has not exited. Reaps it if it has.
    pub fn is_running(&mut self) -> Result<bool, Error> {
        match self.process.as_mut() {
            None => Ok(false),
            Some(child) => Ok(child.try_wait()?.is_none()),
        }
    }

    pub(crate) fn set_process(&mut self, child: Child) {
        self.process = Some(child);
    }

    pub(crate) fn take_process(&mut self) -> Option<Child> {
        self.process.take()
    }
}
