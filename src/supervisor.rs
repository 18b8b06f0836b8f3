// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Launch and monitor an ordered set of services
//!
//! Rules:
//!   - services start in rank order and stop in the exact reverse
//!   - a service is only checked or restarted while its pid file is locked
//!   - a locked pid file means someone else is maintaining the service, skip it this round
//!   - one service failing a check never stops the others from being checked

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fork::{self, StdIoConf};
use crate::marker::{Acquired, MarkerLock, MarkerValue};
use crate::service::{Service, ServiceSpec};
use crate::Error;

/// What a single check did for a service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The tracked process is alive
    Running(u32),
    /// The process was missing or dead and a new one was started
    Restarted(u32),
    /// Another process holds the pid file lock
    Locked,
    /// The pid file could not be opened, or the check itself failed
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCheck {
    pub name: String,
    pub outcome: CheckOutcome,
}

#[derive(Debug)]
pub struct ServiceSupervisor {
    services: Vec<Service>,
    check_interval: Duration,
}

impl ServiceSupervisor {
    /// Validates and orders the services, then writes the unstarted sentinel to every pid file.
    pub fn configure(mut specs: Vec<ServiceSpec>, check_interval: Duration) -> Result<Self, Error> {
        validate(&specs)?;
        specs.sort_by_key(|spec| spec.rank);

        let services: Vec<Service> = specs.into_iter().map(Service::new).collect();
        for service in &services {
            service.marker().reset().map_err(|e| {
                Error::from(format!(
                    "failed to initialize pid file {} for {}: {}",
                    service.marker().path().display(),
                    service.name(),
                    e
                ))
            })?;
            info!(service = %service.name(), "Service {} configuration loaded.", service.name());
        }

        Ok(Self {
            services,
            check_interval,
        })
    }

    /// Services in start order
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name() == name)
    }

    /// Checks every service once, in start order, restarting any that are down.
    pub fn tick(&mut self) -> Vec<ServiceCheck> {
        self.services
            .iter_mut()
            .map(|service| ServiceCheck {
                name: service.name().to_string(),
                outcome: check(service),
            })
            .collect()
    }

    /// Ticks every `check_interval` until `shutdown` is cancelled, then tears everything down.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let report = self.tick();
            debug!(?report, "service check complete");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.check_interval) => (),
            }
        }

        info!("Received interrupt. Stopping service check.");
        self.teardown().await;
    }

    /// Interrupts every tracked process in reverse start order, waiting for each to exit.
    ///
    /// Returns the names of the services that were stopped, in the order they were stopped.
    pub async fn teardown(&mut self) -> Vec<String> {
        let mut stopped = Vec::new();

        for service in self.services.iter_mut().rev() {
            let mut child = match service.take_process() {
                Some(child) => child,
                None => continue,
            };

            if let Err(err) = fork::interrupt(&child) {
                error!(service = %service.name(), error = %err, "failed to interrupt service {}", service.name());
            }
            info!(service = %service.name(), "Killing service {}.", service.name());

            match child.wait().await {
                Ok(status) => info!(service = %service.name(), %status, "Killed service {}.", service.name()),
                Err(err) => error!(service = %service.name(), error = %err, "failed to wait for service {}", service.name()),
            }
            stopped.push(service.name().to_string());
        }

        stopped
    }
}

fn validate(specs: &[ServiceSpec]) -> Result<(), Error> {
    if specs.is_empty() {
        return Err(Error::from("no services configured"));
    }

    let mut names = HashSet::new();
    let mut pid_files = HashSet::new();
    let mut ranks = HashSet::new();

    for spec in specs {
        if spec.name.is_empty() {
            return Err(Error::from("service name must not be empty"));
        }
        if spec.command.is_empty() || spec.command[0].is_empty() {
            return Err(Error::from(format!("service {} has no command", spec.name)));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(Error::from(format!("service {} is configured twice", spec.name)));
        }
        if !pid_files.insert(spec.pid_file.as_path()) {
            return Err(Error::from(format!(
                "pid file {} is shared by more than one service",
                spec.pid_file.display()
            )));
        }
        if !ranks.insert(spec.rank) {
            return Err(Error::from(format!(
                "rank {} of service {} is not unique",
                spec.rank, spec.name
            )));
        }
    }

    Ok(())
}

fn check(service: &mut Service) -> CheckOutcome {
    info!(service = %service.name(), "Checking status of service {}.", service.name());

    let mut lock = match service.marker().acquire() {
        Ok(Acquired::Locked(lock)) => lock,
        Ok(Acquired::Unavailable) => {
            warn!(service = %service.name(), "Failed to obtain lock for {}. Skipped check.", service.name());
            return CheckOutcome::Locked;
        }
        Err(err) => {
            error!(
                service = %service.name(),
                path = %service.marker().path().display(),
                error = %err,
                "Failed to open pid file for service {}.", service.name()
            );
            return CheckOutcome::Failed;
        }
    };

    let outcome = match restart_if_down(service, &mut lock) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(service = %service.name(), error = %err, "Failed to check service {}.", service.name());
            CheckOutcome::Failed
        }
    };

    // the lock must be released whatever happened above
    if let Err(err) = lock.release() {
        error!(service = %service.name(), error = %err, "failed to unlock pid file of {}", service.name());
    }

    outcome
}

fn restart_if_down(service: &mut Service, lock: &mut MarkerLock) -> Result<CheckOutcome, Error> {
    let recorded = match lock.read() {
        Ok(recorded) => Some(recorded),
        Err(err) => {
            warn!(service = %service.name(), error = %err, "unreadable pid file for {}", service.name());
            None
        }
    };

    if service.is_running()? {
        let pid = service
            .pid()
            .ok_or_else(|| Error::from("running process has no pid"))?;

        let recorded = recorded.and_then(MarkerValue::pid);
        if recorded != Some(pid) {
            warn!(
                service = %service.name(),
                recorded = ?recorded,
                tracked = pid,
                "pid file of {} does not match the running process, rewriting it", service.name()
            );
            lock.write(MarkerValue::Pid(pid))?;
        }

        info!(service = %service.name(), pid, "Service {} is running.", service.name());
        return Ok(CheckOutcome::Running(pid));
    }

    warn!(service = %service.name(), "Service {} is down.", service.name());
    info!(service = %service.name(), "Starting the service {} and writing pid file.", service.name());

    let child = fork::new_process(&service.spec().command, StdIoConf::inherit())?;
    let pid = child
        .id()
        .ok_or_else(|| Error::from("spawned process has no pid"))?;
    service.set_process(child);
    lock.write(MarkerValue::Pid(pid))?;

    Ok(CheckOutcome::Restarted(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, pid_file: &str, rank: u32) -> ServiceSpec {
        ServiceSpec::new(name, vec!["sleep".to_string(), "30".to_string()], pid_file, rank)
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[spec("a", "/tmp/a.pid", 0), spec("a", "/tmp/b.pid", 1)]).is_err());
        assert!(validate(&[spec("a", "/tmp/a.pid", 0), spec("b", "/tmp/a.pid", 1)]).is_err());
        assert!(validate(&[spec("a", "/tmp/a.pid", 0), spec("b", "/tmp/b.pid", 0)]).is_err());
        assert!(validate(&[spec("a", "/tmp/a.pid", 1), spec("b", "/tmp/b.pid", 0)]).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let empty = ServiceSpec::new("a", vec![], "/tmp/a.pid", 0);
        assert!(validate(&[empty]).is_err());
    }

    #[test]
    fn test_configure_orders_by_rank_and_resets_pid_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pid");
        let b = dir.path().join("b.pid");
        std::fs::write(&a, "31337").unwrap();

        let supervisor = ServiceSupervisor::configure(
            vec![
                ServiceSpec::new("b", vec!["true".to_string()], &b, 5),
                ServiceSpec::new("a", vec!["true".to_string()], &a, 1),
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        let names: Vec<&str> = supervisor.services().iter().map(Service::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "-1");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "-1");
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pid");
        let mut supervisor = ServiceSupervisor::configure(
            vec![spec("a", path.to_str().unwrap(), 0)],
            Duration::from_secs(1),
        )
        .unwrap();

        let pid = match supervisor.tick()[0].outcome {
            CheckOutcome::Restarted(pid) => pid,
            other => panic!("unexpected outcome: {:?}", other),
        };

        for stale in &["-1", "31337", "garbage"] {
            std::fs::write(&path, stale).unwrap();
            assert_eq!(supervisor.tick()[0].outcome, CheckOutcome::Running(pid));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), pid.to_string());
        }

        supervisor.teardown().await;
    }
}
