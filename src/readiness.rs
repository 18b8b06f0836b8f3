// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Opaque status checks for a freshly started subprocess

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use crate::Error;

/// What a single probe observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub detail: String,
}

impl Readiness {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
        }
    }

    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
        }
    }
}

/// A no-argument status check, invoked repeatedly by the watchdog
#[async_trait]
pub trait ReadinessCheck: Send + Sync + 'static {
    async fn check(&self) -> Result<Readiness, Error>;
}

/// Plain closures returning boxed futures are checks too
#[async_trait]
impl<F> ReadinessCheck for F
where
    F: Fn() -> BoxFuture<'static, Result<Readiness, Error>> + Send + Sync + 'static,
{
    async fn check(&self) -> Result<Readiness, Error> {
        (self)().await
    }
}

/// Ready when the command exits successfully
#[derive(Clone, Debug)]
pub struct CommandProbe {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl ReadinessCheck for CommandProbe {
    async fn check(&self) -> Result<Readiness, Error> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| Error::from("empty probe command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok(Readiness::not_ready(format!(
                    "probe timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(stderr.trim());
        }

        Ok(Readiness {
            ready: output.status.success(),
            detail,
        })
    }
}

/// Ready when something accepts a TCP connection at `address`
#[derive(Clone, Debug)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: String, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

#[async_trait]
impl ReadinessCheck for TcpProbe {
    async fn check(&self) -> Result<Readiness, Error> {
        match timeout(self.timeout, TcpStream::connect(self.address.as_str())).await {
            Ok(Ok(_)) => Ok(Readiness::ready(format!("{} accepted a connection", self.address))),
            Ok(Err(e)) => Ok(Readiness::not_ready(format!("{}: {}", self.address, e))),
            Err(_) => Ok(Readiness::not_ready(format!(
                "{}: connect timed out after {:?}",
                self.address, self.timeout
            ))),
        }
    }
}

/// One of the built in probes
#[derive(Clone, Debug)]
pub enum Probe {
    Command(CommandProbe),
    Tcp(TcpProbe),
}

#[async_trait]
impl ReadinessCheck for Probe {
    async fn check(&self) -> Result<Readiness, Error> {
        match self {
            Probe::Command(probe) => probe.check().await,
            Probe::Tcp(probe) => probe.check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use tokio::net::TcpListener;

    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_command_probe_follows_exit_status() {
        let healthy = CommandProbe::new(argv(&["sh", "-c", "echo healthy"]), Duration::from_secs(5));
        let readiness = healthy.check().await.unwrap();
        assert!(readiness.ready);
        assert_eq!(readiness.detail, "healthy");

        let sick = CommandProbe::new(argv(&["sh", "-c", "echo unreachable 1>&2; exit 1"]), Duration::from_secs(5));
        let readiness = sick.check().await.unwrap();
        assert!(!readiness.ready);
        assert_eq!(readiness.detail, "unreachable");
    }

    #[tokio::test]
    async fn test_command_probe_times_out() {
        let hung = CommandProbe::new(argv(&["sleep", "10"]), Duration::from_millis(50));
        let readiness = hung.check().await.unwrap();
        assert!(!readiness.ready);
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(address.clone(), Duration::from_secs(1));
        assert!(probe.check().await.unwrap().ready);

        drop(listener);
        let probe = TcpProbe::new(address, Duration::from_secs(1));
        assert!(!probe.check().await.unwrap().ready);
    }

    #[tokio::test]
    async fn test_closure_is_a_check() {
        let check = || async { Ok::<_, Error>(Readiness::ready("always")) }.boxed();
        assert!(check.check().await.unwrap().ready);
    }
}
