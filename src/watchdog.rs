// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Launch one critical subprocess and kill it if it never becomes ready
//!
//! The readiness poll runs as a separate task while this flow relays the subprocess's combined
//! stdout and stderr, line by line, to the `relay` tracing target. Only this flow kills and reaps
//! the child; the poll task just reports its verdict.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::fork::{self, Relayed};
use crate::readiness::{Readiness, ReadinessCheck};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::Error;

/// Target used for every relayed subprocess line
pub const RELAY_TARGET: &str = "relay";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogState {
    Launching,
    WaitingReady,
    Ready,
    Failed,
    Terminated,
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchdogState::Launching => "launching",
            WatchdogState::WaitingReady => "waiting-ready",
            WatchdogState::Ready => "ready",
            WatchdogState::Failed => "failed",
            WatchdogState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How the readiness poll ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    Failed,
    /// The output closed before the poll finished
    Undecided,
}

#[derive(Debug)]
pub struct WatchdogReport {
    pub verdict: Verdict,
    /// true if the watchdog sent SIGKILL
    pub killed: bool,
    /// The reaped exit status
    pub status: ExitStatus,
    /// Number of output lines relayed
    pub lines: u64,
}

pub struct ReadinessWatchdog<C: ReadinessCheck> {
    name: String,
    command: Vec<String>,
    check: Arc<C>,
    policy: RetryPolicy,
    symbol_pos: Option<usize>,
}

impl<C: ReadinessCheck> ReadinessWatchdog<C> {
    pub fn new(name: impl Into<String>, command: Vec<String>, check: C, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            command,
            check: Arc::new(check),
            policy,
            symbol_pos: None,
        }
    }

    /// Position of the subprocess's own severity letter within each line, see [`classify`]
    pub fn with_symbol_pos(mut self, symbol_pos: Option<usize>) -> Self {
        self.symbol_pos = symbol_pos;
        self
    }

    /// Runs until the subprocess has exited and been reaped.
    ///
    /// A failed readiness poll kills the subprocess but is not an error; the output is still drained
    /// and the exit status reaped. Readiness keeps being enforced after the output closes, for as
    /// long as the subprocess lives. An error reading the output kills the subprocess and is returned.
    pub async fn run(self) -> Result<WatchdogReport, Error> {
        for arg in &self.command {
            info!(service = %self.name, "Starting {} with command: {}", self.name, arg);
        }

        let Relayed { mut child, output } = fork::new_relayed_process(&self.command)?;
        info!(service = %self.name, pid = ?child.id(), "{} launched", self.name);

        let output = match output.into_async() {
            Ok(output) => output,
            Err(err) => {
                error!(service = %self.name, error = %err, "could not read output, killing {}", self.name);
                kill(&self.name, &mut child);
                child.wait().await?;
                return Err(err);
            }
        };

        self.supervise(&mut child, BufReader::new(output)).await
    }

    /// Polls readiness against `child` while relaying `output`, see [`ReadinessWatchdog::run`]
    ///
    /// `child` has always been reaped when this returns, on success and on error.
    async fn supervise<R>(self, child: &mut Child, mut output: R) -> Result<WatchdogReport, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut state = WatchdogState::Launching;
        let mut readiness = tokio::spawn(poll_readiness(
            self.name.clone(),
            Arc::clone(&self.check),
            self.policy,
        ));
        transition(&self.name, &mut state, WatchdogState::WaitingReady);

        let mut killed = false;
        let mut relayed = 0_u64;
        let mut buf = Vec::new();

        let relay: Result<(), Error> = loop {
            tokio::select! {
                outcome = &mut readiness, if state == WatchdogState::WaitingReady => {
                    killed = self.settle(outcome, &mut state, child);
                }
                // partial reads stay in buf if the other branch wins
                read = output.read_until(b'\n', &mut buf) => {
                    match read {
                        Ok(0) => break Ok(()),
                        Ok(_) => {
                            relay_line(&self.name, self.symbol_pos, &String::from_utf8_lossy(&buf));
                            relayed += 1;
                            buf.clear();
                        }
                        Err(err) => break Err(err.into()),
                    }
                }
            }
        };

        if let Err(err) = relay {
            error!(
                service = %self.name,
                error = ?err,
                "Accidentally terminated. Killing {} process.", self.name
            );
            readiness.abort();
            kill(&self.name, child);
            match child.wait().await {
                Ok(status) => info!(service = %self.name, %status, "{} exited", self.name),
                Err(wait_err) => error!(service = %self.name, error = %wait_err, "failed to reap {}", self.name),
            }
            return Err(err);
        }

        info!(service = %self.name, "Received EOF from {}.", self.name);

        let status = if state == WatchdogState::WaitingReady {
            // closing the output is not exiting, the poll still decides
            let finish = tokio::select! {
                outcome = &mut readiness => Finish::Decided(outcome),
                status = child.wait() => Finish::Exited(status),
            };

            match finish {
                Finish::Decided(outcome) => {
                    killed = self.settle(outcome, &mut state, child);
                    child.wait().await?
                }
                Finish::Exited(status) => {
                    readiness.abort();
                    debug!(service = %self.name, "exited before readiness was decided");
                    status?
                }
            }
        } else {
            child.wait().await?
        };

        let verdict = match state {
            WatchdogState::Ready => Verdict::Ready,
            WatchdogState::Failed => Verdict::Failed,
            _ => Verdict::Undecided,
        };
        transition(&self.name, &mut state, WatchdogState::Terminated);
        info!(service = %self.name, %status, "{} exited", self.name);

        Ok(WatchdogReport {
            verdict,
            killed,
            status,
            lines: relayed,
        })
    }

    /// Applies the readiness verdict, killing the child unless it is ready. Returns true if killed.
    fn settle(
        &self,
        outcome: Result<RetryOutcome<Readiness>, JoinError>,
        state: &mut WatchdogState,
        child: &mut Child,
    ) -> bool {
        match outcome {
            Ok(outcome) if outcome.success => {
                transition(&self.name, state, WatchdogState::Ready);
                false
            }
            Ok(outcome) => {
                let detail = outcome.value.map(|r| r.detail).unwrap_or_default();
                error!(
                    service = %self.name,
                    attempts = outcome.attempts,
                    detail = %detail,
                    "Failed to start {}. Killing {}.", self.name, self.name
                );
                transition(&self.name, state, WatchdogState::Failed);
                kill(&self.name, child)
            }
            Err(err) => {
                error!(service = %self.name, error = %err, "readiness task failed, killing {}", self.name);
                transition(&self.name, state, WatchdogState::Failed);
                kill(&self.name, child)
            }
        }
    }
}

enum Finish {
    Decided(Result<RetryOutcome<Readiness>, JoinError>),
    Exited(std::io::Result<ExitStatus>),
}

async fn poll_readiness<C: ReadinessCheck>(
    name: String,
    check: Arc<C>,
    policy: RetryPolicy,
) -> RetryOutcome<Readiness> {
    info!(service = %name, "Check task start to work.");
    let what = format!("check {} status", name);

    policy
        .run(&what, || {
            let check = Arc::clone(&check);
            async move { check.check().await.map(|r| (r.ready, r)) }
        })
        .await
}

fn transition(name: &str, state: &mut WatchdogState, next: WatchdogState) {
    debug!(service = %name, from = %state, to = %next, "watchdog state change");
    *state = next;
}

/// Force kills the child, returns true if the signal was delivered
fn kill(name: &str, child: &mut Child) -> bool {
    match child.start_kill() {
        Ok(()) => true,
        Err(err) => {
            warn!(service = %name, error = %err, "failed to kill {}", name);
            false
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Picks the severity of a relayed line and the text to forward
///
/// With a `symbol_pos`, the character at that byte offset is the subprocess's own severity letter
/// (`2019-05-12 08:06:51.546335 I | etcdmain: ...`). Everything before it is stripped since the
/// log sink adds its own timestamp. Lines too short for the position are forwarded whole.
pub fn classify(line: &str, symbol_pos: Option<usize>) -> (Severity, &str) {
    let rest = match symbol_pos.and_then(|pos| line.get(pos..)) {
        Some(rest) if !rest.is_empty() => rest,
        _ => return (Severity::Info, line),
    };

    let severity = match rest.chars().next() {
        Some('E') | Some('C') | Some('F') => Severity::Error,
        Some('W') | Some('N') => Severity::Warn,
        _ => Severity::Info,
    };

    (severity, rest)
}

fn relay_line(name: &str, symbol_pos: Option<usize>, line: &str) {
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    match classify(line, symbol_pos) {
        (Severity::Error, text) => error!(target: RELAY_TARGET, service = %name, "{}", text),
        (Severity::Warn, text) => warn!(target: RELAY_TARGET, service = %name, "{}", text),
        (Severity::Info, text) => info!(target: RELAY_TARGET, service = %name, "{}", text),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::pin::Pin;
    use std::process::Stdio;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures::FutureExt;
    use nix::sys::signal::Signal;
    use tokio::io::{AsyncRead, ReadBuf};

    use crate::fork::StdIoConf;

    use super::*;

    /// Output that fails on the first read
    struct BrokenOutput;

    impl AsyncRead for BrokenOutput {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "relay broke")))
        }
    }

    const ETCD_LINE: &str = "2019-05-12 08:06:51.546335 W | etcdserver: slow fdatasync";

    #[test]
    fn test_classify_without_position_forwards_whole_line() {
        assert_eq!(classify(ETCD_LINE, None), (Severity::Info, ETCD_LINE));
    }

    #[test]
    fn test_classify_reads_severity_letter() {
        assert_eq!(
            classify(ETCD_LINE, Some(27)),
            (Severity::Warn, "W | etcdserver: slow fdatasync")
        );
        assert_eq!(
            classify("2019-05-12 08:06:51.546335 E | rafthttp: lost peer", Some(27)).0,
            Severity::Error
        );
        assert_eq!(
            classify("2019-05-12 08:06:51.546335 I | etcdmain: ready", Some(27)).0,
            Severity::Info
        );
    }

    #[test]
    fn test_classify_short_lines() {
        assert_eq!(classify("panic", Some(27)), (Severity::Info, "panic"));
        assert_eq!(classify("", Some(0)), (Severity::Info, ""));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(WatchdogState::WaitingReady.to_string(), "waiting-ready");
    }

    #[tokio::test]
    async fn test_relay_failure_kills_and_reaps() {
        let command = vec!["sleep".to_string(), "30".to_string()];
        let mut child = fork::new_process(
            &command,
            StdIoConf {
                stdin: Stdio::null(),
                stderr: Stdio::null(),
                stdout: Stdio::null(),
            },
        )
        .unwrap();

        let check = || async { Ok::<_, Error>(Readiness::ready("up")) }.boxed();
        let watchdog =
            ReadinessWatchdog::new("etcd", command, check, RetryPolicy::new(1, Duration::from_millis(1)));

        let result = watchdog
            .supervise(&mut child, BufReader::new(BrokenOutput))
            .await;
        assert!(result.is_err());

        // already reaped, the cached status is returned
        let status = child.try_wait().unwrap().expect("child was not reaped");
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_relayed() {
        let mut child = fork::new_process(&["true".to_string()], StdIoConf::inherit()).unwrap();

        let check = || async { Ok::<_, Error>(Readiness::ready("up")) }.boxed();
        let watchdog = ReadinessWatchdog::new(
            "etcd",
            vec!["true".to_string()],
            check,
            RetryPolicy::new(1, Duration::from_millis(1)),
        );

        let output: &[u8] = b"hello \xff\r\nno newline";
        let report = watchdog.supervise(&mut child, output).await.unwrap();

        assert!(!report.killed);
        assert!(report.status.success());
        assert_eq!(report.lines, 2);
    }
}
