// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Bounded retries with a fixed interval

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::Error;

/// How often, and how far apart, an action is attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

/// The result of running an action under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// true if any attempt succeeded
    pub success: bool,
    /// number of times the action was invoked
    pub attempts: u32,
    /// value of the last attempt that returned one, `None` if every attempt raised
    pub value: Option<T>,
}

impl RetryPolicy {
    /// A zero attempt count is raised to one, the action always runs at least once.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Invokes `action` until it reports success or the attempts are used up.
    ///
    /// The action yields `(success, value)`. An `Err` from the action counts as a failed attempt
    /// and is logged, it is never propagated. Sleeps `interval` between attempts, never after the last.
    pub async fn run<F, Fut, T>(&self, what: &str, mut action: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(bool, T), Error>>,
    {
        let mut value = None;

        for attempt in 1..=self.attempts {
            match action().await {
                Ok((true, v)) => {
                    info!(attempt, "succeeded to {}", what);
                    return RetryOutcome {
                        success: true,
                        attempts: attempt,
                        value: Some(v),
                    };
                }
                Ok((false, v)) => {
                    warn!(attempt, max = self.attempts, "failed to {}", what);
                    value = Some(v);
                }
                Err(err) => {
                    warn!(attempt, max = self.attempts, error = %err, "error while trying to {}", what);
                }
            }

            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }

        RetryOutcome {
            success: false,
            attempts: self.attempts,
            value,
        }
    }

    /// Like [`RetryPolicy::run`], but the first `Err` from the action ends the retries and is returned.
    pub async fn try_run<F, Fut, T>(&self, what: &str, mut action: F) -> Result<RetryOutcome<T>, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(bool, T), Error>>,
    {
        let mut value = None;

        for attempt in 1..=self.attempts {
            let (success, v) = action().await?;
            if success {
                info!(attempt, "succeeded to {}", what);
                return Ok(RetryOutcome {
                    success,
                    attempts: attempt,
                    value: Some(v),
                });
            }

            warn!(attempt, max = self.attempts, "failed to {}", what);
            value = Some(v);

            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }

        Ok(RetryOutcome {
            success: false,
            attempts: self.attempts,
            value,
        })
    }
}
