// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Termination signals as a cancellation token
//!
//! SIGINT, SIGTERM and SIGQUIT all cancel the same token, so the supervisor loop stops and tears
//! down through one code path regardless of which signal arrived.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `token` on the first termination signal.
///
/// The handlers are registered before this returns, a signal arriving afterwards is never lost.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = sigquit.recv() => "SIGQUIT",
            _ = token.cancelled() => return,
        };

        info!("Received {}.", name);
        token.cancel();
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nix::sys::signal::{raise, Signal};

    use super::*;

    #[tokio::test]
    async fn test_sigterm_cancels_token() {
        let token = CancellationToken::new();
        let handle = cancel_on_shutdown_signal(token.clone()).unwrap();

        raise(Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("token was not cancelled");
        handle.await.unwrap();
    }
}
