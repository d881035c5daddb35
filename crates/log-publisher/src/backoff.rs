// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff used by workers between failed connects and dispatches.
///
/// Each wait sleeps for the current delay and then doubles it, capped at
/// `max`. Waits end early when the pool is cancelled.
#[derive(Debug)]
pub struct Backoff {
    cancel: CancellationToken,
    init: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(cancel: CancellationToken, init: Duration, max: Duration) -> Self {
        Self {
            cancel,
            init,
            max,
            current: init,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.init;
    }

    /// Delay the next call to [`Backoff::wait`] will sleep for.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Sleeps for the current delay. Returns `true` if cancelled before the
    /// delay elapsed.
    pub async fn wait(&mut self) -> bool {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    /// Resets on success and returns `false`; waits on failure and returns
    /// whether the wait was cancelled.
    pub async fn wait_on_error<E>(&mut self, error: Option<&E>) -> bool {
        if error.is_none() {
            self.reset();
            return false;
        }
        self.wait().await
    }
}
