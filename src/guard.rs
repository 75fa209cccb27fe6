use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Sleep};

/// A single-shot, cancellable deadline.
///
/// Each classification stage arms exactly one guard for its window and
/// disarms it on success. [`expired`](Self::expired) is meant for
/// `tokio::select!`: dropping and re-creating the future does not restart
/// the clock, since the underlying timer lives in the guard itself.
///
/// The guard fires at most once. After firing, or after
/// [`disarm`](Self::disarm), `expired` pends forever, so a disarm racing
/// an expiry resolves to whichever side the select committed to first and
/// never both.
#[derive(Debug)]
pub struct TimeoutGuard {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl TimeoutGuard {
    /// Arm a guard which expires after `window`.
    pub fn arm(window: Duration) -> Self {
        Self {
            sleep: Box::pin(sleep(window)),
            armed: true,
        }
    }

    /// Cancel the guard. Idempotent.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Resolves when the window has elapsed; at most once per guard.
    pub async fn expired(&mut self) {
        if !self.armed {
            pending::<()>().await;
        }

        self.sleep.as_mut().await;
        self.armed = false;
    }
}
