//! Process watcher: polls one pid until it disappears.
//!
//! The watcher checks liveness immediately and then every poll interval.
//! It fires its `stopped` signal exactly once: when a check reports the
//! process gone, or when the handle is closed or dropped. A check that
//! *errors* is not evidence of death; it is logged and polling continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::process::ProcessHost;

/// Handle to a background liveness poller for a single pid.
#[derive(Debug)]
pub struct ProcessWatcher {
    pid: u32,
    cancel: CancellationToken,
    stopped_rx: watch::Receiver<bool>,
}

impl ProcessWatcher {
    /// Start polling `pid` through `host` every `interval`.
    #[must_use]
    pub fn spawn(pid: u32, host: Arc<dyn ProcessHost>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let (stopped_tx, stopped_rx) = watch::channel(false);

        tokio::spawn(
            Self::run(pid, host, interval, cancel.clone(), stopped_tx)
                .instrument(info_span!("process_watcher", pid)),
        );

        Self {
            pid,
            cancel,
            stopped_rx,
        }
    }

    async fn run(
        pid: u32,
        host: Arc<dyn ProcessHost>,
        interval: Duration,
        cancel: CancellationToken,
        stopped_tx: watch::Sender<bool>,
    ) {
        loop {
            let alive = tokio::select! {
                () = cancel.cancelled() => break,
                result = host.is_alive(pid) => result,
            };

            match alive {
                Ok(true) => {}
                Ok(false) => {
                    debug!("process no longer alive");
                    break;
                }
                Err(err) => {
                    debug!(%err, "liveness check failed, still polling");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        // Works with no receivers left; the flag is never reset.
        stopped_tx.send_replace(true);
        debug!("watcher fired stopped");
    }

    /// The watched pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop watching. The `stopped` signal fires if it has not already.
    ///
    /// Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the watcher has fired or been told to close.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || *self.stopped_rx.borrow()
    }

    /// A future resolving once the watcher has fired `stopped`.
    ///
    /// Independent of this handle; dropping the handle fires it.
    #[must_use]
    pub fn stopped(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.stopped_rx.clone();
        async move {
            // An error means the poller is gone, which only happens after firing.
            let _ = rx.wait_for(|fired| *fired).await;
        }
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
