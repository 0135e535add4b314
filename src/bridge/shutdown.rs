//! Process stop signal.

use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status when a second signal cuts shutdown short
const FORCED_EXIT_CODE: i32 = 130;

/// Fires the bridge's stop token at most once, however many times it is
/// triggered.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true only for the call that actually fired the token.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Route SIGINT/SIGTERM to [`trigger`](Self::trigger). A second signal
    /// while shutdown is running exits the process at once. Once per process.
    pub fn install_signal_handler(&self) -> anyhow::Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            if signal.trigger() {
                info!("Stop requested, shutting down (signal again to force exit)...");
            } else {
                warn!("Second stop signal, exiting without finishing shutdown");
                std::process::exit(FORCED_EXIT_CODE);
            }
        })
        .context("failed to install signal handler")
    }
}
