//! Background refresh.
//!
//! [`RefreshWorker`] runs a synchronization pass every `refresh_interval`.
//! Manual refreshes take a [`PauseGuard`] so the worker skips its ticks
//! until the guard drops, whichever way the manual pass ends. A [`StopFlag`]
//! aborts a running pass at the next block boundary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::WalletError;
use crate::source::ChainSource;
use crate::wallet::Wallet;

/// Shared request to abandon synchronization.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts manual passes that want the worker idle.
#[derive(Debug, Clone, Default)]
pub struct PauseControl(Arc<AtomicUsize>);

impl PauseControl {
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    /// Pause until the returned guard drops.
    pub fn pause(&self) -> PauseGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        PauseGuard(self.0.clone())
    }
}

/// Resumes the worker on drop.
#[derive(Debug)]
pub struct PauseGuard(Arc<AtomicUsize>);

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Periodic synchronization task.
pub struct RefreshWorker {
    shutdown: watch::Sender<bool>,
    stop: StopFlag,
    handle: JoinHandle<()>,
}

impl RefreshWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<S: ChainSource + 'static>(wallet: Arc<Wallet<S>>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let stop = wallet.stop_flag();
        let period = wallet.config().refresh_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("refresh worker started, every {:?}", period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if wallet.pause_control().is_paused() {
                            debug!("refresh worker paused, skipping tick");
                            continue;
                        }
                        let outcome = wallet.background_refresh().await;
                        match outcome.error {
                            None => {}
                            Some(WalletError::Cancelled) => debug!("background refresh cancelled"),
                            Some(e) if e.is_transient() => warn!("background refresh: {}", e),
                            Some(e) => warn!("background refresh failed, rescan may be needed: {}", e),
                        }
                    }
                }
            }
            info!("refresh worker stopped");
        });

        Self { shutdown, stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort any running pass and wait for the task to end.
    pub async fn shutdown(self) {
        self.stop.stop();
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("refresh worker ended abnormally: {}", e);
        }
        self.stop.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let other = flag.clone();
        other.stop();
        assert!(flag.is_stopped());
        flag.reset();
        assert!(!other.is_stopped());
    }

    #[test]
    fn test_pause_guard_resumes_on_drop() {
        let pause = PauseControl::default();
        let a = pause.pause();
        let b = pause.pause();
        drop(a);
        assert!(pause.is_paused());
        drop(b);
        assert!(!pause.is_paused());
    }

    #[test]
    fn test_pause_guard_survives_panic_unwind() {
        let pause = PauseControl::default();
        let p = pause.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = p.pause();
            panic!("manual refresh failed");
        });
        assert!(result.is_err());
        assert!(!pause.is_paused());
    }
}
