//! Trailing-edge debounce for push-triggered refreshes.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

/// Callback fired once per quiet window.
pub type RefreshHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Collapses bursts of triggers into one hook call fired after `window` of
/// silence. Every trigger restarts the window.
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
    worker: JoinHandle<()>,
}

impl Debouncer {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(window: Duration, hook: RefreshHook) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(window, hook, rx));
        Self { tx, worker }
    }

    pub fn trigger(&self) {
        // The worker only stops after cancel(); a closed channel is harmless.
        let _ = self.tx.send(());
    }

    /// Drop any pending fire and stop the worker.
    pub fn cancel(&self) {
        self.worker.abort();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(window: Duration, hook: RefreshHook, mut rx: mpsc::UnboundedReceiver<()>) {
    while rx.recv().await.is_some() {
        // Pending: wait for a full quiet window.
        loop {
            match time::timeout(window, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        hook().await;
    }
}
