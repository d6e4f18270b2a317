//! Handler task tracking
//!
//! Every handler and background task of an engine is spawned through
//! [`HandlerTasks`], so shutdown can stop background loops and wait for
//! running handlers (and their submissions) to finish.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Inner {
    running: AtomicUsize,
    idle: Notify,
    closing: watch::Sender<bool>,
}

/// Counts running tasks and carries the engine's shutdown signal.
#[derive(Debug, Clone)]
pub struct HandlerTasks {
    inner: Arc<Inner>,
}

impl Default for HandlerTasks {
    fn default() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                running: AtomicUsize::new(0),
                idle: Notify::new(),
                closing,
            }),
        }
    }
}

struct Running(Arc<Inner>);

impl Drop for Running {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl HandlerTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task`, counted until it completes or is aborted.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.running.fetch_add(1, Ordering::SeqCst);
        let running = Running(self.inner.clone());
        tokio::spawn(async move {
            let _running = running;
            task.await;
        })
    }

    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Signals background loops to stop after their current iteration.
    pub fn close(&self) {
        self.inner.closing.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closing.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut closing = self.inner.closing.subscribe();
        while !*closing.borrow_and_update() {
            if closing.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until no task is running.
    ///
    /// # Returns
    ///
    /// * `true` - Every task finished within `timeout`
    /// * `false` - Tasks were still running at the deadline
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.running() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}
