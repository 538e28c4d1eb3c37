use std::sync::Arc;
use tokio::sync::watch;

/// A handle that can be used to stop a running simulation.
/// Clones are connected: shutting down through any of them stops every
/// [`Internet::run`](crate::Internet::run) waiting on one of them.
#[derive(Debug, Clone)]
pub struct Shutdown {
    notify: Arc<watch::Sender<Option<ExitStatus>>>,
    status: watch::Receiver<Option<ExitStatus>>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, status) = watch::channel(None);
        Self {
            notify: Arc::new(notify),
            status,
        }
    }

    /// Sends `ExitStatus::Exited` to all `Shutdowns` cloned from this one.
    pub fn shut_down(&self) {
        self.shut_down_with_status(ExitStatus::Exited);
    }

    /// Sends `status` to all `Shutdowns` cloned from this one. Only the first
    /// status sent is kept.
    pub fn shut_down_with_status(&self, status: ExitStatus) {
        if self.status.borrow().is_some() {
            return;
        }
        if let Err(e) = self.notify.send(Some(status)) {
            tracing::error!("Failed to initiate shutdown: {}", e);
        }
    }

    /// The status sent so far, if any.
    pub fn status(&self) -> Option<ExitStatus> {
        *self.status.borrow()
    }

    /// Waits to receive a shutdown status. A status sent before the call is
    /// returned immediately.
    pub async fn wait_for_shutdown(&mut self) -> ExitStatus {
        loop {
            if let Some(status) = *self.status.borrow_and_update() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return ExitStatus::Exited;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How a simulation ended.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
    Status(u32),
    Exited,
    TimedOut,
}
