//! Serialized delivery context.
//!
//! Every completion callback is sent here and executed on one dedicated task
//! in send order. Callers of the cache therefore never see a callback run
//! inline, and callbacks for the same load run in registration order.

use std::panic::{self, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the delivery task. Cloning shares the same task.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the delivery task on the given runtime.
    ///
    /// The task exits once every `Dispatcher` clone has been dropped and the
    /// queue is drained.
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Delivery callback panicked");
                }
            }
            debug!("Delivery task stopped");
        });

        Self { tx }
    }

    /// Queue a callback for execution on the delivery task.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("Delivery task is gone; dropping callback");
        }
    }

    /// Wait until every callback scheduled before this call has run.
    pub async fn settled(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.schedule(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
    }
}
