//! Drives reconciles: one task per watched resource, strictly serial per
//! key, requeued after the interval the reconciler asks for and backed off
//! exponentially on errors. A watch channel propagates shutdown and cancels
//! in-flight reconciles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::ResourceKey;
use crate::reconciler::Reconciler;

pub const INITIAL_ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(300);

/// Creates the shutdown signal shared by the controller and any servers.
/// Send `true` to stop everything.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, shutdown: watch::Receiver<bool>) -> Self {
        Controller {
            reconciler,
            shutdown,
        }
    }

    /// Starts watching one resource. The returned handle completes when the
    /// resource is gone or shutdown is signalled.
    pub fn watch(&self, key: ResourceKey) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut backoff = INITIAL_ERROR_BACKOFF;
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let delay = tokio::select! {
                    result = reconciler.reconcile(&key) => match result {
                        Ok(action) => match action.requeue_after {
                            Some(interval) => {
                                backoff = INITIAL_ERROR_BACKOFF;
                                interval
                            }
                            None => {
                                info!(resource = %key, "stopping watch");
                                break;
                            }
                        },
                        Err(err) => {
                            error!(resource = %key, error = %err, "reconcile failed");
                            let delay = backoff;
                            backoff = (backoff * 2).min(MAX_ERROR_BACKOFF);
                            delay
                        }
                    },
                    _ = shutdown.changed() => break,
                };

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
