//! Trigger adapter: turns "environment changed" signals into attempts.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::channel::ChannelConnector;
use crate::engine::BootstrapEngine;

/// Owns a subscription to environment-change signals and starts an attempt
/// for each one.
///
/// Signals that arrive while an attempt is in flight are dropped by the
/// engine. Dropping the adapter, or calling [`shutdown`](Self::shutdown),
/// unsubscribes.
#[derive(Debug)]
pub struct TriggerAdapter {
    task: JoinHandle<()>,
}

impl TriggerAdapter {
    pub fn subscribe<C: ChannelConnector>(
        engine: BootstrapEngine<C>,
        mut signals: broadcast::Receiver<()>,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(()) => {}
                    // The next recv yields the newest retained signal, which
                    // stands in for the missed ones.
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Collapsed lagged environment change signals");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Environment change source closed");
                        break;
                    }
                }
                tracing::debug!("Environment changed");
                let _ = engine.trigger();
            }
        });
        Self { task }
    }

    /// Whether the subscription is still live.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Unsubscribe and wait for the subscription task to stop.
    ///
    /// An attempt already started keeps running on its own task.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TriggerAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}
