//! Graceful shutdown handling
//!
//! Broadcast-based shutdown signaling for accept loops and connection tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

struct Inner {
    sender: broadcast::Sender<()>,
    triggered: AtomicBool,
}

/// Shutdown signal broadcaster
///
/// Clone the signal for distribution and call [`subscribe`](Self::subscribe)
/// in each task that has to observe it. A listener created after the signal
/// fired still observes it.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                sender,
                triggered: AtomicBool::new(false),
            }),
        }
    }

    /// Trigger shutdown; repeated calls are no-ops
    pub fn shutdown(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
            let _ = self.inner.sender.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Create a listener for this signal
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.inner.sender.subscribe(),
            signal: self.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownSignal`]
pub struct ShutdownListener {
    receiver: broadcast::Receiver<()>,
    signal: ShutdownSignal,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered.
    ///
    /// Resolves immediately once the signal has fired, however many times it
    /// is awaited.
    pub async fn recv(&mut self) {
        if self.signal.is_triggered() {
            return;
        }
        // Lagged and Closed both mean the signal fired or can never fire
        let _ = self.receiver.recv().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        let handle = tokio::spawn(async move {
            listener.recv().await;
            42
        });

        signal.shutdown();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_late_listener_observes_signal() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        signal.shutdown();

        let mut listener = signal.clone().subscribe();
        listener.recv().await;
        listener.recv().await;
        assert!(listener.is_triggered());
    }
}
