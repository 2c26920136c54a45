//! Cooperative cancellation built on a `watch` channel.
//!
//! The same `watch::Sender<bool>` that drives process shutdown can be handed
//! to the bus; every in-flight transport call and retry delay races against it.

use crate::error::BusError;
use std::future::Future;
use tokio::sync::watch;

/// Cancellation signal passed to every bus operation
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Create a linked sender and signal. Send `true` to cancel.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Never resolves for
    /// [`Cancellation::none`] or when the sender is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Run `fut` unless cancellation fires first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, BusError>
    where
        F: Future<Output = Result<T, BusError>>,
    {
        if self.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(BusError::Cancelled),
            result = fut => result,
        }
    }

    /// Sleep for `delay`, returning `Err(Cancelled)` if interrupted.
    pub async fn sleep(&self, delay: std::time::Duration) -> Result<(), BusError> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

impl From<watch::Receiver<bool>> for Cancellation {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_none_never_cancels() {
        let cancel = Cancellation::none();
        assert!(!cancel.is_cancelled());
        let result = cancel.run(async { Ok::<_, BusError>(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let (tx, cancel) = Cancellation::channel();
        let handle = tokio::spawn(async move { cancel.sleep(Duration::from_secs(60)).await });

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BusError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let (tx, cancel) = Cancellation::channel();
        tx.send(true).unwrap();
        assert!(cancel.is_cancelled());

        let result = cancel.run(async { Ok::<_, BusError>(()) }).await;
        assert!(matches!(result, Err(BusError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, cancel) = Cancellation::channel();
        drop(tx);
        let result = cancel.sleep(Duration::from_millis(5)).await;
        assert!(result.is_ok());
    }
}
