//! Cooperative cancellation shared by every long-running task
//!
//! A `watch` channel carries a single `bool`. Tasks stop once it reads
//! `true` or once the sender is dropped.

use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

/// New shutdown signal, initially not triggered
pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested
///
/// Cancel-safe, so it can sit in a `select!` loop.
pub async fn requested(rx: &mut ShutdownReceiver) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Non-blocking check
pub fn is_requested(rx: &ShutdownReceiver) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}
