//! Single-assignment signals that many observers can await.

use tokio::sync::watch;

/// A value that transitions exactly once from unset to set.
///
/// Observers call [`OnceSignal::wait`]; once the signal is set every current
/// and future waiter receives a clone of the same value. A second `set` is
/// ignored and reported by returning `false`.
#[derive(Debug)]
pub struct OnceSignal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Default for OnceSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> OnceSignal<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Set the value. Returns `false` if it had already been set.
    pub fn set(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The value if already set.
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait until the value is set.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // `self` owns the sender, so the channel cannot close while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
