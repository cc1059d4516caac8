//! Cooperative cancellation shared between tasks.
//!
//! A [`CancelToken`] is a cheap, cloneable handle backed by a
//! `tokio::sync::watch` channel. Cancelling any clone cancels all of them.
//! Child tokens are cancelled with their parent but can also be cancelled on
//! their own without affecting the parent.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    parent: Option<Box<CancelToken>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            parent: None,
        }
    }

    /// Create a token that is cancelled when `self` is, or on its own.
    pub fn child(&self) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested on this token or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let own = async {
            let mut rx = self.tx.subscribe();
            // The sender lives as long as `self`, so `changed` only fails
            // if the token is being torn down; treat that as never.
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match &self.parent {
            Some(parent) => {
                let parent = Box::pin(parent.cancelled());
                tokio::select! {
                    _ = own => {}
                    _ = parent => {}
                }
            }
            None => own.await,
        }
    }
}
