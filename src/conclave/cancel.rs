//! A cheap, clonable cancellation signal threaded through every entry
//! point: the agent loop checks it at the top of every iteration, and each
//! conductor checks it before starting any new agent step.

use tokio::sync::watch;

/// Handle used to trigger cancellation. Cloning shares the same underlying
/// signal.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Handle used to trigger the associated [`CancelToken`]s. Kept separate so
/// only the run's owner can cancel it.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked `(CancelHandle, CancelToken)` pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A token that never cancels, for callers who don't need cooperative
    /// cancellation.
    pub fn never() -> Self {
        let (_handle, token) = cancel_pair();
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_clones() {
        let (handle, token) = cancel_pair();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
        assert!(token.is_cancelled());
    }
}
