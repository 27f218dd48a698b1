use std::sync::Arc;

use tokio::sync::watch;

/// One-shot broadcast latch carrying an optional error.
///
/// Any number of tasks can clone an `UnblockSignal` and await [`UnblockSignal::wait`]
/// independently; the first call to [`UnblockSignal::trigger`] or
/// [`UnblockSignal::trigger_with_error`] wins and every waiter unblocks with the same
/// result. Later calls are no-ops. This exists so that unrelated concurrent tasks
/// (the command pump, a RelayPeer's own loop, the RPC server) can all watch for
/// shutdown without holding a back-reference to each other.
#[derive(Clone)]
pub struct UnblockSignal {
    tx: Arc<watch::Sender<Triggered>>,
    rx: watch::Receiver<Triggered>,
}

#[derive(Clone, Default)]
enum Triggered {
    #[default]
    No,
    Yes(Option<Arc<anyhow::Error>>),
}

impl UnblockSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(Triggered::No);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Idempotent: the first call wins, later calls no-op.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|state| match state {
            Triggered::No => {
                *state = Triggered::Yes(None);
                true
            }
            Triggered::Yes(_) => false,
        });
    }

    /// Idempotent: the first call wins, later calls no-op.
    pub fn trigger_with_error(&self, err: anyhow::Error) {
        self.tx.send_if_modified(|state| match state {
            Triggered::No => {
                *state = Triggered::Yes(Some(Arc::new(err)));
                true
            }
            Triggered::Yes(_) => false,
        });
    }

    /// Blocks until triggered; returns the error (if any) passed to the triggering call.
    pub async fn wait(&self) -> Option<Arc<anyhow::Error>> {
        let mut rx = self.rx.clone();
        loop {
            if let Triggered::Yes(err) = &*rx.borrow() {
                return err.clone();
            }
            if rx.changed().await.is_err() {
                // sender dropped without triggering; treat as triggered with no error
                return None;
            }
        }
    }

    /// A cloned handle that can be `select!`ed alongside other concurrent sources,
    /// e.g. `signal.get_signal().await` inside a `tokio::select!` arm.
    pub fn get_signal(&self) -> Self {
        self.clone()
    }

    pub fn has_triggered(&self) -> bool {
        !matches!(*self.rx.borrow(), Triggered::No)
    }
}

impl Default for UnblockSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_unblocks_waiters() {
        let sig = UnblockSignal::new();
        let waiter = sig.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        assert!(!sig.has_triggered());
        sig.trigger();
        assert!(handle.await.unwrap().is_none());
        assert!(sig.has_triggered());
    }

    #[tokio::test]
    async fn first_trigger_wins() {
        let sig = UnblockSignal::new();
        sig.trigger_with_error(anyhow::anyhow!("boom"));
        sig.trigger_with_error(anyhow::anyhow!("ignored"));
        let err = sig.wait().await.expect("error preserved");
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn many_independent_clones_all_unblock() {
        let sig = UnblockSignal::new();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let s = sig.clone();
                tokio::spawn(async move { s.wait().await })
            })
            .collect();
        sig.trigger();
        for w in waiters {
            assert!(w.await.unwrap().is_none());
        }
    }
}
