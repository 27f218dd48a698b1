use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

/// Bounded multi-subscriber fan-out channel.
///
/// `push` delivers a clone of the item to every live subscriber and backpressures:
/// it will not return until every subscriber's bounded buffer has accepted the item
/// (or the subscriber has gone away). This is the right default for the kernel's
/// internal command/event buses, where losing an event silently would violate the
/// ordering invariants in §5 of the design doc. Callers that sit at the very edge of
/// the system (the RPC server forwarding events to a possibly-slow gRPC client)
/// should bridge through their own bounded, drop-on-full channel instead of relying
/// on `EventSub` to drop for them.
pub struct EventSub<T> {
    subscribers: RwLock<Vec<Subscriber<T>>>,
    capacity: usize,
    next_id: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

/// A live subscription. Dropping this without calling [`EventSub::unsubscribe`] still
/// closes the receiver end, but leaves a dead entry in the subscriber vector until the
/// next `push` notices the send failed and the caller explicitly unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Unwraps into the raw receiver, e.g. to adapt into a `tokio_stream::ReceiverStream`
    /// for a gRPC server-streaming response.
    pub fn into_inner(self) -> mpsc::Receiver<T> {
        self.rx
    }
}

impl<T: Clone + Send + 'static> EventSub<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity,
            next_id: AtomicU64::new(1),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        self.subscribers.write().await.push(Subscriber { id, tx });
        Subscription { id, rx }
    }

    /// O(1) removal using swap-pop; the corresponding receiver is closed.
    pub async fn unsubscribe(&self, id: u64) {
        let mut subs = self.subscribers.write().await;
        if let Some(pos) = subs.iter().position(|s| s.id == id) {
            subs.swap_remove(pos);
        }
    }

    /// Delivers `item` to every live subscriber, blocking until each has accepted it.
    /// No-op once [`EventSub::close`] has been called.
    pub async fn push(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let subs = self.subscribers.read().await;
        for sub in subs.iter() {
            // a closed receiver means the subscriber dropped its handle without
            // calling unsubscribe; the send fails silently and the stale entry is
            // reaped the next time someone calls unsubscribe or subscribes fresh.
            let _ = sub.tx.send(item.clone()).await;
        }
    }

    /// Closes all receivers and refuses further pushes.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let bus: EventSub<u32> = EventSub::new(4);
        let mut a = bus.subscribe().await;
        let mut b = bus.subscribe().await;
        bus.push(7).await;
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus: EventSub<u32> = EventSub::new(4);
        let a = bus.subscribe().await;
        let id = a.id();
        drop(a);
        bus.unsubscribe(id).await;
        assert_eq!(bus.subscribers.read().await.len(), 0);
    }

    #[tokio::test]
    async fn close_prevents_further_push_and_closes_receivers() {
        let bus: EventSub<u32> = EventSub::new(4);
        let mut sub = bus.subscribe().await;
        bus.close().await;
        bus.push(1).await;
        assert_eq!(sub.recv().await, None);
    }
}
