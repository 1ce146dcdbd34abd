//! Registration notifier (C6): pub/sub rendezvous between push-wake and
//! the REGISTER that follows it. A waiter subscribed *after* Notify fires
//! never observes the past event — callers needing that guarantee must
//! do a post-subscribe lookup of current state (§5 ordering guarantees).

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

pub struct SubscriptionHandle {
    extension_id: u64,
    id: u64,
    receiver: Option<oneshot::Receiver<()>>,
    notifier: std::sync::Arc<RegistrationNotifier>,
}

impl SubscriptionHandle {
    pub async fn wait(&mut self, wait_timeout: Duration) -> bool {
        let Some(receiver) = self.receiver.take() else { return false };
        matches!(timeout(wait_timeout, receiver).await, Ok(Ok(())))
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.notifier.cancel(self.extension_id, self.id);
    }
}

pub struct RegistrationNotifier {
    waiters: Mutex<HashMap<u64, Vec<(u64, oneshot::Sender<()>)>>>,
    next_id: Mutex<u64>,
}

impl RegistrationNotifier {
    pub fn new() -> Self {
        Self { waiters: Mutex::new(HashMap::new()), next_id: Mutex::new(0) }
    }

    pub fn subscribe(self: &std::sync::Arc<Self>, extension_id: u64) -> SubscriptionHandle {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            *next_id
        };
        self.waiters.lock().entry(extension_id).or_default().push((id, tx));
        SubscriptionHandle { extension_id, id, receiver: Some(rx), notifier: self.clone() }
    }

    fn cancel(&self, extension_id: u64, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(&extension_id) {
            list.retain(|(waiter_id, _)| *waiter_id != id);
            if list.is_empty() {
                waiters.remove(&extension_id);
            }
        }
    }

    /// Atomically removes and signals every handle currently subscribed
    /// under `extension_id`.
    pub fn notify(&self, extension_id: u64) {
        let waiting = self.waiters.lock().remove(&extension_id);
        if let Some(waiting) = waiting {
            for (_, tx) in waiting {
                let _ = tx.send(());
            }
        }
    }

    /// Subscribes, blocks until signaled or timeout, and always cancels
    /// the subscription on exit.
    pub async fn wait_for_registration(
        self: &std::sync::Arc<Self>,
        extension_id: u64,
        wait_timeout: Duration,
    ) -> bool {
        let mut handle = self.subscribe(extension_id);
        handle.wait(wait_timeout).await
    }
}

impl Default for RegistrationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_subscribers_currently_waiting() {
        let notifier = std::sync::Arc::new(RegistrationNotifier::new());
        let n2 = notifier.clone();
        let waiter = tokio::spawn(async move { n2.wait_for_registration(42, Duration::from_secs(1)).await });
        tokio::task::yield_now().await;
        notifier.notify(42);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out_without_notify() {
        let notifier = std::sync::Arc::new(RegistrationNotifier::new());
        let woke = notifier.wait_for_registration(7, Duration::from_millis(20)).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_past_notify() {
        let notifier = std::sync::Arc::new(RegistrationNotifier::new());
        notifier.notify(99);
        let woke = notifier.wait_for_registration(99, Duration::from_millis(20)).await;
        assert!(!woke);
    }
}
