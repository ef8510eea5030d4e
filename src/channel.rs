//! Reply correlation between the chat transport and running interviews
//!
//! The transport publishes every inbound direct message tagged with its
//! sender. An interview that has just asked a question waits for the sender's
//! next message. Messages that arrive while nobody is waiting are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SessionError;
use crate::types::ParticipantId;

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<String>,
}

/// Single-shot reply waits keyed by participant, plus named broadcast signals
#[derive(Default)]
pub struct ResponseChannel {
    waiters: Mutex<HashMap<ParticipantId, Waiter>>,
    signals: Mutex<HashMap<String, CancellationToken>>,
    next_ticket: AtomicU64,
}

impl ResponseChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next message published for `id`.
    ///
    /// Fails with [`SessionError::WaitPending`] if another wait for the same
    /// participant is outstanding, and with [`SessionError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn wait_for_next(
        &self,
        id: &ParticipantId,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        let (ticket, rx) = self.register(id)?;
        let _guard = WaitGuard {
            channel: self,
            id,
            ticket,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            message = rx => message.map_err(|_| SessionError::ChannelClosed),
        }
    }

    /// [`wait_for_next`](Self::wait_for_next) with an optional deadline
    pub async fn wait_for_next_timeout(
        &self,
        id: &ParticipantId,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<String, SessionError> {
        match timeout {
            None => self.wait_for_next(id, cancel).await,
            Some(limit) => tokio::time::timeout(limit, self.wait_for_next(id, cancel))
                .await
                .map_err(|_| SessionError::ReplyTimeout(id.clone()))?,
        }
    }

    /// Deliver a message to whoever is waiting on `id`. Returns whether it was delivered.
    pub fn publish(&self, id: &ParticipantId, message: impl Into<String>) -> bool {
        let waiter = self.waiters.lock().remove(id);
        match waiter {
            Some(waiter) => waiter.tx.send(message.into()).is_ok(),
            None => {
                debug!(participant = %id, "Dropping message with no waiter");
                false
            }
        }
    }

    /// Whether a reply wait is outstanding for `id`
    pub fn is_waiting(&self, id: &ParticipantId) -> bool {
        self.waiters
            .lock()
            .get(id)
            .map(|w| !w.tx.is_closed())
            .unwrap_or(false)
    }

    /// Token for the named broadcast signal, created on first use
    pub fn signal(&self, name: &str) -> CancellationToken {
        self.signals
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Resolves once `raise(name)` has been called. Signals stay raised.
    pub async fn wait_for_signal(&self, name: &str) {
        let token = self.signal(name);
        token.cancelled().await;
    }

    /// Raise the named signal, waking every current and future waiter
    pub fn raise(&self, name: &str) {
        debug!(signal = name, "Raising signal");
        self.signal(name).cancel();
    }

    /// Drop the named signal's registration
    pub fn forget_signal(&self, name: &str) {
        self.signals.lock().remove(name);
    }

    fn register(
        &self,
        id: &ParticipantId,
    ) -> Result<(u64, oneshot::Receiver<String>), SessionError> {
        let mut waiters = self.waiters.lock();
        if let Some(existing) = waiters.get(id) {
            if !existing.tx.is_closed() {
                return Err(SessionError::WaitPending(id.clone()));
            }
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        waiters.insert(id.clone(), Waiter { ticket, tx });
        Ok((ticket, rx))
    }
}

/// Removes a wait's registration when the wait ends without a delivery
struct WaitGuard<'a> {
    channel: &'a ResponseChannel,
    id: &'a ParticipantId,
    ticket: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut waiters = self.channel.waiters.lock();
        if waiters.get(self.id).map(|w| w.ticket) == Some(self.ticket) {
            waiters.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn wait_until_waiting(channel: &ResponseChannel, id: &ParticipantId) {
        while !channel.is_waiting(id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_publish_resolves_wait() {
        let channel = Arc::new(ResponseChannel::new());
        let id = ParticipantId::from("1");
        let cancel = CancellationToken::new();

        let waiter = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            tokio::spawn(async move { channel.wait_for_next(&id, &cancel).await })
        };

        wait_until_waiting(&channel, &id).await;
        assert!(channel.publish(&id, "5"));
        assert_eq!(waiter.await.unwrap().unwrap(), "5");
        assert!(!channel.is_waiting(&id));
    }

    #[test]
    fn test_publish_without_waiter_is_lost() {
        let channel = ResponseChannel::new();
        assert!(!channel.publish(&ParticipantId::from("1"), "hello"));
    }

    #[tokio::test]
    async fn test_second_wait_is_rejected() {
        let channel = Arc::new(ResponseChannel::new());
        let id = ParticipantId::from("1");
        let cancel = CancellationToken::new();

        let first = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.wait_for_next(&id, &cancel).await })
        };
        wait_until_waiting(&channel, &id).await;

        let second = channel.wait_for_next(&id, &cancel).await;
        assert!(matches!(second, Err(SessionError::WaitPending(_))));

        channel.publish(&id, "ok");
        assert_eq!(first.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_cancel_wakes_wait_and_clears_waiter() {
        let channel = Arc::new(ResponseChannel::new());
        let id = ParticipantId::from("1");
        let cancel = CancellationToken::new();

        let waiter = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.wait_for_next(&id, &cancel).await })
        };
        wait_until_waiting(&channel, &id).await;

        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(result.unwrap_err().is_cancellation());
        assert!(!channel.is_waiting(&id));
    }

    #[tokio::test]
    async fn test_aborted_wait_releases_participant() {
        let channel = Arc::new(ResponseChannel::new());
        let id = ParticipantId::from("1");

        let waiter = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            tokio::spawn(async move {
                channel.wait_for_next(&id, &CancellationToken::new()).await
            })
        };
        wait_until_waiting(&channel, &id).await;
        waiter.abort();
        let _ = waiter.await;

        assert!(!channel.is_waiting(&id));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let channel = ResponseChannel::new();
        let id = ParticipantId::from("1");
        let result = channel
            .wait_for_next_timeout(&id, &CancellationToken::new(), Some(Duration::from_millis(10)))
            .await;
        assert!(matches!(result, Err(SessionError::ReplyTimeout(_))));
    }

    #[tokio::test]
    async fn test_signals_are_broadcast_and_sticky() {
        let channel = Arc::new(ResponseChannel::new());
        let token = channel.signal("end");

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { channel.wait_for_signal("end").await })
            })
            .collect();

        channel.raise("end");
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert!(token.is_cancelled());

        // Raised signals resolve late waiters immediately
        channel.wait_for_signal("end").await;

        channel.forget_signal("end");
        assert!(!channel.signal("end").is_cancelled());
    }
}
