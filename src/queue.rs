//! Attention queues - one participant's ordered backlog, processed one item at a time
//!
//! A queue hands its items to an [`ItemHandler`] strictly in insertion order
//! and never has more than one item in flight. Each handler call runs on its
//! own spawned task, so many queues make progress concurrently while each
//! individual queue stays sequential. Lifecycle changes are reported to the
//! owner as [`QueueEvent`]s over an unbounded channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SessionError;

/// Processes one queue item
#[async_trait]
pub trait ItemHandler<T, R>: Send + Sync {
    /// Handle `item`; `remaining` is the number of items still waiting behind it
    async fn handle(&self, item: T, remaining: usize) -> Result<R, SessionError>;
}

/// Lifecycle notifications emitted by a queue
#[derive(Debug)]
pub enum QueueEvent<K, R> {
    /// The handler finished an item
    Result { owner: K, result: R },
    /// Backlog is empty and nothing is in flight
    Exhausted { owner: K },
    /// The in-flight item was interrupted by the broadcast cancellation
    Aborted { owner: K },
    /// The handler failed; the queue has stopped
    Failed { owner: K, error: SessionError },
}

impl<K, R> QueueEvent<K, R> {
    pub fn owner(&self) -> &K {
        match self {
            QueueEvent::Result { owner, .. }
            | QueueEvent::Exhausted { owner }
            | QueueEvent::Aborted { owner }
            | QueueEvent::Failed { owner, .. } => owner,
        }
    }
}

/// Point-in-time copy of a queue's contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot<T> {
    pub backlog: Vec<T>,
    pub in_flight: Option<T>,
    pub completed: Vec<T>,
    pub running: bool,
}

impl<T: Clone> QueueSnapshot<T> {
    /// Every item the queue has ever been given: completed, in flight, then backlog
    pub fn all_items(&self) -> Vec<T> {
        self.completed
            .iter()
            .chain(self.in_flight.iter())
            .chain(self.backlog.iter())
            .cloned()
            .collect()
    }
}

impl<T> QueueSnapshot<T> {
    /// Same snapshot with every item converted by `f`
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> QueueSnapshot<U> {
        QueueSnapshot {
            backlog: self.backlog.into_iter().map(&mut f).collect(),
            in_flight: self.in_flight.map(&mut f),
            completed: self.completed.into_iter().map(&mut f).collect(),
            running: self.running,
        }
    }
}

struct QueueState<T> {
    backlog: VecDeque<T>,
    in_flight: Option<T>,
    completed: Vec<T>,
    running: bool,
    /// Bumped on every pause so late handler results can be recognized
    epoch: u64,
    driver: Option<JoinHandle<()>>,
}

struct QueueInner<K, T, R> {
    owner: K,
    state: Mutex<QueueState<T>>,
    handler: Arc<dyn ItemHandler<T, R>>,
    events: mpsc::UnboundedSender<QueueEvent<K, R>>,
}

/// A sequential work queue owned by one participant.
///
/// `add` and `start_or_resume` may spawn tasks and must be called from within
/// a tokio runtime.
pub struct AttentionQueue<K, T, R> {
    inner: Arc<QueueInner<K, T, R>>,
}

impl<K, T, R> Clone for AttentionQueue<K, T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T, R> AttentionQueue<K, T, R>
where
    K: Clone + fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        owner: K,
        handler: Arc<dyn ItemHandler<T, R>>,
        events: mpsc::UnboundedSender<QueueEvent<K, R>>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                owner,
                state: Mutex::new(QueueState {
                    backlog: VecDeque::new(),
                    in_flight: None,
                    completed: Vec::new(),
                    running: false,
                    epoch: 0,
                    driver: None,
                }),
                handler,
                events,
            }),
        }
    }

    pub fn owner(&self) -> &K {
        &self.inner.owner
    }

    /// Append to the tail. Starts processing right away if the queue is running and idle.
    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        state.backlog.push_back(item);
        if state.running && state.in_flight.is_none() {
            self.inner.advance(&mut state);
        }
    }

    pub fn add_all(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.add(item);
        }
    }

    /// Mark running and, if nothing is in flight, process the head of the backlog
    pub fn start_or_resume(&self) {
        let mut state = self.inner.state.lock();
        state.running = true;
        if state.in_flight.is_none() {
            self.inner.advance(&mut state);
        }
    }

    /// Mark stopped. An in-flight item goes back to the head of the backlog.
    pub fn stop_or_pause(&self) {
        let mut state = self.inner.state.lock();
        state.running = false;
        state.epoch += 1;
        if let Some(item) = state.in_flight.take() {
            state.backlog.push_front(item);
        }
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Running with nothing left to do
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.running && state.in_flight.is_none() && state.backlog.is_empty()
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot<T> {
        let state = self.inner.state.lock();
        QueueSnapshot {
            backlog: state.backlog.iter().cloned().collect(),
            in_flight: state.in_flight.clone(),
            completed: state.completed.clone(),
            running: state.running,
        }
    }
}

impl<K, T, R> QueueInner<K, T, R>
where
    K: Clone + fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Move the backlog head in flight and hand it to the handler, or report exhaustion.
    /// Caller holds the state lock and has checked that nothing is in flight.
    fn advance(self: &Arc<Self>, state: &mut QueueState<T>) {
        let Some(item) = state.backlog.pop_front() else {
            state.driver = None;
            debug!(owner = %self.owner, "Queue exhausted");
            self.emit(QueueEvent::Exhausted {
                owner: self.owner.clone(),
            });
            return;
        };

        let remaining = state.backlog.len();
        let epoch = state.epoch;
        state.in_flight = Some(item.clone());

        let inner = Arc::clone(self);
        state.driver = Some(tokio::spawn(async move {
            let outcome = inner.handler.handle(item, remaining).await;
            inner.complete(epoch, outcome);
        }));
    }

    fn complete(self: &Arc<Self>, epoch: u64, outcome: Result<R, SessionError>) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(owner = %self.owner, "Discarding result of paused item");
            return;
        }
        let Some(item) = state.in_flight.take() else {
            return;
        };

        match outcome {
            Ok(result) => {
                state.completed.push(item);
                self.emit(QueueEvent::Result {
                    owner: self.owner.clone(),
                    result,
                });
                self.advance(&mut state);
            }
            Err(error) => {
                state.backlog.push_front(item);
                state.running = false;
                state.driver = None;
                if error.is_cancellation() {
                    debug!(owner = %self.owner, "Queue aborted");
                    self.emit(QueueEvent::Aborted {
                        owner: self.owner.clone(),
                    });
                } else {
                    warn!(owner = %self.owner, error = %error, "Queue handler failed");
                    self.emit(QueueEvent::Failed {
                        owner: self.owner.clone(),
                        error,
                    });
                }
            }
        }
    }

    fn emit(&self, event: QueueEvent<K, R>) {
        if self.events.send(event).is_err() {
            debug!(owner = %self.owner, "Queue event dropped, listener detached");
        }
    }
}
