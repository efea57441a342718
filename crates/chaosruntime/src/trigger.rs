//! Event sources that drive the manager.
//!
//! An [`OperableTrigger`] is a queue anyone can push events into, optionally
//! after a delay. A [`CompositeTrigger`] multiplexes several sources into one
//! stream; the order inside each source is preserved, the interleaving across
//! sources is not specified.

use async_trait::async_trait;
use chaoscore::{Event, TriggerError};
use futures::future::select_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A source of engine events
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Block until an event is available, the token is cancelled, or the source shuts down
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Event, TriggerError>;
}

struct Queue {
    sender: mpsc::UnboundedSender<Event>,
    receiver: Mutex<mpsc::UnboundedReceiver<Event>>,
    /// Events dequeued while the acquiring caller was being cancelled
    missed: Mutex<VecDeque<Event>>,
    shutdown: CancellationToken,
}

/// MPSC event queue with delayed delivery
#[derive(Clone)]
pub struct OperableTrigger {
    queue: Arc<Queue>,
}

impl OperableTrigger {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            queue: Arc::new(Queue {
                sender,
                receiver: Mutex::new(receiver),
                missed: Mutex::new(VecDeque::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Enqueue an event immediately
    pub fn notify(&self, event: Event) -> Result<(), TriggerError> {
        if self.queue.shutdown.is_cancelled() {
            return Err(TriggerError::Shutdown);
        }
        self.queue
            .sender
            .send(event)
            .map_err(|_| TriggerError::Shutdown)
    }

    /// Enqueue an event no earlier than `delay` from now
    ///
    /// Must be called from within a tokio runtime. Pending delayed events are
    /// discarded on shutdown.
    pub fn notify_delay(&self, event: Event, delay: Duration) -> Result<(), TriggerError> {
        if delay.is_zero() {
            return self.notify(event);
        }
        if self.queue.shutdown.is_cancelled() {
            return Err(TriggerError::Shutdown);
        }

        let sender = self.queue.sender.clone();
        let shutdown = self.queue.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(event = %event, "trigger shut down, dropping delayed event");
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = sender.send(event);
                }
            }
        });
        Ok(())
    }

    pub fn shutdown(&self) {
        self.queue.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.shutdown.is_cancelled()
    }
}

impl Default for OperableTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Trigger for OperableTrigger {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Event, TriggerError> {
        if let Some(event) = self.queue.missed.lock().await.pop_front() {
            return Ok(event);
        }
        if cancel.is_cancelled() {
            return Err(TriggerError::Canceled);
        }

        let mut receiver = tokio::select! {
            _ = cancel.cancelled() => return Err(TriggerError::Canceled),
            receiver = self.queue.receiver.lock() => receiver,
        };

        tokio::select! {
            biased;
            _ = self.queue.shutdown.cancelled() => Err(TriggerError::Shutdown),
            received = receiver.recv() => match received {
                Some(event) => {
                    if cancel.is_cancelled() {
                        // keep it for the next caller instead of losing it
                        self.queue.missed.lock().await.push_front(event);
                        return Err(TriggerError::Canceled);
                    }
                    Ok(event)
                }
                None => Err(TriggerError::Shutdown),
            },
            _ = cancel.cancelled() => Err(TriggerError::Canceled),
        }
    }
}

/// Fan-in of several triggers
pub struct CompositeTrigger {
    sources: Vec<Arc<dyn Trigger>>,
    closed: Vec<AtomicBool>,
}

impl CompositeTrigger {
    pub fn new(sources: Vec<Arc<dyn Trigger>>) -> Self {
        let closed = sources.iter().map(|_| AtomicBool::new(false)).collect();
        Self { sources, closed }
    }
}

#[async_trait]
impl Trigger for CompositeTrigger {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Event, TriggerError> {
        loop {
            let live: Vec<usize> = (0..self.sources.len())
                .filter(|i| !self.closed[*i].load(Ordering::Acquire))
                .collect();
            if live.is_empty() {
                return Err(TriggerError::Shutdown);
            }

            // every round gets its own token so losing sources stop waiting
            let round = cancel.child_token();
            let pending = live.into_iter().map(|index| {
                let source = self.sources[index].clone();
                let round = round.clone();
                Box::pin(async move { (index, source.acquire(&round).await) })
            });

            let ((index, result), _, rest) = select_all(pending).await;
            round.cancel();
            drop(rest);

            match result {
                Ok(event) => return Ok(event),
                Err(TriggerError::Shutdown) => {
                    debug!(source = index, "trigger source shut down");
                    self.closed[index].store(true, Ordering::Release);
                }
                Err(TriggerError::Canceled) => return Err(TriggerError::Canceled),
            }
        }
    }
}
