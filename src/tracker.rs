//! Optimistic status moves awaiting backend confirmation.
//!
//! Every move owns two tasks: one awaiting the backend operation and one
//! timer (the expiry timer while unresolved, the grace timer once
//! confirmed). Both are keyed by a generation number so a superseded or
//! expired move can never be resurrected by a late result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BoardError, BoardResult};
use crate::notify::{Notification, NotificationSink};

/// How a recorded move ended, from the point of view of its caller.
#[derive(Debug)]
pub enum MoveOutcome {
    /// The backend accepted the change.
    Confirmed,
    /// The backend rejected the change; the caller must revert.
    Failed(BoardError),
    /// No answer within the timeout window; the caller must revert.
    TimedOut,
    /// A newer move for the same order replaced this one.
    Superseded,
}

impl MoveOutcome {
    pub fn needs_rollback(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::TimedOut)
    }
}

/// Handle returned by [`OptimisticMoveTracker::record_move`].
#[derive(Debug)]
pub struct MoveTicket {
    order_id: String,
    generation: u64,
    rx: oneshot::Receiver<MoveOutcome>,
}

impl MoveTicket {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the move to settle.
    pub async fn outcome(self) -> MoveOutcome {
        // A dropped sender means the tracker was cleared under us.
        self.rx.await.unwrap_or(MoveOutcome::Superseded)
    }
}

#[derive(Debug)]
struct PendingMove {
    generation: u64,
    original_status: String,
    target_status: String,
    confirmed: bool,
    timer: Option<JoinHandle<()>>,
    waiter: Option<oneshot::Sender<MoveOutcome>>,
}

impl PendingMove {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn settle(&mut self, outcome: MoveOutcome) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(outcome);
        }
    }
}

struct Inner {
    moves: Mutex<HashMap<String, PendingMove>>,
    next_generation: AtomicU64,
    timeout: Duration,
    grace: Duration,
    sink: Arc<dyn NotificationSink>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingMove>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.moves.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expire(&self, order_id: &str, generation: u64) {
        let mut moves = self.lock();
        let current = moves
            .get(order_id)
            .is_some_and(|m| m.generation == generation && !m.confirmed);
        if !current {
            return;
        }
        let removed = moves.remove(order_id);
        drop(moves);
        if let Some(mut expired) = removed {
            warn!(
                order_id = %order_id,
                from = %expired.original_status,
                to = %expired.target_status,
                timeout_ms = self.timeout.as_millis() as u64,
                "Optimistic move timed out, rolling back"
            );
            self.sink.notify(Notification::warning(
                "Update is taking too long",
                format!(
                    "Moving order {order_id} to {} did not finish in time and was reverted. Please try again.",
                    expired.target_status
                ),
            ));
            expired.settle(MoveOutcome::TimedOut);
        }
    }

    fn resolve(self: &Arc<Self>, order_id: &str, generation: u64, result: BoardResult<()>) {
        let mut moves = self.lock();
        let Some(entry) = moves
            .get_mut(order_id)
            .filter(|m| m.generation == generation && !m.confirmed)
        else {
            debug!(
                order_id = %order_id,
                generation,
                ok = result.is_ok(),
                "Ignoring result for a move that is no longer pending"
            );
            return;
        };

        match result {
            Ok(()) => {
                entry.cancel_timer();
                entry.confirmed = true;
                entry.settle(MoveOutcome::Confirmed);
                info!(
                    order_id = %order_id,
                    to = %entry.target_status,
                    "Optimistic move confirmed"
                );
                let inner = Arc::clone(self);
                let id = order_id.to_string();
                let grace = self.grace;
                entry.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    inner.clear_confirmed(&id, generation);
                }));
            }
            Err(error) => {
                let removed = moves.remove(order_id);
                drop(moves);
                if let Some(mut failed) = removed {
                    failed.cancel_timer();
                    warn!(
                        order_id = %order_id,
                        from = %failed.original_status,
                        to = %failed.target_status,
                        error = %error,
                        "Optimistic move rejected, rolling back"
                    );
                    self.sink.notify(Notification::destructive(
                        "Failed to update order status",
                        format!(
                            "Order {order_id} could not be moved to {}. Please try again.",
                            failed.target_status
                        ),
                    ));
                    failed.settle(MoveOutcome::Failed(error));
                }
            }
        }
    }

    fn clear_confirmed(&self, order_id: &str, generation: u64) {
        let mut moves = self.lock();
        if moves
            .get(order_id)
            .is_some_and(|m| m.generation == generation && m.confirmed)
        {
            moves.remove(order_id);
            debug!(order_id = %order_id, "Optimistic overlay cleared");
        }
    }
}

/// Tracks in-flight status changes and overlays them on authoritative data.
///
/// Cloning is cheap; clones share state. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct OptimisticMoveTracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OptimisticMoveTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticMoveTracker")
            .field("pending", &self.inner.lock().len())
            .field("timeout", &self.inner.timeout)
            .field("grace", &self.inner.grace)
            .finish()
    }
}

impl OptimisticMoveTracker {
    pub fn new(timeout: Duration, grace: Duration, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                moves: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                timeout,
                grace,
                sink,
            }),
        }
    }

    /// Register a move and start watching `operation`.
    ///
    /// Any earlier move for `order_id` is superseded: its timer is cancelled
    /// and its ticket resolves to [`MoveOutcome::Superseded`].
    pub fn record_move<F>(&self, order_id: &str, from: &str, to: &str, operation: F) -> MoveTicket
    where
        F: Future<Output = BoardResult<()>> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut moves = self.inner.lock();
            if let Some(mut previous) = moves.remove(order_id) {
                previous.cancel_timer();
                previous.settle(MoveOutcome::Superseded);
                debug!(
                    order_id = %order_id,
                    previous_generation = previous.generation,
                    generation,
                    "Superseding pending move"
                );
            }

            let inner = Arc::clone(&self.inner);
            let id = order_id.to_string();
            let timeout = self.inner.timeout;
            let expiry = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.expire(&id, generation);
            });

            moves.insert(
                order_id.to_string(),
                PendingMove {
                    generation,
                    original_status: from.to_string(),
                    target_status: to.to_string(),
                    confirmed: false,
                    timer: Some(expiry),
                    waiter: Some(tx),
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let id = order_id.to_string();
        tokio::spawn(async move {
            let result = operation.await;
            inner.resolve(&id, generation, result);
        });

        debug!(order_id = %order_id, from = %from, to = %to, generation, "Move recorded");
        MoveTicket {
            order_id: order_id.to_string(),
            generation,
            rx,
        }
    }

    /// The pending target status if a move is tracked, else `authoritative`.
    pub fn effective_status(&self, order_id: &str, authoritative: &str) -> String {
        self.inner
            .lock()
            .get(order_id)
            .map(|m| m.target_status.clone())
            .unwrap_or_else(|| authoritative.to_string())
    }

    /// Whether a move for `order_id` is still awaiting the backend.
    pub fn is_pending(&self, order_id: &str) -> bool {
        self.inner
            .lock()
            .get(order_id)
            .is_some_and(|m| !m.confirmed)
    }

    /// Number of tracked moves, including confirmed ones still in grace.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer and forget every move. Waiters see `Superseded`.
    pub fn clear(&self) {
        let drained: Vec<PendingMove> = self.inner.lock().drain().map(|(_, m)| m).collect();
        for mut pending in drained {
            pending.cancel_timer();
        }
    }
}
