//! # Request Scheduler
//!
//! Per-actor, concurrency-bounded FIFO admission for outbound work.
//!
//! ## Overview
//!
//! Each actor gets at most `max_concurrent_per_actor` tasks in flight. Further
//! submissions wait in an ordered per-actor queue and start as slots free up.
//! Actors never wait on each other.
//!
//! The scheduler does not spawn: a task runs inside the caller's own future
//! once a slot is granted, so its output (including its own error type) is
//! returned to that caller unchanged. Nothing is retried and no timeout is
//! imposed.
//!
//! ## Cancellation
//!
//! Dropping an `enqueue` future is always safe. A caller dropped while queued
//! is removed from the queue; a caller dropped while running (or in the gap
//! between being granted a slot and observing it) releases its slot to the
//! next waiter.
//!
//! ## Usage
//!
//! ```ignore
//! use core_gateway::{Actor, RequestScheduler};
//!
//! let scheduler = RequestScheduler::new(&config.scheduler);
//! let releases = scheduler
//!     .enqueue(&Actor::user(user_id), || metadata.search_releases(query))
//!     .await?;
//! ```

use core_runtime::config::SchedulerConfig;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace};

use crate::context::Actor;

type Queues = Arc<Mutex<HashMap<Actor, ActorQueue>>>;

#[derive(Default)]
struct ActorQueue {
    in_flight: usize,
    pending: VecDeque<Waiter>,
}

struct Waiter {
    ticket: u64,
    wake: oneshot::Sender<()>,
}

/// Snapshot of one actor's queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorStats {
    pub in_flight: usize,
    pub pending: usize,
}

/// Per-actor concurrency-bounded FIFO scheduler.
pub struct RequestScheduler {
    limit: usize,
    queues: Queues,
    next_ticket: AtomicU64,
}

enum Admission {
    Granted(SlotGuard),
    Queued(PendingGuard),
}

impl RequestScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_limit(config.max_concurrent_per_actor)
    }

    /// A limit of zero is treated as one.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queues: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once `actor` has a free slot and return its output.
    ///
    /// The queue position is taken on the first poll, before any suspension,
    /// so futures polled in submission order start in submission order.
    #[instrument(skip(self, actor, task), fields(actor = %actor))]
    pub async fn enqueue<F, Fut>(&self, actor: &Actor, task: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _slot = self.acquire(actor).await;
        trace!("Slot acquired");
        task().await
    }

    async fn acquire(&self, actor: &Actor) -> SlotGuard {
        loop {
            match self.admit(actor) {
                Admission::Granted(slot) => return slot,
                Admission::Queued(pending) => {
                    if let Some(slot) = pending.wait().await {
                        return slot;
                    }
                    // The wake sender vanished without a grant; queue again.
                    debug!(actor = %actor, "Queue entry lost, re-admitting");
                }
            }
        }
    }

    fn admit(&self, actor: &Actor) -> Admission {
        let mut queues = lock(&self.queues);
        let queue = queues.entry(actor.clone()).or_default();

        if queue.in_flight < self.limit && queue.pending.is_empty() {
            queue.in_flight += 1;
            return Admission::Granted(SlotGuard {
                queues: Arc::clone(&self.queues),
                actor: actor.clone(),
            });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (wake, rx) = oneshot::channel();
        queue.pending.push_back(Waiter { ticket, wake });
        debug!(
            actor = %actor,
            in_flight = queue.in_flight,
            pending = queue.pending.len(),
            "Actor at capacity, queued"
        );

        Admission::Queued(PendingGuard {
            queues: Arc::clone(&self.queues),
            actor: actor.clone(),
            ticket,
            rx,
            granted: false,
        })
    }

    /// In-flight and pending counts for `actor`.
    pub fn stats(&self, actor: &Actor) -> ActorStats {
        lock(&self.queues)
            .get(actor)
            .map(|queue| ActorStats {
                in_flight: queue.in_flight,
                pending: queue.pending.len(),
            })
            .unwrap_or_default()
    }

    /// Number of actors with a queue entry, idle or not.
    pub fn tracked_actors(&self) -> usize {
        lock(&self.queues).len()
    }

    /// Drop bookkeeping for actors with nothing running or queued.
    ///
    /// Returns how many entries were removed.
    pub fn prune_idle(&self) -> usize {
        let mut queues = lock(&self.queues);
        let before = queues.len();
        queues.retain(|_, queue| queue.in_flight > 0 || !queue.pending.is_empty());
        before - queues.len()
    }
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("limit", &self.limit)
            .field("tracked_actors", &self.tracked_actors())
            .finish()
    }
}

fn lock(queues: &Queues) -> MutexGuard<'_, HashMap<Actor, ActorQueue>> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand the slot held for `actor` to the next live waiter, or give it back.
fn release_slot(queues: &mut HashMap<Actor, ActorQueue>, actor: &Actor) {
    let Some(queue) = queues.get_mut(actor) else {
        return;
    };

    while let Some(waiter) = queue.pending.pop_front() {
        if waiter.wake.send(()).is_ok() {
            trace!(actor = %actor, ticket = waiter.ticket, "Slot handed to next waiter");
            return;
        }
    }

    queue.in_flight = queue.in_flight.saturating_sub(1);
}

/// An occupied slot; released on drop, including on panic or cancellation.
struct SlotGuard {
    queues: Queues,
    actor: Actor,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut queues = lock(&self.queues);
        release_slot(&mut queues, &self.actor);
    }
}

/// A queued request that has not yet observed its grant.
struct PendingGuard {
    queues: Queues,
    actor: Actor,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl PendingGuard {
    async fn wait(mut self) -> Option<SlotGuard> {
        match (&mut self.rx).await {
            Ok(()) => {
                self.granted = true;
                Some(SlotGuard {
                    queues: Arc::clone(&self.queues),
                    actor: self.actor.clone(),
                })
            }
            Err(_) => None,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.granted {
            return;
        }

        let mut queues = lock(&self.queues);
        let still_queued = queues.get_mut(&self.actor).and_then(|queue| {
            queue
                .pending
                .iter()
                .position(|waiter| waiter.ticket == self.ticket)
                .map(|index| queue.pending.remove(index))
        });

        match still_queued {
            Some(_) => trace!(actor = %self.actor, ticket = self.ticket, "Queued request cancelled"),
            // A grant was sent but never observed; pass the slot on.
            None => {
                if matches!(self.rx.try_recv(), Ok(())) {
                    release_slot(&mut queues, &self.actor);
                }
            }
        }
    }
}
