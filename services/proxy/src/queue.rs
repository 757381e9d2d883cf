//! Per-user admission control.
//!
//! Each user may have at most `limit` requests outstanding on a proxy.
//! Admissions past the limit queue FIFO until a slot frees or the wait
//! timeout elapses, at which point a backpressure error is surfaced —
//! deliberately distinct from a server-overload error. Raising a user's
//! limit at runtime grants already-queued waiters immediately, without a
//! new admit call.
//!
//! A grant hands the waiter an armed slot guard through its oneshot
//! channel; the guard releases on drop, so a waiter that gave up (or
//! was cancelled) between grant and receipt cannot leak a slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use gridgate_types::GatewayError;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::dynconfig::ConfigHandle;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<SlotGuard>,
}

#[derive(Default)]
struct UserQueue {
    limit_override: Option<usize>,
    in_flight: usize,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct LimiterState {
    users: HashMap<String, UserQueue>,
    next_waiter_id: u64,
}

struct LimiterShared {
    config: ConfigHandle,
    state: Mutex<LimiterState>,
}

impl LimiterShared {
    fn effective_limit(&self, queue: &UserQueue) -> usize {
        queue
            .limit_override
            .unwrap_or_else(|| self.config.load().queue.default_request_queue_size_limit)
    }

    /// Hand slots to queued waiters while capacity remains. Runs under
    /// the state lock; a waiter that stopped listening gets skipped and
    /// its would-be slot goes to the next one.
    fn grant_waiters(shared: &Arc<Self>, state: &mut MutexGuard<'_, LimiterState>, user: &str) {
        let Some(queue) = state.users.get_mut(user) else {
            return;
        };
        let limit = shared.effective_limit(queue);

        while queue.in_flight < limit {
            let Some(waiter) = queue.waiters.pop_front() else {
                break;
            };
            queue.in_flight += 1;
            let guard = SlotGuard {
                shared: Arc::clone(shared),
                user: user.to_string(),
                armed: true,
            };
            if let Err(mut unclaimed) = waiter.tx.send(guard) {
                // Receiver already gone (timed out); take the slot back
                // without re-entering the lock.
                unclaimed.armed = false;
                queue.in_flight -= 1;
            }
        }
    }

    fn release(shared: &Arc<Self>, user: &str) {
        let mut state = shared.state.lock().expect("request queue limiter poisoned");
        if let Some(queue) = state.users.get_mut(user) {
            queue.in_flight = queue.in_flight.saturating_sub(1);
        }
        Self::grant_waiters(shared, &mut state, user);
    }
}

/// An admitted request's slot. Dropping it frees the slot and wakes the
/// next waiter in FIFO order.
pub struct QueueSlot {
    guard: SlotGuard,
}

impl QueueSlot {
    pub fn user(&self) -> &str {
        &self.guard.user
    }
}

impl std::fmt::Debug for QueueSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSlot")
            .field("user", &self.guard.user)
            .finish()
    }
}

struct SlotGuard {
    shared: Arc<LimiterShared>,
    user: String,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            let shared = Arc::clone(&self.shared);
            LimiterShared::release(&shared, &self.user);
        }
    }
}

/// Per-user FIFO admission control.
pub struct RequestQueueLimiter {
    shared: Arc<LimiterShared>,
}

impl RequestQueueLimiter {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                config,
                state: Mutex::new(LimiterState::default()),
            }),
        }
    }

    /// Admit a request for `user`, queueing up to the wait timeout.
    ///
    /// The backpressure error's `retryable` hint carries the dynamic
    /// overflow-retry flag to the client.
    pub async fn admit(&self, user: &str) -> Result<QueueSlot, GatewayError> {
        let (rx, waiter_id, limit) = {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("request queue limiter poisoned");
            let waiter_id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let queue = state.users.entry(user.to_string()).or_default();
            let limit = self.shared.effective_limit(queue);

            if queue.in_flight < limit {
                queue.in_flight += 1;
                return Ok(QueueSlot {
                    guard: SlotGuard {
                        shared: Arc::clone(&self.shared),
                        user: user.to_string(),
                        armed: true,
                    },
                });
            }

            let (tx, rx) = oneshot::channel();
            queue.waiters.push_back(Waiter { id: waiter_id, tx });
            debug!(user, limit, "request queued for admission");
            (rx, waiter_id, limit)
        };

        let config = self.shared.config.load();
        match timeout(config.queue.wait_timeout(), rx).await {
            Ok(Ok(guard)) => Ok(QueueSlot { guard }),
            // Timed out, or the limiter vanished underneath us. Any
            // slot granted during the race rides home in a guard the
            // channel drops for us.
            Ok(Err(_)) | Err(_) => {
                self.forget_waiter(user, waiter_id);
                Err(GatewayError::queue_size_limit_exceeded(user, limit)
                    .with_retryable(config.retry_request_queue_size_limit_exceeded.0))
            }
        }
    }

    fn forget_waiter(&self, user: &str, waiter_id: u64) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("request queue limiter poisoned");
        if let Some(queue) = state.users.get_mut(user) {
            queue.waiters.retain(|waiter| waiter.id != waiter_id);
        }
    }

    /// Set a per-user limit, effective immediately: queued waiters are
    /// granted on the spot if the new limit makes room.
    pub fn set_limit(&self, user: &str, limit: usize) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("request queue limiter poisoned");
        state
            .users
            .entry(user.to_string())
            .or_default()
            .limit_override = Some(limit);
        debug!(user, limit, "request queue limit changed");
        LimiterShared::grant_waiters(&self.shared, &mut state, user);
    }

    /// Outstanding request count for a user.
    pub fn in_flight(&self, user: &str) -> usize {
        self.shared
            .state
            .lock()
            .expect("request queue limiter poisoned")
            .users
            .get(user)
            .map(|queue| queue.in_flight)
            .unwrap_or(0)
    }

    /// Queued (not yet admitted) request count for a user.
    pub fn queued(&self, user: &str) -> usize {
        self.shared
            .state
            .lock()
            .expect("request queue limiter poisoned")
            .users
            .get(user)
            .map(|queue| queue.waiters.len())
            .unwrap_or(0)
    }
}
