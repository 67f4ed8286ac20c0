//! Bounded concurrency scheduler
//!
//! Admits tasks under a global slot budget while keeping tasks that share a
//! key strictly ordered. A waiting task is only eligible once no earlier task
//! with the same key is running, so with one slot the queue is plain FIFO.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

struct Waiter {
    key: String,
    tx: oneshot::Sender<SlotPermit>,
}

struct State {
    max: usize,
    running: usize,
    queue: VecDeque<Waiter>,
    busy_keys: HashSet<String>,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held while a task runs; dropping it frees the slot and the key
pub struct SlotPermit {
    key: String,
    shared: Arc<Shared>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let grants = {
            let mut state = self.shared.lock();
            state.running = state.running.saturating_sub(1);
            state.busy_keys.remove(&self.key);
            admit(&mut state, &self.shared)
        };
        deliver(grants);
    }
}

/// Pop every waiter that can start now. Must run under the lock; the
/// permits are sent after it is released.
fn admit(state: &mut State, shared: &Arc<Shared>) -> Vec<(oneshot::Sender<SlotPermit>, SlotPermit)> {
    let mut grants = Vec::new();
    let mut idx = 0;
    while state.running < state.max && idx < state.queue.len() {
        if state.queue[idx].tx.is_closed() {
            state.queue.remove(idx);
            continue;
        }
        if state.busy_keys.contains(&state.queue[idx].key) {
            idx += 1;
            continue;
        }
        if let Some(waiter) = state.queue.remove(idx) {
            state.running += 1;
            state.busy_keys.insert(waiter.key.clone());
            let permit = SlotPermit {
                key: waiter.key,
                shared: Arc::clone(shared),
            };
            grants.push((waiter.tx, permit));
        }
    }
    grants
}

fn deliver(grants: Vec<(oneshot::Sender<SlotPermit>, SlotPermit)>) {
    for (tx, permit) in grants {
        // A receiver gone between admit and send hands the permit back,
        // and its drop releases the slot.
        let _ = tx.send(permit);
    }
}

/// Global-bound, per-key-ordered task scheduler
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// `max_concurrency` is clamped to at least 1
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    max: max_concurrency.max(1),
                    running: 0,
                    queue: VecDeque::new(),
                    busy_keys: HashSet::new(),
                }),
            }),
        }
    }

    /// Queue `task` under `key` and resolve to its output.
    ///
    /// Registration happens immediately, before the returned future is first
    /// polled, so submission order is call order.
    pub fn enqueue<F, T>(&self, key: impl Into<String>, task: F) -> impl Future<Output = T> + Send
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let grants = {
            let mut state = self.shared.lock();
            state.queue.push_back(Waiter {
                key: key.clone(),
                tx,
            });
            debug!(key = %key, queued = state.queue.len(), running = state.running, "Task queued");
            admit(&mut state, &self.shared)
        };
        deliver(grants);

        let shared = Arc::clone(&self.shared);
        async move {
            // The sender lives in the queue until admitted, and the queue
            // lives as long as `shared`, so this only fails on a poisoned path.
            let _permit = match rx.await {
                Ok(permit) => permit,
                Err(_) => SlotPermit::detached(key, shared),
            };
            task.await
        }
    }

    /// Change the global bound. Running tasks are unaffected; a larger bound
    /// admits waiters right away.
    pub fn set_max_concurrency(&self, max: usize) {
        let grants = {
            let mut state = self.shared.lock();
            state.max = max.max(1);
            debug!(max = state.max, "Max concurrency changed");
            admit(&mut state, &self.shared)
        };
        deliver(grants);
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.lock().max
    }

    /// Tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.shared.lock().running
    }

    /// Tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }
}

impl SlotPermit {
    /// Count a task that lost its queue entry as running so the drop
    /// accounting stays balanced.
    fn detached(key: String, shared: Arc<Shared>) -> Self {
        {
            let mut state = shared.lock();
            state.running += 1;
            state.busy_keys.insert(key.clone());
        }
        Self { key, shared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_global_bound_never_exceeded() {
        let scheduler = Scheduler::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for (i, key) in ["a", "b", "a"].into_iter().enumerate() {
            let current = current.clone();
            let peak = peak.clone();
            let fut = scheduler.enqueue(key, async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                i
            });
            handles.push(tokio::spawn(fut));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.running(), 0);
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_is_global_fifo() {
        let scheduler = Scheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        let mut id = 0;
        for _round in 0..2 {
            for key in ["x", "y", "z"] {
                let order = order.clone();
                let my_id = id;
                id += 1;
                // later submissions finish faster, so only admission order
                // can produce a sorted completion list
                let delay = Duration::from_millis(60 - my_id * 10);
                handles.push(tokio::spawn(scheduler.enqueue(key, async move {
                    tokio::time::sleep(delay).await;
                    order.lock().unwrap().push(my_id);
                })));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_runs_in_order_different_keys_in_parallel() {
        let scheduler = Scheduler::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |label: &'static str, ms: u64| {
            let order = order.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                order.lock().unwrap().push(label);
            }
        };

        let a1 = tokio::spawn(scheduler.enqueue("a", push("a1", 100)));
        let a2 = tokio::spawn(scheduler.enqueue("a", push("a2", 10)));
        let b1 = tokio::spawn(scheduler.enqueue("b", push("b1", 50)));

        tokio::task::yield_now().await;
        assert_eq!(scheduler.running(), 2);
        assert_eq!(scheduler.queued(), 1);

        for h in [a1, a2, b1] {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["b1", "a1", "a2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_releases_key_and_slot() {
        let scheduler = Scheduler::new(1);
        let first = scheduler.enqueue("k", async { Err::<u32, &str>("boom") });
        let second = scheduler.enqueue("k", async { Ok::<u32, &str>(7) });

        assert_eq!(first.await, Err("boom"));
        assert_eq!(second.await, Ok(7));
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_releases_slot() {
        let scheduler = Scheduler::new(1);
        let bad = tokio::spawn(scheduler.enqueue("k", async {
            panic!("task failed");
        }));
        assert!(bad.await.is_err());

        let ok = scheduler.enqueue("k", async { 1 });
        assert_eq!(ok.await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raising_bound_admits_waiters() {
        let scheduler = Scheduler::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = tokio::spawn(scheduler.enqueue("a", async move {
            let _ = release_rx.await;
        }));
        let waiter = tokio::spawn(scheduler.enqueue("b", async { "b done" }));

        tokio::task::yield_now().await;
        assert_eq!(scheduler.running(), 1);
        assert_eq!(scheduler.queued(), 1);

        scheduler.set_max_concurrency(2);
        assert_eq!(waiter.await.unwrap(), "b done");

        release_tx.send(()).unwrap();
        blocker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowering_bound_only_affects_new_admissions() {
        let scheduler = Scheduler::new(3);
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();

        let h1 = tokio::spawn(scheduler.enqueue("a", async move {
            let _ = rx1.await;
        }));
        let h2 = tokio::spawn(scheduler.enqueue("b", async move {
            let _ = rx2.await;
        }));
        tokio::task::yield_now().await;
        assert_eq!(scheduler.running(), 2);

        scheduler.set_max_concurrency(0);
        assert_eq!(scheduler.max_concurrency(), 1);
        assert_eq!(scheduler.running(), 2);

        let h3 = tokio::spawn(scheduler.enqueue("c", async { 3 }));
        tokio::task::yield_now().await;
        assert_eq!(scheduler.queued(), 1);

        tx1.send(()).unwrap();
        h1.await.unwrap();
        // still one running, bound is one
        assert_eq!(scheduler.queued(), 1);

        tx2.send(()).unwrap();
        h2.await.unwrap();
        assert_eq!(h3.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_future_does_not_leak_slot() {
        let scheduler = Scheduler::new(1);
        let (tx, rx) = oneshot::channel::<()>();
        let blocker = tokio::spawn(scheduler.enqueue("a", async move {
            let _ = rx.await;
        }));
        tokio::task::yield_now().await;

        // abandoned while queued
        drop(scheduler.enqueue("b", async {}));
        assert_eq!(scheduler.queued(), 1);

        tx.send(()).unwrap();
        blocker.await.unwrap();
        assert_eq!(scheduler.running(), 0);
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(scheduler.enqueue("c", async { 5 }).await, 5);
    }
}
