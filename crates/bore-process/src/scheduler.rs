//! Global worker-slot scheduler: a bounded semaphore with a FIFO waiter
//! queue and cancellation-safe acquire.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bore_core::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("worker slot acquire cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    tx: SyncSender<()>,
}

#[derive(Debug)]
struct SchedulerState {
    max_slots: usize,
    active: usize,
    next_waiter_id: u64,
    waiters: VecDeque<Waiter>,
}

/// Enforces `agents.max_total_workers` across all in-flight executions.
///
/// Waiters are woken FIFO. A release hands the held slot directly to the
/// queue head, so `active` only changes when no one is waiting; the
/// invariant `active <= max_slots` holds at all times.
#[derive(Debug)]
pub struct WorkerScheduler {
    state: Mutex<SchedulerState>,
}

impl WorkerScheduler {
    /// Creates a scheduler with the given slot cap, clamped to >= 1.
    pub fn new(max_slots: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                max_slots: max_slots.max(1),
                active: 0,
                next_waiter_id: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Blocks until a worker slot is available or `token` is cancelled.
    ///
    /// On cancellation the waiter removes itself from the queue; when a
    /// release has already granted it the slot in the same instant, the
    /// notification is drained and the slot handed back with a single
    /// `release`, so no slot is ever leaked or double-counted.
    pub fn acquire(&self, token: &CancelToken) -> Result<(), ScheduleError> {
        let (id, rx) = {
            let mut state = self.lock();
            if state.active < state.max_slots {
                state.active += 1;
                return Ok(());
            }

            let (tx, rx) = sync_channel::<()>(1);
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                // The releaser already adjusted the accounting; the slot is
                // ours as-is.
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if !token.is_cancelled() {
                        continue;
                    }

                    let mut state = self.lock();
                    if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                        state.waiters.remove(pos);
                        return Err(ScheduleError::Cancelled);
                    }
                    drop(state);

                    // Already granted: notifications are sent under the lock,
                    // so the token is in the channel by now. Hand it back.
                    if rx.try_recv().is_ok() {
                        self.release();
                    }
                    return Err(ScheduleError::Cancelled);
                }
                // The sender only drops after a grant was buffered (release
                // pops and sends under the lock), so a disconnect means the
                // grant was already delivered.
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Acquires a slot and wraps it in a guard that releases on drop, so the
    /// slot is returned on every path including panics.
    pub fn acquire_guard(&self, token: &CancelToken) -> Result<SlotGuard<'_>, ScheduleError> {
        self.acquire(token)?;
        Ok(SlotGuard { scheduler: self })
    }

    /// Frees a worker slot. Must be called once per successful acquire.
    pub fn release(&self) {
        let mut state = self.lock();

        if let Some(next) = state.waiters.pop_front() {
            // Transfer the held slot directly; `active` is unchanged because
            // a new holder replaces the old. sync_channel(1) with an empty
            // buffer never blocks here.
            let _ = next.tx.send(());
            return;
        }

        // Release with nothing held is a programming error upstream; keep
        // the counter sane rather than underflowing.
        state.active = state.active.saturating_sub(1);
    }

    /// Current number of held slots.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        let state = self.lock();
        state.max_slots - state.active
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // The mutex only guards O(1) bookkeeping; recover from a poisoned
        // lock rather than propagating a panic.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// RAII slot holder.
pub struct SlotGuard<'a> {
    scheduler: &'a WorkerScheduler,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bore_core::cancel::CancelToken;

    use super::{ScheduleError, WorkerScheduler};

    #[test]
    fn max_slots_is_clamped_to_at_least_one() {
        let scheduler = WorkerScheduler::new(0);
        assert_eq!(scheduler.available(), 1);
    }

    #[test]
    fn acquire_and_release_track_active_count() {
        let scheduler = WorkerScheduler::new(2);
        let token = CancelToken::new();

        scheduler.acquire(&token).expect("first");
        scheduler.acquire(&token).expect("second");
        assert_eq!(scheduler.active(), 2);
        assert_eq!(scheduler.available(), 0);

        scheduler.release();
        scheduler.release();
        assert_eq!(scheduler.active(), 0);
        assert_eq!(scheduler.available(), 2);
    }

    #[test]
    fn release_without_acquire_is_a_no_op() {
        let scheduler = WorkerScheduler::new(1);
        scheduler.release();
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn active_never_exceeds_max_slots() {
        let scheduler = Arc::new(WorkerScheduler::new(3));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let scheduler = Arc::clone(&scheduler);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(thread::spawn(move || {
                let token = CancelToken::new();
                for _ in 0..20 {
                    scheduler.acquire(&token).expect("acquire");
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    current.fetch_sub(1, Ordering::SeqCst);
                    scheduler.release();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn waiters_are_woken_in_fifo_order() {
        let scheduler = Arc::new(WorkerScheduler::new(1));
        let token = CancelToken::new();
        scheduler.acquire(&token).expect("occupy the slot");

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let scheduler = Arc::clone(&scheduler);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let token = CancelToken::new();
                scheduler.acquire(&token).expect("acquire");
                order.lock().unwrap().push(i);
                scheduler.release();
            }));
            // Stagger arrivals so queue order matches spawn order.
            thread::sleep(Duration::from_millis(60));
        }

        scheduler.release();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn cancelled_waiter_leaves_active_unchanged() {
        let scheduler = Arc::new(WorkerScheduler::new(1));
        let holder_token = CancelToken::new();
        scheduler.acquire(&holder_token).expect("occupy");

        let waiter_token = CancelToken::new();
        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            let token = waiter_token.clone();
            thread::spawn(move || scheduler.acquire(&token))
        };

        thread::sleep(Duration::from_millis(100));
        waiter_token.cancel();
        let result = waiter.join().expect("join");
        assert!(matches!(result, Err(ScheduleError::Cancelled)));

        assert_eq!(scheduler.active(), 1);
        scheduler.release();
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn slot_granted_to_cancelled_waiter_is_handed_back() {
        // A waiter cancelled at the same instant release hands it the slot
        // must return the slot; afterwards the slot is acquirable again.
        let scheduler = Arc::new(WorkerScheduler::new(1));
        let token = CancelToken::new();
        scheduler.acquire(&token).expect("occupy");

        let waiter_token = CancelToken::new();
        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            let token = waiter_token.clone();
            thread::spawn(move || scheduler.acquire(&token))
        };

        thread::sleep(Duration::from_millis(100));
        // Cancel and release in the same instant; whichever way the race
        // lands, the caller owes exactly one release when acquire succeeded
        // and none when it was cancelled.
        waiter_token.cancel();
        scheduler.release();
        let result = waiter.join().expect("join");

        match result {
            Ok(()) => {
                assert_eq!(scheduler.active(), 1);
                scheduler.release();
            }
            Err(ScheduleError::Cancelled) => assert_eq!(scheduler.active(), 0),
        }

        scheduler.acquire(&token).expect("slot must be acquirable again");
        assert_eq!(scheduler.active(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let scheduler = WorkerScheduler::new(1);
        let token = CancelToken::new();

        {
            let _guard = scheduler.acquire_guard(&token).expect("acquire");
            assert_eq!(scheduler.active(), 1);
        }
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn guard_releases_when_holder_panics() {
        let scheduler = Arc::new(WorkerScheduler::new(1));
        let token = CancelToken::new();

        let scheduler_clone = Arc::clone(&scheduler);
        let result = thread::spawn(move || {
            let _guard = scheduler_clone
                .acquire_guard(&CancelToken::new())
                .expect("acquire");
            panic!("worker blew up");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(scheduler.active(), 0);
        scheduler.acquire(&token).expect("slot must be free again");
    }
}
