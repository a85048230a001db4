use std::collections::VecDeque;
use std::sync::Mutex;

struct QueueState<E> {
    depth: usize,
    queue: VecDeque<E>,
}

/// Reentrancy-safe, thread-safe dispatch loop with quiescence-tracked flushing.
///
/// The synchronizer is specified as a single-threaded reducer (spec §5), but `Synchronizer<D>`
/// is shared behind an `Arc` across tasks in practice (one per channel adapter), so `dispatch`
/// may genuinely be called from more than one OS thread at once, not just reentrantly from
/// within its own call stack. Both cases are handled the same way: whichever caller finds
/// `depth == 0` becomes the loop that drains the queue to empty and runs `on_quiescent` exactly
/// once when it does; every other caller — reentrant or concurrent — just appends and returns,
/// trusting the active loop to reach their event before it declares quiescence (the depth flag
/// is only reset to 0 while still holding the lock that guards the final empty check).
pub struct WorkQueue<E> {
    state: Mutex<QueueState<E>>,
}

impl<E> Default for WorkQueue<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState { depth: 0, queue: VecDeque::new() }),
        }
    }
}

impl<E> WorkQueue<E> {
    pub fn dispatch(&self, event: E, mut process: impl FnMut(E), mut on_quiescent: impl FnMut()) {
        let mut guard = self.state.lock().unwrap();
        guard.queue.push_back(event);
        if guard.depth > 0 {
            return;
        }
        guard.depth = 1;
        loop {
            let next = guard.queue.pop_front();
            match next {
                Some(event) => {
                    // Dropped before `process`: a reentrant or concurrent `dispatch` call may
                    // need this same lock, and must see `depth > 0` rather than deadlock.
                    drop(guard);
                    process(event);
                    guard = self.state.lock().unwrap();
                }
                None => break,
            }
        }
        guard.depth = 0;
        drop(guard);
        on_quiescent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::Arc;

    #[test]
    fn quiescent_callback_fires_once_for_a_single_event() {
        let queue: WorkQueue<u32> = WorkQueue::default();
        let processed = RefCell::new(Vec::new());
        let quiescent_count = Cell::new(0);

        queue.dispatch(
            1,
            |event| processed.borrow_mut().push(event),
            || quiescent_count.set(quiescent_count.get() + 1),
        );

        assert_eq!(processed.borrow().as_slice(), &[1]);
        assert_eq!(quiescent_count.get(), 1);
    }

    #[test]
    fn nested_dispatch_call_is_absorbed_into_the_running_loop() {
        let queue: WorkQueue<u32> = WorkQueue::default();
        let processed = RefCell::new(Vec::new());
        let quiescent_count = Cell::new(0);

        queue.dispatch(
            1,
            |event| {
                processed.borrow_mut().push(event);
                if event == 1 {
                    // Reentrant: depth > 0 here, so this only enqueues `2` for the outer loop.
                    queue.dispatch(2, |_| {}, || {});
                }
            },
            || quiescent_count.set(quiescent_count.get() + 1),
        );

        assert_eq!(processed.borrow().as_slice(), &[1, 2]);
        assert_eq!(quiescent_count.get(), 1);
    }

    #[test]
    fn concurrent_dispatch_from_another_thread_is_absorbed_not_lost() {
        let queue = Arc::new(WorkQueue::<u32>::default());
        let processed = Arc::new(Mutex::new(Vec::new()));
        let quiescent_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let q2 = queue.clone();
        let p2 = processed.clone();
        let qc2 = quiescent_count.clone();
        let p1 = processed.clone();

        queue.dispatch(
            1,
            move |event| {
                p1.lock().unwrap().push(event);
                // Spawn a genuinely concurrent dispatch while the outer loop is still running;
                // it must be absorbed into this cycle rather than racing to run its own.
                let handle = std::thread::spawn(move || {
                    q2.dispatch(
                        2,
                        move |event| p2.lock().unwrap().push(event),
                        move || { qc2.fetch_add(1, std::sync::atomic::Ordering::SeqCst); },
                    );
                });
                handle.join().unwrap();
            },
            || {
                quiescent_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            },
        );

        let total_quiescent = quiescent_count.load(std::sync::atomic::Ordering::SeqCst);
        assert!(total_quiescent >= 1);
        assert!(processed.lock().unwrap().contains(&2));
    }
}
