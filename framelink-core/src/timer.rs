//! Deadline timer for the application loop.
//!
//! A single-threaded min-heap keyed on monotonic deadlines, driven by
//! `update()` once per tick. One-shot and repeating tasks share the id
//! space; a repeating task keeps its id across reschedules so cancellation
//! by id always lands. Callbacks must not re-enter the timer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use tracing::debug;

/// Timer handle returned by the schedule operations. `0` is never issued.
pub type TimerId = u64;

enum TaskKind {
    Once(Box<dyn FnOnce()>),
    /// Reschedules while the callback returns true.
    Repeating(Box<dyn FnMut() -> bool>),
}

struct TimerTask {
    id: TimerId,
    deadline: Instant,
    interval: Duration,
    kind: TaskKind,
}

/// Heap adapter: earliest deadline on top, id as the tie-breaker.
struct HeapEntry(TimerTask);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.id == other.0.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .deadline
            .cmp(&self.0.deadline)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Min-heap timer with id-based cancellation.
#[derive(Default)]
pub struct Timer {
    queue: BinaryHeap<HeapEntry>,
    cancelled: HashSet<TimerId>,
    next_id: TimerId,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    /// Run `callback` once after `delay`.
    pub fn schedule_once(&mut self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let deadline = Instant::now() + delay;
        self.schedule_task(deadline, Duration::ZERO, TaskKind::Once(Box::new(callback)))
    }

    /// Run `callback` once at `deadline`.
    pub fn schedule_at(&mut self, deadline: Instant, callback: impl FnOnce() + 'static) -> TimerId {
        self.schedule_task(deadline, Duration::ZERO, TaskKind::Once(Box::new(callback)))
    }

    /// Run `callback` after `delay`, then every `interval` while it returns
    /// true. A zero interval degrades to one-shot.
    pub fn schedule_repeating(
        &mut self,
        delay: Duration,
        interval: Duration,
        callback: impl FnMut() -> bool + 'static,
    ) -> TimerId {
        let deadline = Instant::now() + delay;
        if interval.is_zero() {
            let mut callback = callback;
            return self.schedule_task(
                deadline,
                Duration::ZERO,
                TaskKind::Once(Box::new(move || {
                    let _ = callback();
                })),
            );
        }
        self.schedule_task(deadline, interval, TaskKind::Repeating(Box::new(callback)))
    }

    /// Cancel a task by id. A cancellation observed before the callback runs
    /// always wins, including mid-update. Returns false for the invalid id 0.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if id == 0 {
            return false;
        }
        self.cancelled.insert(id);
        true
    }

    /// Fire every due task in non-decreasing deadline order; returns the
    /// number of callbacks invoked.
    pub fn update(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// Deterministic core of `update`: fire everything due at `now`.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(top) = self.queue.peek() {
            if top.0.deadline > now {
                break;
            }
            let HeapEntry(task) = self.queue.pop().expect("peeked entry vanished");
            if self.cancelled.remove(&task.id) {
                continue;
            }
            match task.kind {
                TaskKind::Once(callback) => {
                    callback();
                    fired += 1;
                }
                TaskKind::Repeating(mut callback) => {
                    let keep = callback();
                    fired += 1;
                    if keep {
                        self.queue.push(HeapEntry(TimerTask {
                            id: task.id,
                            deadline: task.deadline + task.interval,
                            interval: task.interval,
                            kind: TaskKind::Repeating(callback),
                        }));
                    }
                }
            }
        }
        fired
    }

    /// Number of live (scheduled, not cancelled) tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .iter()
            .filter(|entry| !self.cancelled.contains(&entry.0.id))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every task and pending cancellation.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.cancelled.clear();
    }

    fn schedule_task(&mut self, deadline: Instant, interval: Duration, kind: TaskKind) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.queue.push(HeapEntry(TimerTask {
            id,
            deadline,
            interval,
            kind,
        }));
        debug!(timer = id, repeating = !interval.is_zero(), "timer scheduled");
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn fires_in_deadline_order() {
        let mut timer = Timer::new();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let base = Instant::now();
        for (delay, tag) in [(30, 'c'), (10, 'a'), (20, 'b')] {
            let order = order.clone();
            timer.schedule_at(base + delay * MS, move || order.borrow_mut().push(tag));
        }
        assert_eq!(timer.poll_at(base + 40 * MS), 3);
        assert_eq!(*order.borrow(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn unexpired_tasks_stay_queued() {
        let mut timer = Timer::new();
        let fired = Rc::new(Cell::new(false));
        let base = Instant::now();
        {
            let fired = fired.clone();
            timer.schedule_at(base + 100 * MS, move || fired.set(true));
        }
        assert_eq!(timer.poll_at(base + 50 * MS), 0);
        assert!(!fired.get());
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn cancelled_callback_never_fires() {
        let mut timer = Timer::new();
        let fired = Rc::new(Cell::new(false));
        let base = Instant::now();
        let id = {
            let fired = fired.clone();
            timer.schedule_at(base, move || fired.set(true))
        };
        assert!(timer.cancel(id));
        assert_eq!(timer.poll_at(base + MS), 0);
        assert!(!fired.get());
        assert_eq!(timer.len(), 0);
    }

    #[test]
    fn cancel_rejects_the_null_id() {
        let mut timer = Timer::new();
        assert!(!timer.cancel(0));
    }

    #[test]
    fn repeating_task_keeps_its_id_across_reschedules() {
        let mut timer = Timer::new();
        let count = Rc::new(Cell::new(0));
        let base = Instant::now();
        let id = {
            let count = count.clone();
            timer.schedule_repeating(Duration::ZERO, 10 * MS, move || {
                count.set(count.get() + 1);
                true
            })
        };
        assert_eq!(timer.poll_at(base + MS), 1);
        assert_eq!(timer.poll_at(base + 12 * MS), 1);
        // cancelling after two fires still lands on the rescheduled task
        timer.cancel(id);
        assert_eq!(timer.poll_at(base + 25 * MS), 0);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn repeating_predicate_stops_rescheduling() {
        // 500 ms repeating task whose callback returns true for the first
        // three fires: exactly four invocations over 2.1 s of virtual time.
        let mut timer = Timer::new();
        let count = Rc::new(Cell::new(0u32));
        let base = Instant::now();
        {
            let count = count.clone();
            timer.schedule_repeating(500 * MS, 500 * MS, move || {
                count.set(count.get() + 1);
                count.get() <= 3
            });
        }
        let mut fired = 0;
        for at in [550, 1050, 1550, 2050, 2100] {
            fired += timer.poll_at(base + at * MS);
        }
        assert_eq!(fired, 4);
        assert_eq!(count.get(), 4);
        assert_eq!(timer.len(), 0);
    }

    #[test]
    fn missed_intervals_catch_up_once_per_interval() {
        let mut timer = Timer::new();
        let count = Rc::new(Cell::new(0u32));
        let base = Instant::now();
        {
            let count = count.clone();
            timer.schedule_repeating(10 * MS, 10 * MS, move || {
                count.set(count.get() + 1);
                true
            });
        }
        // one update far in the future fires once per nominal interval
        assert_eq!(timer.poll_at(base + 45 * MS), 4);
    }

    #[test]
    fn len_does_not_undercount_after_skipped_cancellations() {
        let mut timer = Timer::new();
        let base = Instant::now();
        let id = timer.schedule_at(base, || {});
        timer.schedule_at(base + 100 * MS, || {});
        timer.cancel(id);
        assert_eq!(timer.len(), 1);
        // skipping the cancelled entry must not disturb the count
        assert_eq!(timer.poll_at(base + MS), 0);
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut timer = Timer::new();
        timer.schedule_once(Duration::ZERO, || {});
        timer.schedule_once(Duration::ZERO, || {});
        timer.clear();
        assert!(timer.is_empty());
        assert_eq!(timer.update(), 0);
    }
}
