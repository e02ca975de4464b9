//! Single-threaded macrotask loop with a virtual clock.
//!
//! Tasks queued with [`EventLoop::queue_task`] run in FIFO order on the next
//! turn. Timers fire when the virtual clock is advanced past their due time.
//! Nothing here runs concurrently: every callback executes on the caller's
//! stack inside [`EventLoop::run_until_idle`] or [`EventLoop::advance`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::warn;

/// A queued macrotask.
pub type Task = Box<dyn FnOnce()>;

/// Identifier of a pending timer.
pub type TimerId = u64;

/// Upper bound on tasks run by one drain, guards against self-requeueing loops.
const MAX_TASKS_PER_DRAIN: usize = 100_000;

/// Kind of timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
}

struct Timer {
    kind: TimerKind,
    due: u64,
    delay: u64,
    callback: Rc<dyn Fn()>,
}

/// The host event loop.
pub struct EventLoop {
    now: Cell<u64>,
    tasks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<TimerId, Timer>>,
    next_timer: Cell<TimerId>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create an idle loop at time zero.
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            tasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            next_timer: Cell::new(1),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    /// Queue a macrotask for the next turn.
    pub fn queue_task(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Number of queued macrotasks.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    fn add_timer(&self, kind: TimerKind, delay: u64, callback: Rc<dyn Fn()>) -> TimerId {
        let id = self.next_timer.get();
        self.next_timer.set(id + 1);
        self.timers.borrow_mut().insert(
            id,
            Timer {
                kind,
                due: self.now.get().saturating_add(delay),
                delay,
                callback,
            },
        );
        id
    }

    /// Schedule `callback` once after `delay` ms.
    pub fn set_timeout(&self, delay: u64, callback: impl Fn() + 'static) -> TimerId {
        self.add_timer(TimerKind::Timeout, delay, Rc::new(callback))
    }

    /// Schedule `callback` every `delay` ms (minimum 1).
    pub fn set_interval(&self, delay: u64, callback: impl Fn() + 'static) -> TimerId {
        self.add_timer(TimerKind::Interval, delay.max(1), Rc::new(callback))
    }

    /// Cancel a timer. Returns true if it was pending.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().remove(&id).is_some()
    }

    /// Whether a timer is still pending.
    pub fn has_timer(&self, id: TimerId) -> bool {
        self.timers.borrow().contains_key(&id)
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Kind of a pending timer.
    pub fn timer_kind(&self, id: TimerId) -> Option<TimerKind> {
        self.timers.borrow().get(&id).map(|t| t.kind)
    }

    /// Run queued macrotasks until the queue is empty.
    ///
    /// Tasks queued by running tasks also run. Returns the number run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
            if ran >= MAX_TASKS_PER_DRAIN {
                warn!(ran, "event loop drain limit reached");
                break;
            }
        }
        ran
    }

    /// Run only the macrotasks queued before this call.
    pub fn run_one_turn(&self) -> usize {
        let queued = self.tasks.borrow().len();
        for _ in 0..queued {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => return queued,
            }
        }
        queued
    }

    fn next_due(&self, limit: u64) -> Option<(TimerId, u64)> {
        self.timers
            .borrow()
            .iter()
            .filter(|(_, t)| t.due <= limit)
            .min_by_key(|(id, t)| (t.due, **id))
            .map(|(id, t)| (*id, t.due))
    }

    /// Advance the virtual clock by `ms`, firing due timers in order.
    ///
    /// Macrotasks are drained before each timer and at the end.
    pub fn advance(&self, ms: u64) {
        let target = self.now.get().saturating_add(ms);
        self.run_until_idle();
        while let Some((id, due)) = self.next_due(target) {
            self.now.set(due);
            let callback = {
                let mut timers = self.timers.borrow_mut();
                let Some(timer) = timers.get_mut(&id) else {
                    continue;
                };
                let callback = Rc::clone(&timer.callback);
                match timer.kind {
                    TimerKind::Timeout => {
                        timers.remove(&id);
                    }
                    // an interval pushed past the end of time never fires again
                    TimerKind::Interval => match timer.due.checked_add(timer.delay) {
                        Some(due) => timer.due = due,
                        None => {
                            timers.remove(&id);
                        }
                    },
                }
                callback
            };
            callback();
            self.run_until_idle();
        }
        self.now.set(target);
        self.run_until_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_fifo_order() {
        let lp = Rc::new(EventLoop::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            lp.queue_task(move || log.borrow_mut().push(i));
        }
        assert_eq!(lp.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn run_one_turn_defers_nested_tasks() {
        let lp = Rc::new(EventLoop::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner_lp = Rc::clone(&lp);
        let l = Rc::clone(&log);
        lp.queue_task(move || {
            l.borrow_mut().push("outer");
            let l2 = Rc::clone(&l);
            inner_lp.queue_task(move || l2.borrow_mut().push("inner"));
        });
        lp.run_one_turn();
        assert_eq!(*log.borrow(), vec!["outer"]);
        lp.run_one_turn();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn timeout_fires_once() {
        let lp = EventLoop::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = lp.set_timeout(10, move || h.set(h.get() + 1));
        lp.advance(5);
        assert_eq!(hits.get(), 0);
        assert!(lp.has_timer(id));
        lp.advance(10);
        assert_eq!(hits.get(), 1);
        assert!(!lp.has_timer(id));
    }

    #[test]
    fn interval_repeats_until_cleared() {
        let lp = EventLoop::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = lp.set_interval(10, move || h.set(h.get() + 1));
        lp.advance(35);
        assert_eq!(hits.get(), 3);
        assert!(lp.clear_timer(id));
        lp.advance(100);
        assert_eq!(hits.get(), 3);
        assert_eq!(lp.now(), 135);
    }

    #[test]
    fn huge_delays_saturate_instead_of_overflowing() {
        let lp = EventLoop::new();
        let hits = Rc::new(Cell::new(0));
        lp.advance(1);
        let h = Rc::clone(&hits);
        let timeout = lp.set_timeout(u64::MAX, move || h.set(h.get() + 1));
        let h = Rc::clone(&hits);
        let interval = lp.set_interval(u64::MAX, move || h.set(h.get() + 1));
        lp.advance(1_000);
        assert_eq!(hits.get(), 0);
        assert!(lp.has_timer(timeout));

        lp.advance(u64::MAX);
        assert_eq!(lp.now(), u64::MAX);
        assert_eq!(hits.get(), 2);
        assert!(!lp.has_timer(interval));
    }
}
