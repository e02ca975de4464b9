//! Per-guest ledger of global side effects.
//!
//! Every listener and timer a guest registers through its sandbox goes
//! through an [`EffectTracker`], which can unbind them all ([`release`]),
//! snapshot them ([`record`]) and reattach a snapshot ([`rebuild`]).
//!
//! [`release`]: EffectTracker::release
//! [`record`]: EffectTracker::record
//! [`rebuild`]: EffectTracker::rebuild

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use cohost_env::{Env, Function, Listener, TimerId, TimerKind, Value};
use cohost_router::app_event_name;
use tracing::debug;

use crate::click::ClickTable;
use crate::document::DocumentEvents;

/// Window events always namespaced per guest.
pub const RESERVED_EVENTS: &[&str] = &["unmount", "appstate-change"];
/// Window events namespaced per guest only under the virtual router.
pub const ROUTER_EVENTS: &[&str] = &["popstate", "hashchange"];

/// Guest timer callback.
pub type TimerCallback = Rc<dyn Fn()>;

#[derive(Clone)]
struct TimerRecord {
    kind: TimerKind,
    delay: u64,
    callback: TimerCallback,
}

/// A live guest timer. Guests hold the id it is keyed by, which stays put
/// when the timer is recreated under a new event-loop id.
struct LiveTimer {
    record: TimerRecord,
    loop_id: TimerId,
}

type TimerTable = BTreeMap<TimerId, LiveTimer>;

#[derive(Clone)]
struct BoundListener {
    real_type: String,
    original: Listener,
    wrapped: Listener,
}

type ListenerTable = BTreeMap<String, Vec<BoundListener>>;

/// Bindings captured by [`EffectTracker::record`], plus the timers a later
/// [`EffectTracker::release`] cleared.
#[derive(Clone, Default)]
pub struct EffectSnapshot {
    window: BTreeMap<String, Vec<Listener>>,
    document: BTreeMap<String, Vec<Listener>>,
    onclick: Option<Function>,
    cleared_timers: BTreeMap<TimerId, TimerRecord>,
}

impl EffectSnapshot {
    pub fn window_listener_count(&self) -> usize {
        self.window.values().map(Vec::len).sum()
    }

    pub fn document_listener_count(&self) -> usize {
        self.document.values().map(Vec::len).sum()
    }

    /// Timers cleared since the snapshot was taken.
    pub fn timer_count(&self) -> usize {
        self.cleared_timers.len()
    }
}

/// Options for [`EffectTracker::release`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseOptions {
    pub clear_timers: bool,
}

pub struct EffectTracker {
    name: String,
    env: Env,
    clicks: Rc<ClickTable>,
    document: Rc<dyn DocumentEvents>,
    use_virtual_router: Cell<bool>,
    window_listeners: RefCell<ListenerTable>,
    document_listeners: RefCell<ListenerTable>,
    timers: Rc<RefCell<TimerTable>>,
    snapshot: RefCell<Option<EffectSnapshot>>,
}

fn find(table: &ListenerTable, event_type: &str, listener: &Listener) -> Option<usize> {
    table
        .get(event_type)
        .and_then(|list| list.iter().position(|b| b.original.ptr_eq(listener)))
}

impl EffectTracker {
    pub fn new(env: Env, name: &str, clicks: Rc<ClickTable>, document: Rc<dyn DocumentEvents>) -> Self {
        Self {
            name: name.to_string(),
            env,
            clicks,
            document,
            use_virtual_router: Cell::new(false),
            window_listeners: RefCell::new(BTreeMap::new()),
            document_listeners: RefCell::new(BTreeMap::new()),
            timers: Rc::new(RefCell::new(BTreeMap::new())),
            snapshot: RefCell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `popstate`/`hashchange` are namespaced for this guest.
    pub fn set_use_virtual_router(&self, on: bool) {
        self.use_virtual_router.set(on);
    }

    /// The event type actually bound on the shared window for `event_type`.
    pub fn real_event_type(&self, event_type: &str) -> String {
        let reserved = RESERVED_EVENTS.contains(&event_type)
            || (self.use_virtual_router.get() && ROUTER_EVENTS.contains(&event_type));
        if reserved {
            app_event_name(event_type, &self.name)
        } else {
            event_type.to_string()
        }
    }

    /// Wrap a guest listener so it runs with this guest marked current.
    fn wrap(&self, listener: &Listener) -> Listener {
        let env = Rc::downgrade(&self.env);
        let name = self.name.clone();
        let original = listener.clone();
        Listener::new(move |event| match env.upgrade() {
            Some(env) => {
                let _current = env.current_app().enter(&name);
                original.call(event)
            }
            None => original.call(event),
        })
    }

    // ---- window ----

    /// `window.addEventListener`. Returns false if already bound.
    pub fn add_window_listener(&self, event_type: &str, listener: Listener) -> bool {
        if find(&self.window_listeners.borrow(), event_type, &listener).is_some() {
            return false;
        }
        let real_type = self.real_event_type(event_type);
        let wrapped = self.wrap(&listener);
        self.env.add_window_listener(&real_type, wrapped.clone());
        self.window_listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(BoundListener {
                real_type,
                original: listener,
                wrapped,
            });
        true
    }

    /// `window.removeEventListener`.
    pub fn remove_window_listener(&self, event_type: &str, listener: &Listener) -> bool {
        let mut table = self.window_listeners.borrow_mut();
        let Some(pos) = find(&table, event_type, listener) else {
            return false;
        };
        let Some(list) = table.get_mut(event_type) else {
            return false;
        };
        let bound = list.remove(pos);
        self.env.remove_window_listener(&bound.real_type, &bound.wrapped);
        true
    }

    // ---- document ----

    /// `document.addEventListener`.
    pub fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool {
        if find(&self.document_listeners.borrow(), event_type, &listener).is_some() {
            return false;
        }
        let wrapped = self.wrap(&listener);
        self.document.add_document_listener(event_type, wrapped.clone());
        self.document_listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(BoundListener {
                real_type: event_type.to_string(),
                original: listener,
                wrapped,
            });
        true
    }

    /// `document.removeEventListener`.
    pub fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool {
        let mut table = self.document_listeners.borrow_mut();
        let Some(pos) = find(&table, event_type, listener) else {
            return false;
        };
        let Some(list) = table.get_mut(event_type) else {
            return false;
        };
        let bound = list.remove(pos);
        self.document.remove_document_listener(&bound.real_type, &bound.wrapped);
        true
    }

    /// `document.onclick = handler`.
    pub fn set_onclick(&self, handler: Option<Function>) {
        self.clicks.set(&self.name, handler);
    }

    /// `document.onclick`.
    pub fn onclick(&self) -> Value {
        self.clicks.get(&self.name)
    }

    // ---- timers ----

    /// Schedule `record` on the event loop. A fresh timer is keyed by its
    /// first event-loop id; a recreated one keeps `guest_id`.
    fn schedule(&self, guest_id: Option<TimerId>, record: TimerRecord) -> TimerId {
        let env = Rc::downgrade(&self.env);
        let timers = Rc::clone(&self.timers);
        let name = self.name.clone();
        let kind = record.kind;
        let key = Rc::new(Cell::new(guest_id.unwrap_or_default()));
        let fired_key = Rc::clone(&key);
        let cb = Rc::clone(&record.callback);
        let fire = move || {
            if kind == TimerKind::Timeout {
                timers.borrow_mut().remove(&fired_key.get());
            }
            match env.upgrade() {
                Some(env) => {
                    let _current = env.current_app().enter(&name);
                    cb();
                }
                None => cb(),
            }
        };
        let loop_id = match kind {
            TimerKind::Timeout => self.env.event_loop().set_timeout(record.delay, fire),
            TimerKind::Interval => self.env.event_loop().set_interval(record.delay, fire),
        };
        let id = guest_id.unwrap_or(loop_id);
        key.set(id);
        self.timers.borrow_mut().insert(id, LiveTimer { record, loop_id });
        id
    }

    fn add_timer(&self, kind: TimerKind, delay: u64, callback: TimerCallback) -> TimerId {
        self.schedule(None, TimerRecord { kind, delay, callback })
    }

    /// `setTimeout`.
    pub fn set_timeout(&self, delay: u64, callback: TimerCallback) -> TimerId {
        self.add_timer(TimerKind::Timeout, delay, callback)
    }

    /// `setInterval`.
    pub fn set_interval(&self, delay: u64, callback: TimerCallback) -> TimerId {
        self.add_timer(TimerKind::Interval, delay, callback)
    }

    /// `clearTimeout` / `clearInterval`. `id` is the id the guest was given.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        if let Some(snapshot) = self.snapshot.borrow_mut().as_mut() {
            snapshot.cleared_timers.remove(&id);
        }
        let live = self.timers.borrow_mut().remove(&id);
        match live {
            Some(live) => self.env.event_loop().clear_timer(live.loop_id),
            None => false,
        }
    }

    // ---- inspection ----

    pub fn window_listener_count(&self) -> usize {
        self.window_listeners.borrow().values().map(Vec::len).sum()
    }

    pub fn document_listener_count(&self) -> usize {
        self.document_listeners.borrow().values().map(Vec::len).sum()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn snapshot(&self) -> Option<EffectSnapshot> {
        self.snapshot.borrow().clone()
    }

    // ---- record / rebuild / release ----

    /// Snapshot current bindings, replacing any previous snapshot.
    pub fn record(&self) {
        let originals = |table: &ListenerTable| -> BTreeMap<String, Vec<Listener>> {
            table
                .iter()
                .filter(|(_, list)| !list.is_empty())
                .map(|(ty, list)| (ty.clone(), list.iter().map(|b| b.original.clone()).collect()))
                .collect()
        };
        let snapshot = EffectSnapshot {
            window: originals(&self.window_listeners.borrow()),
            document: originals(&self.document_listeners.borrow()),
            onclick: self.onclick().as_function().cloned(),
            cleared_timers: BTreeMap::new(),
        };
        debug!(
            app = %self.name,
            window = snapshot.window_listener_count(),
            document = snapshot.document_listener_count(),
            timers = self.timer_count(),
            "recorded effect snapshot"
        );
        *self.snapshot.borrow_mut() = Some(snapshot);
    }

    /// Drop a pending snapshot without reattaching it.
    pub fn discard_snapshot(&self) {
        self.snapshot.borrow_mut().take();
    }

    /// Reattach the recorded snapshot and clear it.
    ///
    /// Listeners still bound are not bound twice. Only timers that
    /// [`release`](Self::release) cleared after the snapshot are recreated,
    /// under the ids the guest already holds.
    pub fn rebuild(&self) {
        let Some(snapshot) = self.snapshot.borrow_mut().take() else {
            return;
        };
        for (ty, listeners) in snapshot.window {
            for listener in listeners {
                self.add_window_listener(&ty, listener);
            }
        }
        for (ty, listeners) in snapshot.document {
            for listener in listeners {
                self.add_document_listener(&ty, listener);
            }
        }
        if let Some(handler) = snapshot.onclick {
            if self.onclick().as_function().is_none() {
                self.set_onclick(Some(handler));
            }
        }
        for (id, record) in snapshot.cleared_timers {
            self.schedule(Some(id), record);
        }
        debug!(app = %self.name, "rebuilt effect snapshot");
    }

    /// Unbind every listener; clear timers when asked. Cleared timers are
    /// remembered by a pending snapshot so [`rebuild`](Self::rebuild) can
    /// bring them back.
    pub fn release(&self, opts: ReleaseOptions) {
        let window = std::mem::take(&mut *self.window_listeners.borrow_mut());
        for bound in window.into_values().flatten() {
            self.env.remove_window_listener(&bound.real_type, &bound.wrapped);
        }
        let document = std::mem::take(&mut *self.document_listeners.borrow_mut());
        for bound in document.into_values().flatten() {
            self.document.remove_document_listener(&bound.real_type, &bound.wrapped);
        }
        self.clicks.remove(&self.name);
        if opts.clear_timers {
            let timers = std::mem::take(&mut *self.timers.borrow_mut());
            let mut snapshot = self.snapshot.borrow_mut();
            for (id, live) in timers {
                self.env.event_loop().clear_timer(live.loop_id);
                if let Some(snapshot) = snapshot.as_mut() {
                    snapshot.cleared_timers.insert(id, live.record);
                }
            }
        }
        debug!(app = %self.name, clear_timers = opts.clear_timers, "released effects");
    }
}
