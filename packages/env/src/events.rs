//! Event targets, listeners and events.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::Thrown;
use crate::value::Value;

/// An event delivered to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub detail: Value,
}

impl Event {
    /// Create an event with no detail.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: Value::Undefined,
        }
    }

    /// Create an event carrying `detail`.
    pub fn with_detail(event_type: impl Into<String>, detail: impl Into<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            detail: detail.into(),
        }
    }
}

type ListenerFn = dyn Fn(&Event) -> Result<(), Thrown>;

/// A registered event callback.
///
/// Listeners compare by identity: adding the same listener twice for one
/// event type binds it once, and removal needs the same listener value.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerFn>,
}

impl Listener {
    /// Wrap a closure as a listener.
    pub fn new(f: impl Fn(&Event) -> Result<(), Thrown> + 'static) -> Self {
        Self { inner: Rc::new(f) }
    }

    /// Invoke the listener.
    pub fn call(&self, event: &Event) -> Result<(), Thrown> {
        (self.inner)(event)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Listener) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.inner) as *const ())
    }
}

/// A listener table keyed by event type.
#[derive(Clone, Debug, Default)]
pub struct EventTarget {
    listeners: BTreeMap<String, Vec<Listener>>,
}

impl EventTarget {
    /// Create an empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener. Returns false if it was already bound for this type.
    pub fn add(&mut self, event_type: &str, listener: Listener) -> bool {
        let list = self.listeners.entry(event_type.to_string()).or_default();
        if list.iter().any(|l| l.ptr_eq(&listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Unbind a listener. Returns true if it was bound.
    pub fn remove(&mut self, event_type: &str, listener: &Listener) -> bool {
        let Some(list) = self.listeners.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !l.ptr_eq(listener));
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(event_type);
        }
        removed
    }

    /// Whether the listener is bound for the type.
    pub fn contains(&self, event_type: &str, listener: &Listener) -> bool {
        self.listeners
            .get(event_type)
            .is_some_and(|list| list.iter().any(|l| l.ptr_eq(listener)))
    }

    /// Listeners currently bound for a type, in binding order.
    pub fn listeners(&self, event_type: &str) -> Vec<Listener> {
        self.listeners.get(event_type).cloned().unwrap_or_default()
    }

    /// Number of listeners for a type.
    pub fn count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).map_or(0, Vec::len)
    }

    /// Total listeners across all types.
    pub fn total(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    /// Event types with at least one listener.
    pub fn types(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}

/// Invoke `listeners` with `event`, collecting thrown errors.
///
/// Listeners are passed in by value so callers can release any borrow on
/// the owning target before guest code runs.
pub fn dispatch_to(listeners: Vec<Listener>, event: &Event) -> Vec<Thrown> {
    listeners
        .into_iter()
        .filter_map(|l| l.call(event).err())
        .collect()
}
