//! The shared environment: one window, one document, one URL.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::warn;

use crate::cache::SharedEnvironmentCache;
use crate::current::CurrentApp;
use crate::dom::{Document, NodeId};
use crate::error::{Result, Thrown};
use crate::event_loop::EventLoop;
use crate::events::{dispatch_to, Event, EventTarget, Listener};
use crate::global::{GlobalObject, PropertyDescriptor};
use crate::history::BrowserHistory;
use crate::patch::PatchManager;
use crate::value::{Function, Object, Promise, Value};

/// Shared handle to the environment.
pub type Env = Rc<SharedEnvironment>;

/// A request issued through one of the request-issuing built-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Which built-in issued it (`fetch`, `XMLHttpRequest`, `EventSource`).
    pub via: String,
    /// The URL as received by the built-in.
    pub url: String,
}

/// The single real environment every guest ultimately runs inside.
pub struct SharedEnvironment {
    window: RefCell<GlobalObject>,
    window_events: RefCell<EventTarget>,
    document: RefCell<Document>,
    document_events: RefCell<EventTarget>,
    element_events: RefCell<BTreeMap<NodeId, EventTarget>>,
    history: RefCell<BrowserHistory>,
    event_loop: EventLoop,
    current_app: CurrentApp,
    patches: PatchManager,
    cache: SharedEnvironmentCache,
    network: Rc<RefCell<Vec<NetworkRequest>>>,
}

fn install_builtins(window: &mut GlobalObject, network: &Rc<RefCell<Vec<NetworkRequest>>>) -> Result<()> {
    let log = Rc::clone(network);
    let fetch = Function::new("fetch", move |args| {
        let url = args.first().and_then(Value::as_str).unwrap_or_default();
        log.borrow_mut().push(NetworkRequest {
            via: "fetch".to_string(),
            url: url.to_string(),
        });
        Ok(Value::Promise(Promise::resolved(Value::from(url))))
    });

    let log = Rc::clone(network);
    let xhr = Function::constructor("XMLHttpRequest", move |args| {
        let method = args.first().and_then(Value::as_str).unwrap_or("GET");
        let url = args.get(1).and_then(Value::as_str).unwrap_or_default();
        log.borrow_mut().push(NetworkRequest {
            via: "XMLHttpRequest".to_string(),
            url: url.to_string(),
        });
        let request = Object::new();
        request.set("method", method);
        request.set("url", url);
        Ok(Value::Object(request))
    });

    let log = Rc::clone(network);
    let event_source = Function::constructor("EventSource", move |args| {
        let url = args.first().and_then(Value::as_str).unwrap_or_default();
        log.borrow_mut().push(NetworkRequest {
            via: "EventSource".to_string(),
            url: url.to_string(),
        });
        let source = Object::new();
        source.set("url", url);
        source.set("readyState", 1i64);
        let handle = source.clone();
        source.set(
            "close",
            Function::new("close", move |_| {
                handle.set("readyState", 2i64);
                Ok(Value::Undefined)
            }),
        );
        Ok(Value::Object(source))
    });

    window.define_property("fetch", PropertyDescriptor::data(fetch).enumerable(false))?;
    window.define_property("XMLHttpRequest", PropertyDescriptor::data(xhr).enumerable(false))?;
    window.define_property(
        "EventSource",
        PropertyDescriptor::data(event_source).enumerable(false),
    )?;
    window.define_property("Infinity", PropertyDescriptor::frozen(f64::INFINITY))?;
    window.define_property("NaN", PropertyDescriptor::frozen(f64::NAN))?;
    window.define_property("undefined", PropertyDescriptor::frozen(Value::Undefined))?;
    window.define_property("localStorage", PropertyDescriptor::data(Object::new()))?;
    window.define_property("sessionStorage", PropertyDescriptor::data(Object::new()))?;
    window.set("name", Value::from(""))?;
    Ok(())
}

impl SharedEnvironment {
    /// Create an environment whose browser URL starts at `href`.
    pub fn new(href: &str) -> Result<Env> {
        let network = Rc::new(RefCell::new(Vec::new()));
        let mut window = GlobalObject::new();
        install_builtins(&mut window, &network)?;
        let cache = SharedEnvironmentCache::capture(&window);
        Ok(Rc::new(Self {
            window: RefCell::new(window),
            window_events: RefCell::new(EventTarget::new()),
            document: RefCell::new(Document::new()),
            document_events: RefCell::new(EventTarget::new()),
            element_events: RefCell::new(BTreeMap::new()),
            history: RefCell::new(BrowserHistory::new(href)?),
            event_loop: EventLoop::new(),
            current_app: CurrentApp::new(),
            patches: PatchManager::new(),
            cache,
            network,
        }))
    }

    /// The shared global object.
    pub fn window(&self) -> Ref<'_, GlobalObject> {
        self.window.borrow()
    }

    /// Mutable access to the shared global object.
    pub fn window_mut(&self) -> RefMut<'_, GlobalObject> {
        self.window.borrow_mut()
    }

    /// The shared document.
    pub fn document(&self) -> Ref<'_, Document> {
        self.document.borrow()
    }

    /// Mutable access to the shared document.
    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.document.borrow_mut()
    }

    /// The browser history.
    pub fn history(&self) -> Ref<'_, BrowserHistory> {
        self.history.borrow()
    }

    /// Mutable access to the browser history.
    pub fn history_mut(&self) -> RefMut<'_, BrowserHistory> {
        self.history.borrow_mut()
    }

    /// The event loop.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// The current-guest marker.
    pub fn current_app(&self) -> &CurrentApp {
        &self.current_app
    }

    /// The patch manager.
    pub fn patches(&self) -> &PatchManager {
        &self.patches
    }

    /// Pristine built-ins.
    pub fn cache(&self) -> &SharedEnvironmentCache {
        &self.cache
    }

    /// Requests issued through the request-issuing built-ins.
    pub fn network_log(&self) -> Vec<NetworkRequest> {
        self.network.borrow().clone()
    }

    /// Bind a listener on the shared window.
    pub fn add_window_listener(&self, event_type: &str, listener: Listener) -> bool {
        self.window_events.borrow_mut().add(event_type, listener)
    }

    /// Unbind a listener from the shared window.
    pub fn remove_window_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.window_events.borrow_mut().remove(event_type, listener)
    }

    /// Number of window listeners for a type.
    pub fn window_listener_count(&self, event_type: &str) -> usize {
        self.window_events.borrow().count(event_type)
    }

    /// Total window listeners.
    pub fn window_listener_total(&self) -> usize {
        self.window_events.borrow().total()
    }

    /// Dispatch an event on the shared window.
    pub fn dispatch_window_event(&self, event: &Event) -> Vec<Thrown> {
        let listeners = self.window_events.borrow().listeners(&event.event_type);
        log_errors("window", event, dispatch_to(listeners, event))
    }

    /// Bind a listener on the shared document.
    pub fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool {
        self.document_events.borrow_mut().add(event_type, listener)
    }

    /// Unbind a listener from the shared document.
    pub fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.document_events.borrow_mut().remove(event_type, listener)
    }

    /// Number of document listeners for a type.
    pub fn document_listener_count(&self, event_type: &str) -> usize {
        self.document_events.borrow().count(event_type)
    }

    /// Total document listeners.
    pub fn document_listener_total(&self) -> usize {
        self.document_events.borrow().total()
    }

    /// Dispatch an event on the shared document.
    pub fn dispatch_document_event(&self, event: &Event) -> Vec<Thrown> {
        let listeners = self.document_events.borrow().listeners(&event.event_type);
        log_errors("document", event, dispatch_to(listeners, event))
    }

    /// Bind a listener on an element.
    pub fn add_element_listener(&self, node: NodeId, event_type: &str, listener: Listener) -> bool {
        self.element_events
            .borrow_mut()
            .entry(node)
            .or_default()
            .add(event_type, listener)
    }

    /// Unbind a listener from an element.
    pub fn remove_element_listener(&self, node: NodeId, event_type: &str, listener: &Listener) -> bool {
        self.element_events
            .borrow_mut()
            .get_mut(&node)
            .is_some_and(|t| t.remove(event_type, listener))
    }

    /// Dispatch an event on an element.
    pub fn dispatch_element_event(&self, node: NodeId, event: &Event) -> Vec<Thrown> {
        let listeners = self
            .element_events
            .borrow()
            .get(&node)
            .map(|t| t.listeners(&event.event_type))
            .unwrap_or_default();
        log_errors("element", event, dispatch_to(listeners, event))
    }

    /// Traverse the real history and fire `popstate` on the next macrotask.
    pub fn history_go(self: &Rc<Self>, delta: i64) {
        if !self.history.borrow_mut().traverse(delta) {
            return;
        }
        let weak = Rc::downgrade(self);
        self.event_loop.queue_task(move || {
            if let Some(env) = weak.upgrade() {
                let state = env.history().state();
                env.dispatch_window_event(&Event::with_detail("popstate", state));
            }
        });
    }
}

fn log_errors(target: &str, event: &Event, errors: Vec<Thrown>) -> Vec<Thrown> {
    for e in &errors {
        warn!(target_kind = target, event = %event.event_type, error = %e, "listener threw");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn builtins_are_installed_and_cached() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        assert!(env.window().get("fetch").unwrap().as_function().is_some());
        assert!(env.cache().raw("XMLHttpRequest").is_some());
        let infinity = env.window().get_own_property("Infinity").cloned().unwrap();
        assert!(!infinity.writable && !infinity.configurable);
    }

    #[test]
    fn fetch_is_logged() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let fetch = env.window().get("fetch").unwrap();
        fetch
            .as_function()
            .unwrap()
            .call(&[Value::from("https://api.test/x")])
            .unwrap();
        assert_eq!(env.network_log()[0].url, "https://api.test/x");
    }

    #[test]
    fn event_source_close_updates_state() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let ctor = env.window().get("EventSource").unwrap();
        let source = ctor.as_function().unwrap().call(&[Value::from("/s")]).unwrap();
        let source = source.as_object().unwrap().clone();
        source.call_method("close", &[]).unwrap();
        assert_eq!(source.get("readyState"), Value::from(2i64));
    }

    #[test]
    fn history_go_fires_popstate_asynchronously() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        env.history_mut().push_state(Value::from("one"), "/one").unwrap();
        env.history_mut().push_state(Value::Null, "/two").unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        env.add_window_listener(
            "popstate",
            Listener::new(move |e| {
                assert_eq!(e.detail, Value::from("one"));
                f.set(true);
                Ok(())
            }),
        );
        env.history_go(-1);
        assert!(!fired.get());
        env.event_loop().run_until_idle();
        assert!(fired.get());
        assert_eq!(env.history().url().path(), "/one");
    }

    #[test]
    fn element_events_are_per_node() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let a = env.document_mut().create_element("div");
        let b = env.document_mut().create_element("div");
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        env.add_element_listener(
            a,
            "mounted",
            Listener::new(move |_| {
                h.set(h.get() + 1);
                Ok(())
            }),
        );
        env.dispatch_element_event(b, &Event::new("mounted"));
        env.dispatch_element_event(a, &Event::new("mounted"));
        assert_eq!(hits.get(), 1);
    }
}
