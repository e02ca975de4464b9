//! Lifecycle events.
//!
//! Every event goes to the guest's container as an element event whose
//! detail carries the guest name, then to the matching host-wide hooks from
//! [`StartOptions::lifecycles`](crate::StartOptions::lifecycles).

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use cohost_env::{Env, Event, NodeId, Object, Thrown, Value};
use cohost_router::app_event_name;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Created,
    BeforeMount,
    Mounted,
    Unmount,
    Error,
    BeforeShow,
    AfterShow,
    AfterHidden,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Created => "created",
            LifecycleEvent::BeforeMount => "beforemount",
            LifecycleEvent::Mounted => "mounted",
            LifecycleEvent::Unmount => "unmount",
            LifecycleEvent::Error => "error",
            LifecycleEvent::BeforeShow => "beforeshow",
            LifecycleEvent::AfterShow => "aftershow",
            LifecycleEvent::AfterHidden => "afterhidden",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-wide lifecycle callback.
pub type LifecycleHook = Rc<dyn Fn(&Event) -> Result<(), Thrown>>;

/// Host-wide lifecycle callbacks by event.
#[derive(Clone, Default)]
pub struct Lifecycles {
    hooks: BTreeMap<LifecycleEvent, Vec<LifecycleHook>>,
}

impl Lifecycles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, event: LifecycleEvent, hook: impl Fn(&Event) -> Result<(), Thrown> + 'static) -> Self {
        self.hooks.entry(event).or_default().push(Rc::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn get(&self, event: LifecycleEvent) -> &[LifecycleHook] {
        self.hooks.get(&event).map(Vec::as_slice).unwrap_or_default()
    }
}

impl fmt::Debug for Lifecycles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(k, v)| (k.as_str(), v.len())))
            .finish()
    }
}

/// Dispatch `event` for `app` on `container` and to the host hooks.
pub(crate) fn dispatch_lifecycle(
    env: &Env,
    lifecycles: &Lifecycles,
    app: &str,
    container: Option<NodeId>,
    event: LifecycleEvent,
    error: Option<&str>,
) {
    let detail = Object::new();
    detail.set("name", app);
    if let Some(container) = container {
        detail.set("container", container.to_string());
    }
    if let Some(error) = error {
        detail.set("error", error);
    }
    let ev = Event::with_detail(event.as_str(), detail);
    debug!(app = %app, event = %event, "lifecycle");

    if let Some(container) = container {
        for thrown in env.dispatch_element_event(container, &ev) {
            warn!(error = %Error::hook(app, event.as_str(), &thrown), "lifecycle listener threw");
        }
    }
    for hook in lifecycles.get(event) {
        if let Err(thrown) = hook(&ev) {
            warn!(error = %Error::hook(app, event.as_str(), &thrown), "lifecycle hook threw");
        }
    }
}

/// Tell the guest its keep-alive visibility changed.
pub(crate) fn dispatch_app_state(env: &Env, app: &str, state: LifecycleEvent) {
    let detail = Object::new();
    detail.set("appState", state.as_str());
    let ev = Event::with_detail(app_event_name("appstate-change", app), Value::Object(detail));
    for thrown in env.dispatch_window_event(&ev) {
        warn!(error = %Error::hook(app, "appstate-change", &thrown), "guest listener threw");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_env::{Listener, SharedEnvironment};
    use std::cell::RefCell;

    #[test]
    fn lifecycle_reaches_container_and_hooks() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let container = env.document_mut().create_element("micro-app");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        env.add_element_listener(
            container,
            "mounted",
            Listener::new(move |e| {
                let name = e.detail.as_object().map(|o| o.get("name")).unwrap_or_default();
                s.borrow_mut().push(format!("element:{}", name.as_str().unwrap_or("")));
                Ok(())
            }),
        );
        let s = Rc::clone(&seen);
        let lifecycles = Lifecycles::new()
            .on(LifecycleEvent::Mounted, move |_| {
                s.borrow_mut().push("hook".to_string());
                Err(Thrown::new("ignored"))
            })
            .on(LifecycleEvent::Unmount, |_| Ok(()));

        dispatch_lifecycle(&env, &lifecycles, "a", Some(container), LifecycleEvent::Mounted, None);
        assert_eq!(*seen.borrow(), vec!["element:a".to_string(), "hook".to_string()]);
    }

    #[test]
    fn app_state_is_namespaced() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        env.add_window_listener(
            "appstate-change-a",
            Listener::new(move |e| {
                *s.borrow_mut() = e.detail.as_object().map(|o| o.get("appState"));
                Ok(())
            }),
        );
        dispatch_app_state(&env, "b", LifecycleEvent::AfterHidden);
        assert!(seen.borrow().is_none());
        dispatch_app_state(&env, "a", LifecycleEvent::AfterHidden);
        assert_eq!(*seen.borrow(), Some(Value::from("afterhidden")));
    }
}
