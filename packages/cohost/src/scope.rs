//! What guest code sees while it runs.
//!
//! A [`GuestScope`] routes a guest's global reads and writes, listener
//! bindings and timers through its sandbox when it has one, or straight to
//! the shared environment when sandboxing is disabled. It is cheap to clone
//! so guest callbacks can keep one.

use std::rc::Rc;

use cohost_env::{CurrentAppGuard, Env, Function, Listener, PropertyDescriptor, Thrown, TimerId, Value};
use cohost_router::GuestHistory;
use cohost_sandbox::{GlobalScopeSandbox, IsolatedDocumentView, SandboxRealm};

use crate::data::GuestData;

/// Execution flags a guest was mounted with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionFlags {
    pub inline: bool,
    pub fiber: bool,
    pub esmodule: bool,
}

#[derive(Clone)]
pub struct GuestScope {
    name: String,
    realm: Rc<SandboxRealm>,
    sandbox: Option<Rc<GlobalScopeSandbox>>,
    document: Rc<dyn IsolatedDocumentView>,
    history: Option<GuestHistory>,
    data: GuestData,
    flags: ExecutionFlags,
}

impl GuestScope {
    pub(crate) fn new(
        realm: Rc<SandboxRealm>,
        sandbox: Option<Rc<GlobalScopeSandbox>>,
        document: Rc<dyn IsolatedDocumentView>,
        history: Option<GuestHistory>,
        data: GuestData,
        flags: ExecutionFlags,
    ) -> Self {
        Self {
            name: data.app().to_string(),
            realm,
            sandbox,
            document,
            history,
            data,
            flags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ExecutionFlags {
        self.flags
    }

    fn env(&self) -> &Env {
        self.realm.env()
    }

    /// Mark this guest as current until the guard drops.
    pub fn enter(&self) -> CurrentAppGuard<'_> {
        self.env().current_app().enter(&self.name)
    }

    // ---- globals ----

    pub fn get(&self, key: &str) -> Value {
        match &self.sandbox {
            Some(sandbox) => sandbox.get(key),
            None => self.env().window().get(key).unwrap_or_default(),
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), Thrown> {
        let value = value.into();
        match &self.sandbox {
            Some(sandbox) => sandbox.set(key, value).map_err(Thrown::from),
            None => self.env().window_mut().set(key, value).map_err(Thrown::from),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.has(key),
            None => self.env().window().has_own(key),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, Thrown> {
        match &self.sandbox {
            Some(sandbox) => sandbox.delete(key).map_err(Thrown::from),
            None => self.env().window_mut().delete(key).map_err(Thrown::from),
        }
    }

    pub fn define_property(&self, key: &str, desc: PropertyDescriptor) -> Result<(), Thrown> {
        match &self.sandbox {
            Some(sandbox) => sandbox.define_property(key, desc).map_err(Thrown::from),
            None => self.env().window_mut().define_property(key, desc).map_err(Thrown::from),
        }
    }

    pub fn own_keys(&self) -> Vec<String> {
        match &self.sandbox {
            Some(sandbox) => sandbox.own_keys(),
            None => self.env().window().own_keys(),
        }
    }

    // ---- document, events, timers ----

    pub fn document(&self) -> &Rc<dyn IsolatedDocumentView> {
        &self.document
    }

    pub fn add_event_listener(&self, event_type: &str, listener: Listener) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().add_window_listener(event_type, listener),
            None => self.env().add_window_listener(event_type, listener),
        }
    }

    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().remove_window_listener(event_type, listener),
            None => self.env().remove_window_listener(event_type, listener),
        }
    }

    pub fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().add_document_listener(event_type, listener),
            None => self.document.add_document_listener(event_type, listener),
        }
    }

    pub fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().remove_document_listener(event_type, listener),
            None => self.document.remove_document_listener(event_type, listener),
        }
    }

    /// `document.onclick = handler`.
    pub fn set_onclick(&self, handler: Option<Function>) {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().set_onclick(handler),
            None => self.realm.clicks().set(&self.name, handler),
        }
    }

    pub fn set_timeout(&self, delay: u64, callback: impl Fn() + 'static) -> TimerId {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().set_timeout(delay, Rc::new(callback)),
            None => self.env().event_loop().set_timeout(delay, callback),
        }
    }

    pub fn set_interval(&self, delay: u64, callback: impl Fn() + 'static) -> TimerId {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().set_interval(delay, Rc::new(callback)),
            None => self.env().event_loop().set_interval(delay, callback),
        }
    }

    pub fn clear_timer(&self, id: TimerId) -> bool {
        match &self.sandbox {
            Some(sandbox) => sandbox.effects().clear_timer(id),
            None => self.env().event_loop().clear_timer(id),
        }
    }

    // ---- routing and data ----

    /// The guest's virtual history, when the virtual router is on.
    pub fn history(&self) -> Option<&GuestHistory> {
        self.history.as_ref()
    }

    pub fn data(&self) -> &GuestData {
        &self.data
    }
}
