//! `document.onclick` multiplexing.
//!
//! The shared document only ever gets one real click listener. Guests assign
//! handlers into a table keyed by guest name; the real listener calls the
//! handler belonging to whichever guest is current at dispatch time.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cohost_env::{Env, Function, Listener, Value};
use tracing::debug;

pub struct ClickTable {
    env: Env,
    handlers: RefCell<BTreeMap<String, Function>>,
    listener: RefCell<Option<Listener>>,
}

impl ClickTable {
    pub fn new(env: Env) -> Rc<Self> {
        Rc::new(Self {
            env,
            handlers: RefCell::new(BTreeMap::new()),
            listener: RefCell::new(None),
        })
    }

    fn ensure_bound(self: &Rc<Self>) {
        if self.listener.borrow().is_some() {
            return;
        }
        let weak = Rc::downgrade(self);
        let listener = Listener::new(move |event| {
            let Some(table) = weak.upgrade() else {
                return Ok(());
            };
            let Some(app) = table.env.current_app().name() else {
                return Ok(());
            };
            let handler = table.handlers.borrow().get(&app).cloned();
            if let Some(handler) = handler {
                handler.call(&[event.detail.clone()])?;
            }
            Ok(())
        });
        self.env.add_document_listener("click", listener.clone());
        *self.listener.borrow_mut() = Some(listener);
        debug!("bound shared document click listener");
    }

    /// Assign (or clear, with `None`) guest `app`'s handler.
    pub fn set(self: &Rc<Self>, app: &str, handler: Option<Function>) {
        match handler {
            Some(f) => {
                self.ensure_bound();
                self.handlers.borrow_mut().insert(app.to_string(), f);
            }
            None => {
                self.handlers.borrow_mut().remove(app);
            }
        }
    }

    /// Guest `app`'s handler, as a guest would read `document.onclick`.
    pub fn get(&self, app: &str) -> Value {
        self.handlers
            .borrow()
            .get(app)
            .cloned()
            .map(Value::Function)
            .unwrap_or(Value::Null)
    }

    pub fn remove(&self, app: &str) -> bool {
        self.handlers.borrow_mut().remove(app).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_env::{Event, SharedEnvironment};
    use std::cell::Cell;

    fn counter(hits: &Rc<Cell<u32>>) -> Function {
        let h = Rc::clone(hits);
        Function::new("onclick", move |_| {
            h.set(h.get() + 1);
            Ok(Value::Undefined)
        })
    }

    #[test]
    fn dispatches_to_current_guest_only() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let table = ClickTable::new(Rc::clone(&env));
        let a = Rc::new(Cell::new(0));
        let b = Rc::new(Cell::new(0));
        table.set("a", Some(counter(&a)));
        table.set("b", Some(counter(&b)));
        assert_eq!(env.document_listener_count("click"), 1);

        {
            let _guard = env.current_app().enter("a");
            env.dispatch_document_event(&Event::new("click"));
        }
        assert_eq!((a.get(), b.get()), (1, 0));

        env.dispatch_document_event(&Event::new("click"));
        assert_eq!((a.get(), b.get()), (1, 0));
    }

    #[test]
    fn clearing_handler_reads_null() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let table = ClickTable::new(env);
        let hits = Rc::new(Cell::new(0));
        table.set("a", Some(counter(&hits)));
        assert!(table.get("a").as_function().is_some());
        table.set("a", None);
        assert_eq!(table.get("a"), Value::Null);
        assert!(table.is_empty());
    }
}
