//! Name to instance table.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::controller::AppLifecycleController;
use crate::instance::InstanceId;

/// Every non-destroyed guest, by name.
#[derive(Default)]
pub struct Registry {
    apps: RefCell<BTreeMap<String, Rc<AppLifecycleController>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Rc<AppLifecycleController>> {
        self.apps.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.borrow().contains_key(name)
    }

    /// Insert `app`, returning whatever held its name before.
    pub fn insert(&self, app: Rc<AppLifecycleController>) -> Option<Rc<AppLifecycleController>> {
        self.apps.borrow_mut().insert(app.name().to_string(), app)
    }

    /// Remove `name` if it still maps to instance `id`.
    pub fn remove(&self, name: &str, id: InstanceId) -> bool {
        let mut apps = self.apps.borrow_mut();
        if apps.get(name).is_some_and(|app| app.instance().id() == id) {
            apps.remove(name);
            return true;
        }
        false
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.borrow().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Rc<AppLifecycleController>> {
        self.apps.borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.borrow().is_empty()
    }
}
