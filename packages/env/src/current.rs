//! The "current guest" marker.
//!
//! Every entry into guest code pushes the guest's name and pops it on the
//! way out, so shared patches can attribute side effects without relying on
//! only one guest running at a time.

use std::cell::RefCell;
use std::rc::Rc;

/// Stack of guest names currently executing.
///
/// Clones share one stack, so a patch can hold its own handle.
#[derive(Debug, Default, Clone)]
pub struct CurrentApp {
    stack: Rc<RefCell<Vec<String>>>,
}

/// Pops the marker when dropped.
#[must_use = "the marker is popped as soon as the guard is dropped"]
pub struct CurrentAppGuard<'a> {
    owner: &'a CurrentApp,
}

impl CurrentApp {
    /// Create an empty marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `name` for the lifetime of the returned guard.
    pub fn enter(&self, name: &str) -> CurrentAppGuard<'_> {
        self.stack.borrow_mut().push(name.to_string());
        CurrentAppGuard { owner: self }
    }

    /// The innermost executing guest.
    pub fn name(&self) -> Option<String> {
        self.stack.borrow().last().cloned()
    }

    /// How many guest frames are active.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }
}

impl Drop for CurrentAppGuard<'_> {
    fn drop(&mut self) {
        self.owner.stack.borrow_mut().pop();
    }
}
