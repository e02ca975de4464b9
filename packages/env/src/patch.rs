//! Reference-counted installation of shared-environment patches.
//!
//! Patches go in when the first sandbox starts and come out when the last
//! one stops, so overlapping guest lifetimes share one patched state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::environment::SharedEnvironment;

/// A reversible modification of the shared environment.
pub trait Patch {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Apply the patch.
    fn install(&self, env: &SharedEnvironment);

    /// Revert the patch.
    fn uninstall(&self, env: &SharedEnvironment);
}

/// Counts active sandboxes and toggles registered patches on 0↔1.
#[derive(Default)]
pub struct PatchManager {
    active: Cell<usize>,
    installed: Cell<bool>,
    patches: RefCell<Vec<Rc<dyn Patch>>>,
}

impl PatchManager {
    /// Create a manager with no patches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patch. If patches are currently installed it is applied
    /// immediately.
    pub fn register(&self, env: &SharedEnvironment, patch: Rc<dyn Patch>) {
        if self.patches.borrow().iter().any(|p| p.name() == patch.name()) {
            return;
        }
        if self.installed.get() {
            patch.install(env);
        }
        self.patches.borrow_mut().push(patch);
    }

    /// Count one more active sandbox. Returns true on the 0→1 transition.
    pub fn acquire(&self, env: &SharedEnvironment) -> bool {
        let count = self.active.get() + 1;
        self.active.set(count);
        if count == 1 && !self.installed.get() {
            let patches = self.patches.borrow().clone();
            for patch in &patches {
                debug!(patch = patch.name(), "installing shared patch");
                patch.install(env);
            }
            self.installed.set(true);
            return true;
        }
        false
    }

    /// Count one fewer active sandbox. Returns true on the 1→0 transition.
    pub fn release(&self, env: &SharedEnvironment) -> bool {
        let count = self.active.get();
        if count == 0 {
            return false;
        }
        self.active.set(count - 1);
        if count == 1 && self.installed.get() {
            let patches = self.patches.borrow().clone();
            for patch in patches.iter().rev() {
                debug!(patch = patch.name(), "uninstalling shared patch");
                patch.uninstall(env);
            }
            self.installed.set(false);
            return true;
        }
        false
    }

    /// Number of active sandboxes.
    pub fn active_count(&self) -> usize {
        self.active.get()
    }

    /// Whether patches are installed.
    pub fn is_installed(&self) -> bool {
        self.installed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flag {
        on: Cell<u32>,
        off: Cell<u32>,
    }

    impl Patch for Flag {
        fn name(&self) -> &str {
            "flag"
        }
        fn install(&self, _env: &SharedEnvironment) {
            self.on.set(self.on.get() + 1);
        }
        fn uninstall(&self, _env: &SharedEnvironment) {
            self.off.set(self.off.get() + 1);
        }
    }

    #[test]
    fn installs_on_first_and_uninstalls_on_last() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let flag = Rc::new(Flag {
            on: Cell::new(0),
            off: Cell::new(0),
        });
        let manager = PatchManager::new();
        manager.register(&env, flag.clone());

        assert!(manager.acquire(&env));
        assert!(!manager.acquire(&env));
        assert_eq!(flag.on.get(), 1);
        assert!(!manager.release(&env));
        assert_eq!(flag.off.get(), 0);
        assert!(manager.release(&env));
        assert_eq!(flag.off.get(), 1);
        assert!(!manager.release(&env));
        assert_eq!(manager.active_count(), 0);
    }
}
