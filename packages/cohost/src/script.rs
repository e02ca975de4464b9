//! Script execution seam.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cohost_env::Thrown;

use crate::loader::ScriptRecord;
use crate::scope::GuestScope;

/// Executes one guest script against the guest's scope.
pub trait ScriptRunner {
    fn run(&self, script: &ScriptRecord, scope: &mut GuestScope) -> Result<(), Thrown>;
}

/// Guest code written as a native closure.
pub type ScriptFn = Rc<dyn Fn(&mut GuestScope) -> Result<(), Thrown>>;

/// Runs scripts by looking their id up in a table of closures.
#[derive(Default)]
pub struct NativeScriptRunner {
    scripts: RefCell<BTreeMap<String, ScriptFn>>,
    runs: RefCell<BTreeMap<String, usize>>,
}

impl NativeScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, script: impl Fn(&mut GuestScope) -> Result<(), Thrown> + 'static) {
        self.scripts.borrow_mut().insert(id.to_string(), Rc::new(script));
    }

    /// How many times the script `id` ran.
    pub fn run_count(&self, id: &str) -> usize {
        self.runs.borrow().get(id).copied().unwrap_or(0)
    }
}

impl ScriptRunner for NativeScriptRunner {
    fn run(&self, script: &ScriptRecord, scope: &mut GuestScope) -> Result<(), Thrown> {
        let Some(f) = self.scripts.borrow().get(&script.id).cloned() else {
            return Err(Thrown::new(format!("script '{}' is not registered", script.id)));
        };
        *self.runs.borrow_mut().entry(script.id.clone()).or_default() += 1;
        f(scope)
    }
}
