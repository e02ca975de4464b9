//! State shared by the host and every controller.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use cohost_env::Env;
use cohost_sandbox::SandboxRealm;

use crate::config::StartOptions;
use crate::css::CssCache;
use crate::data::EventCenter;
use crate::loader::{SourceCache, SourceLoader};
use crate::registry::Registry;
use crate::script::ScriptRunner;

pub(crate) struct Runtime {
    pub(crate) env: Env,
    pub(crate) realm: Rc<SandboxRealm>,
    pub(crate) options: RefCell<StartOptions>,
    pub(crate) loader: Rc<dyn SourceLoader>,
    pub(crate) runner: Rc<dyn ScriptRunner>,
    pub(crate) css: CssCache,
    pub(crate) data: Rc<EventCenter>,
    pub(crate) sources: SourceCache,
    /// The registry owns the controllers, so this side is weak.
    pub(crate) registry: Weak<Registry>,
}
