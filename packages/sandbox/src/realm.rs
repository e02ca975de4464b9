use std::rc::Rc;

use cohost_env::Env;
use cohost_router::VirtualRouter;

use crate::click::ClickTable;
use crate::patches::OwnerTagPatch;

/// State every sandbox of one host shares: the environment, the router,
/// the click table, and the registered shared patches.
pub struct SandboxRealm {
    env: Env,
    router: Rc<VirtualRouter>,
    clicks: Rc<ClickTable>,
}

impl SandboxRealm {
    pub fn new(env: Env) -> Rc<Self> {
        env.patches().register(&env, Rc::new(OwnerTagPatch));
        Rc::new(Self {
            router: VirtualRouter::new(Rc::clone(&env)),
            clicks: ClickTable::new(Rc::clone(&env)),
            env,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn router(&self) -> &Rc<VirtualRouter> {
        &self.router
    }

    pub fn clicks(&self) -> &Rc<ClickTable> {
        &self.clicks
    }
}
