//! Patches applied to the shared document while any sandbox is active.

use std::rc::Rc;

use cohost_env::{CreationHook, Patch, SharedEnvironment};
use tracing::warn;

/// Tags every element created on the shared document with the guest that
/// was current when it was created.
pub struct OwnerTagPatch;

impl Patch for OwnerTagPatch {
    fn name(&self) -> &str {
        "owner-tag"
    }

    fn install(&self, env: &SharedEnvironment) {
        let current = env.current_app().clone();
        let hook: CreationHook = Rc::new(move |doc, id| {
            if let Some(app) = current.name() {
                if let Err(e) = doc.set_owner_app(id, Some(&app)) {
                    warn!(app = %app, error = %e, "could not tag created element");
                }
            }
        });
        env.document_mut().set_creation_hook(Some(hook));
    }

    fn uninstall(&self, env: &SharedEnvironment) {
        env.document_mut().set_creation_hook(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_created_while_patched_are_tagged() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        env.patches().register(&env, Rc::new(OwnerTagPatch));

        let before = {
            let _current = env.current_app().enter("a");
            env.document_mut().create_element("div")
        };
        assert_eq!(env.document().owner_app(before), None);

        env.patches().acquire(&env);
        let during = {
            let _current = env.current_app().enter("a");
            env.document_mut().create_element("div")
        };
        assert_eq!(env.document().owner_app(during), Some("a"));
        let host = env.document_mut().create_element("div");
        assert_eq!(env.document().owner_app(host), None);

        env.patches().release(&env);
        assert!(!env.document().has_creation_hook());
    }
}
