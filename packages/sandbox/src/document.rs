//! Per-guest views of the shared document.
//!
//! A guest's element creation and queries are confined to its mounted
//! container. Two realizations exist: [`ScopedDocument`] intercepts calls on
//! the shared document itself, [`NestedContextDocument`] gives the guest a
//! private document event target as a nested browsing context would, while
//! still rendering into the shared tree.

use std::cell::{Cell, RefCell};

use cohost_env::{Env, Event, EventTarget, Listener, NodeId, Thrown};

use crate::error::Result;

/// Tag of the element standing in for `<head>` inside a container.
pub const HEAD_TAG: &str = "micro-app-head";
/// Tag of the element standing in for `<body>` inside a container.
pub const BODY_TAG: &str = "micro-app-body";

/// Where document-level listeners registered by a guest end up.
pub trait DocumentEvents {
    fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool;
    fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool;
    fn dispatch_document_event(&self, event: &Event) -> Vec<Thrown>;
}

/// Which realization a view is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentMode {
    Scoped,
    NestedContext,
}

/// A guest's view of the document.
pub trait IsolatedDocumentView: DocumentEvents {
    fn mode(&self) -> DocumentMode;
    fn app_name(&self) -> &str;
    fn env(&self) -> &Env;
    fn container(&self) -> Option<NodeId>;
    fn set_container(&self, container: Option<NodeId>);

    /// Create an element owned by this guest.
    fn create_element(&self, tag: &str) -> Result<NodeId> {
        let env = self.env();
        let _current = env.current_app().enter(self.app_name());
        let mut doc = env.document_mut();
        let id = doc.create_element(tag);
        doc.set_owner_app(id, Some(self.app_name()))?;
        Ok(id)
    }

    fn create_text(&self, text: &str) -> NodeId {
        self.env().document_mut().create_text(text)
    }

    /// The container's head stand-in.
    fn head(&self) -> Option<NodeId> {
        self.child_with_tag(HEAD_TAG)
    }

    /// The container's body stand-in.
    fn body(&self) -> Option<NodeId> {
        self.child_with_tag(BODY_TAG)
    }

    #[doc(hidden)]
    fn child_with_tag(&self, tag: &str) -> Option<NodeId> {
        let root = self.container()?;
        let doc = self.env().document();
        let found = doc.children(root).iter().copied().find(|&c| doc.tag(c) == Some(tag));
        found
    }

    /// `querySelector`, confined to the container. `head` and `body` resolve
    /// to the container's stand-ins.
    fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        match selector.trim() {
            "head" => return Ok(self.head()),
            "body" => return Ok(self.body()),
            _ => {}
        }
        let Some(root) = self.container() else {
            return Ok(None);
        };
        Ok(self.env().document().query_selector(root, selector)?)
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        match selector.trim() {
            "head" => return Ok(self.head().into_iter().collect()),
            "body" => return Ok(self.body().into_iter().collect()),
            _ => {}
        }
        let Some(root) = self.container() else {
            return Ok(Vec::new());
        };
        Ok(self.env().document().query_selector_all(root, selector)?)
    }

    fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let root = self.container()?;
        self.env().document().get_element_by_id(root, id)
    }

    fn get_elements_by_tag_name(&self, tag: &str) -> Result<Vec<NodeId>> {
        self.query_selector_all(tag)
    }

    fn get_elements_by_class_name(&self, class: &str) -> Result<Vec<NodeId>> {
        self.query_selector_all(&format!(".{class}"))
    }

    /// Append `child` to the container's body stand-in (or the container).
    fn append_to_body(&self, child: NodeId) -> Result<()> {
        let Some(target) = self.body().or_else(|| self.container()) else {
            return Ok(());
        };
        self.env().document_mut().append_child(target, child)?;
        Ok(())
    }
}

/// Same-document realization: listeners go on the shared document.
pub struct ScopedDocument {
    env: Env,
    name: String,
    container: Cell<Option<NodeId>>,
}

impl ScopedDocument {
    pub fn new(env: Env, name: &str) -> Self {
        Self {
            env,
            name: name.to_string(),
            container: Cell::new(None),
        }
    }
}

impl DocumentEvents for ScopedDocument {
    fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool {
        self.env.add_document_listener(event_type, listener)
    }

    fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.env.remove_document_listener(event_type, listener)
    }

    fn dispatch_document_event(&self, event: &Event) -> Vec<Thrown> {
        self.env.dispatch_document_event(event)
    }
}

impl IsolatedDocumentView for ScopedDocument {
    fn mode(&self) -> DocumentMode {
        DocumentMode::Scoped
    }

    fn app_name(&self) -> &str {
        &self.name
    }

    fn env(&self) -> &Env {
        &self.env
    }

    fn container(&self) -> Option<NodeId> {
        self.container.get()
    }

    fn set_container(&self, container: Option<NodeId>) {
        self.container.set(container);
    }
}

/// Nested-context realization: the guest's document events stay private.
pub struct NestedContextDocument {
    env: Env,
    name: String,
    container: Cell<Option<NodeId>>,
    events: RefCell<EventTarget>,
}

impl NestedContextDocument {
    pub fn new(env: Env, name: &str) -> Self {
        Self {
            env,
            name: name.to_string(),
            container: Cell::new(None),
            events: RefCell::new(EventTarget::new()),
        }
    }

    /// Number of listeners bound on the private document.
    pub fn listener_count(&self) -> usize {
        self.events.borrow().total()
    }
}

impl DocumentEvents for NestedContextDocument {
    fn add_document_listener(&self, event_type: &str, listener: Listener) -> bool {
        self.events.borrow_mut().add(event_type, listener)
    }

    fn remove_document_listener(&self, event_type: &str, listener: &Listener) -> bool {
        self.events.borrow_mut().remove(event_type, listener)
    }

    fn dispatch_document_event(&self, event: &Event) -> Vec<Thrown> {
        let listeners = self.events.borrow().listeners(&event.event_type);
        cohost_env::dispatch_to(listeners, event)
    }
}

impl IsolatedDocumentView for NestedContextDocument {
    fn mode(&self) -> DocumentMode {
        DocumentMode::NestedContext
    }

    fn app_name(&self) -> &str {
        &self.name
    }

    fn env(&self) -> &Env {
        &self.env
    }

    fn container(&self) -> Option<NodeId> {
        self.container.get()
    }

    fn set_container(&self, container: Option<NodeId>) {
        self.container.set(container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_env::{NodeSpec, SharedEnvironment};
    use std::rc::Rc;

    fn mounted(view: &dyn IsolatedDocumentView) {
        let env = view.env();
        let spec = NodeSpec::element("div")
            .child(NodeSpec::element(HEAD_TAG).child(NodeSpec::element("style").attr("id", "s")))
            .child(
                NodeSpec::element(BODY_TAG)
                    .child(NodeSpec::element("p").attr("id", "inner").attr("class", "x")),
            );
        let container = env.document_mut().build(&spec);
        let body = env.document().body();
        env.document_mut().append_child(body, container).unwrap();
        view.set_container(Some(container));
    }

    #[test]
    fn queries_are_confined_to_container() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let outside = env.document_mut().create_element("p");
        env.document_mut().set_attr(outside, "id", "outer").unwrap();
        let body = env.document().body();
        env.document_mut().append_child(body, outside).unwrap();

        let view = ScopedDocument::new(Rc::clone(&env), "a");
        mounted(&view);
        assert!(view.get_element_by_id("inner").is_some());
        assert!(view.get_element_by_id("outer").is_none());
        assert_eq!(view.query_selector_all("p").unwrap().len(), 1);
        assert_eq!(view.get_elements_by_class_name("x").unwrap().len(), 1);
    }

    #[test]
    fn head_and_body_map_to_stand_ins() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let view = ScopedDocument::new(Rc::clone(&env), "a");
        mounted(&view);
        let head = view.query_selector("head").unwrap().unwrap();
        assert_eq!(env.document().tag(head), Some(HEAD_TAG));
        assert_ne!(Some(head), Some(env.document().head()));
        let body = view.query_selector("body").unwrap().unwrap();
        assert_eq!(env.document().tag(body), Some(BODY_TAG));
    }

    #[test]
    fn created_elements_are_owned() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let view = ScopedDocument::new(Rc::clone(&env), "a");
        mounted(&view);
        let el = view.create_element("span").unwrap();
        assert_eq!(env.document().owner_app(el), Some("a"));
        view.append_to_body(el).unwrap();
        assert_eq!(env.document().parent(el), view.body());
    }

    #[test]
    fn no_container_sees_nothing() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let view = NestedContextDocument::new(env, "a");
        assert_eq!(view.query_selector("div").unwrap(), None);
        assert!(view.query_selector_all("div").unwrap().is_empty());
        assert_eq!(view.head(), None);
    }

    #[test]
    fn nested_context_keeps_document_events_private() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let view = NestedContextDocument::new(Rc::clone(&env), "a");
        let listener = Listener::new(|_| Ok(()));
        assert!(view.add_document_listener("keydown", listener.clone()));
        assert_eq!(env.document_listener_total(), 0);
        assert_eq!(view.listener_count(), 1);
        assert!(view.remove_document_listener("keydown", &listener));
        assert_eq!(view.mode(), DocumentMode::NestedContext);
    }
}
