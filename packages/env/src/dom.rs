//! A minimal DOM: an arena of element and text nodes.
//!
//! Nodes are never freed; detaching a subtree leaves it in the arena so it
//! can be transplanted later (keep-alive holders, pre-render placeholders).

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, Result};

/// Handle to a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node holds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    owner_app: Option<String>,
}

/// Hook run on every element created through [`Document::create_element`].
pub type CreationHook = Rc<dyn Fn(&mut Document, NodeId)>;

/// Declarative description of a subtree, used for guest templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    /// An element spec.
    pub fn element(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            text: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// A text spec.
    pub fn text(text: &str) -> Self {
        Self {
            tag: None,
            text: Some(text.to_string()),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a child.
    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// The document tree.
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    creation_hook: Option<CreationHook>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document with `html`, `head` and `body`.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            creation_hook: None,
        };
        let root = doc.alloc(NodeKind::Element {
            tag: "html".to_string(),
            attrs: BTreeMap::new(),
        });
        let head = doc.alloc(NodeKind::Element {
            tag: "head".to_string(),
            attrs: BTreeMap::new(),
        });
        let body = doc.alloc(NodeKind::Element {
            tag: "body".to_string(),
            attrs: BTreeMap::new(),
        });
        doc.root = root;
        doc.head = head;
        doc.body = body;
        doc.link(root, head);
        doc.link(root, body);
        doc
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            owner_app: None,
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(EnvError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(EnvError::NodeNotFound(id))
    }

    /// The `html` element.
    pub fn document_element(&self) -> NodeId {
        self.root
    }

    /// The `head` element.
    pub fn head(&self) -> NodeId {
        self.head
    }

    /// The `body` element.
    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Install or clear the element creation hook.
    pub fn set_creation_hook(&mut self, hook: Option<CreationHook>) {
        self.creation_hook = hook;
    }

    /// Whether a creation hook is installed.
    pub fn has_creation_hook(&self) -> bool {
        self.creation_hook.is_some()
    }

    /// Create a detached element, running the creation hook.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = self.alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
        });
        if let Some(hook) = self.creation_hook.clone() {
            hook(self, id);
        }
        id
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    /// Build a detached subtree from a spec, bypassing the creation hook.
    pub fn build(&mut self, spec: &NodeSpec) -> NodeId {
        let id = match (&spec.tag, &spec.text) {
            (Some(tag), _) => self.alloc(NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
                attrs: spec.attrs.clone(),
            }),
            (None, text) => self.alloc(NodeKind::Text(text.clone().unwrap_or_default())),
        };
        for child in &spec.children {
            let c = self.build(child);
            self.link(id, c);
        }
        id
    }

    /// Node kind.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    /// Tag name of an element, `None` for text nodes.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Element { tag, .. }) => Some(tag),
            _ => None,
        }
    }

    /// Read an attribute.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Write an attribute. Ignored on text nodes.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        if let NodeKind::Element { attrs, .. } = &mut self.node_mut(id)?.kind {
            attrs.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Remove an attribute.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<()> {
        if let NodeKind::Element { attrs, .. } = &mut self.node_mut(id)?.kind {
            attrs.remove(name);
        }
        Ok(())
    }

    /// The guest that created this node, if any.
    pub fn owner_app(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).and_then(|n| n.owner_app.as_deref())
    }

    /// Tag a node with its owning guest.
    pub fn set_owner_app(&mut self, id: NodeId, app: Option<&str>) -> Result<()> {
        self.node_mut(id)?.owner_app = app.map(str::to_string);
        Ok(())
    }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Children of a node.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `node` is `ancestor` or lies beneath it.
    pub fn is_inclusive_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Whether a node is attached to the document tree.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.is_inclusive_descendant(id, self.root)
    }

    /// Detach a node from its parent.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node(id)?.parent;
        if let Some(p) = parent {
            self.nodes[p.0].children.retain(|c| *c != id);
            self.nodes[id.0].parent = None;
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`, moving it if attached.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.node(parent)?;
        self.node(child)?;
        if self.is_inclusive_descendant(parent, child) {
            return Err(EnvError::Hierarchy { parent, child });
        }
        self.detach(child)?;
        self.link(parent, child);
        Ok(())
    }

    /// Remove a child from a parent.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(EnvError::NodeNotFound(child));
        }
        self.detach(child)
    }

    /// Move every child of `from` to the end of `to`, preserving order.
    pub fn move_children(&mut self, from: NodeId, to: NodeId) -> Result<usize> {
        let children = self.node(from)?.children.clone();
        for child in &children {
            self.append_child(to, *child)?;
        }
        Ok(children.len())
    }

    /// Detach every child of a node.
    pub fn clear_children(&mut self, id: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        Ok(())
    }

    /// Deep-copy a subtree. The copy is detached and keeps owner tags.
    pub fn clone_subtree(&mut self, id: NodeId) -> Result<NodeId> {
        let node = self.node(id)?.clone();
        let copy = self.alloc(node.kind.clone());
        self.nodes[copy.0].owner_app = node.owner_app.clone();
        for child in node.children {
            let c = self.clone_subtree(child)?;
            self.link(copy, c);
        }
        Ok(copy)
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.nodes.get(id.0) {
            Some(Node {
                kind: NodeKind::Text(t),
                ..
            }) => out.push_str(t),
            Some(node) => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
            None => {}
        }
    }

    /// Serialize the children of a node as markup.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (k, v) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", k, v));
                }
                out.push('>');
                for child in &node.children {
                    self.write_html(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    /// Descendants of `root` in document order, excluding `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// First element under `root` matching `selector`.
    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self
            .descendants(root)
            .into_iter()
            .find(|id| sel.matches(self, *id, root)))
    }

    /// All elements under `root` matching `selector`.
    pub fn query_selector_all(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self
            .descendants(root)
            .into_iter()
            .filter(|id| sel.matches(self, *id, root))
            .collect())
    }

    /// First element under `root` with the given id attribute.
    pub fn get_element_by_id(&self, root: NodeId, id: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|n| self.attr(*n, "id") == Some(id))
    }
}

/// A compound selector: `tag#id.class[attr=value]`.
#[derive(Debug, Default, Clone, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

/// Descendant-combinator chain of compounds.
#[derive(Debug, Clone, PartialEq)]
struct Selector {
    parts: Vec<Compound>,
}

impl Selector {
    fn parse(input: &str) -> Result<Self> {
        let parts = input
            .split_whitespace()
            .map(Compound::parse)
            .collect::<Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Err(EnvError::InvalidSelector(input.to_string()));
        }
        Ok(Self { parts })
    }

    /// Match `node` with ancestors confined to the subtree at `scope`.
    fn matches(&self, doc: &Document, node: NodeId, scope: NodeId) -> bool {
        let Some((last, rest)) = self.parts.split_last() else {
            return false;
        };
        if !last.matches(doc, node) {
            return false;
        }
        let mut cur = doc.parent(node);
        for part in rest.iter().rev() {
            loop {
                match cur {
                    Some(id) if id != scope => {
                        cur = doc.parent(id);
                        if part.matches(doc, id) {
                            break;
                        }
                    }
                    _ => return false,
                }
            }
        }
        true
    }
}

impl Compound {
    fn parse(input: &str) -> Result<Self> {
        let invalid = || EnvError::InvalidSelector(input.to_string());
        let mut out = Compound::default();
        let mut rest = input;

        let tag_end = rest.find(['#', '.', '[']).unwrap_or(rest.len());
        if tag_end > 0 {
            let tag = &rest[..tag_end];
            if tag != "*" {
                out.tag = Some(tag.to_ascii_lowercase());
            }
        }
        rest = &rest[tag_end..];

        while let Some(c) = rest.chars().next() {
            match c {
                '#' | '.' => {
                    let body = &rest[1..];
                    let end = body.find(['#', '.', '[']).unwrap_or(body.len());
                    if end == 0 {
                        return Err(invalid());
                    }
                    let name = body[..end].to_string();
                    if c == '#' {
                        out.id = Some(name);
                    } else {
                        out.classes.push(name);
                    }
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']').ok_or_else(invalid)?;
                    let inner = &rest[1..close];
                    let attr = match inner.split_once('=') {
                        Some((k, v)) => (
                            k.trim().to_string(),
                            Some(v.trim().trim_matches(['"', '\'']).to_string()),
                        ),
                        None => (inner.trim().to_string(), None),
                    };
                    if attr.0.is_empty() {
                        return Err(invalid());
                    }
                    out.attrs.push(attr);
                    rest = &rest[close + 1..];
                }
                _ => return Err(invalid()),
            }
        }
        Ok(out)
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag(node) else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        if let Some(id) = &self.id {
            if doc.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = doc.attr(node, "class").unwrap_or("");
            let classes: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|(k, v)| match (doc.attr(node, k), v) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(doc: &mut Document) -> NodeId {
        let spec = NodeSpec::element("div")
            .attr("id", "root")
            .child(
                NodeSpec::element("ul")
                    .attr("class", "list main")
                    .child(NodeSpec::element("li").child(NodeSpec::text("one")))
                    .child(
                        NodeSpec::element("li")
                            .attr("data-x", "2")
                            .child(NodeSpec::text("two")),
                    ),
            )
            .child(NodeSpec::element("span").attr("id", "s"));
        let root = doc.build(&spec);
        let body = doc.body();
        doc.append_child(body, root).unwrap();
        root
    }

    #[test]
    fn new_document_has_head_and_body() {
        let doc = Document::new();
        assert_eq!(doc.tag(doc.head()), Some("head"));
        assert_eq!(doc.tag(doc.body()), Some("body"));
        assert!(doc.is_connected(doc.body()));
    }

    #[test]
    fn query_selector_variants() {
        let mut doc = Document::new();
        let root = sample(&mut doc);
        let ul = doc.query_selector(root, "ul.list").unwrap().unwrap();
        assert_eq!(doc.tag(ul), Some("ul"));
        assert_eq!(doc.query_selector_all(root, "li").unwrap().len(), 2);
        let li = doc.query_selector(root, "li[data-x=2]").unwrap().unwrap();
        assert_eq!(doc.text_content(li), "two");
        assert_eq!(doc.query_selector_all(root, "ul.main li").unwrap().len(), 2);
        assert!(doc.query_selector(root, "span li").unwrap().is_none());
        assert_eq!(doc.get_element_by_id(root, "s").map(|n| doc.tag(n)), Some(Some("span")));
    }

    #[test]
    fn invalid_selector() {
        let doc = Document::new();
        assert!(doc.query_selector(doc.body(), "div..x").is_err());
        assert!(doc.query_selector(doc.body(), "").is_err());
    }

    #[test]
    fn move_and_clone() {
        let mut doc = Document::new();
        let root = sample(&mut doc);
        let holder = doc.create_element("div");
        let before = doc.inner_html(root);
        let copy = doc.clone_subtree(root).unwrap();
        assert_eq!(doc.inner_html(copy), before);

        assert_eq!(doc.move_children(root, holder).unwrap(), 2);
        assert!(doc.children(root).is_empty());
        assert!(!doc.is_connected(holder));
        doc.move_children(holder, root).unwrap();
        assert_eq!(doc.inner_html(root), before);
    }

    #[test]
    fn append_rejects_cycles() {
        let mut doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        doc.append_child(a, b).unwrap();
        assert!(doc.append_child(b, a).is_err());
    }

    #[test]
    fn creation_hook_tags_elements() {
        let mut doc = Document::new();
        doc.set_creation_hook(Some(Rc::new(|doc: &mut Document, id| {
            doc.set_owner_app(id, Some("a")).unwrap();
        })));
        let el = doc.create_element("DIV");
        assert_eq!(doc.tag(el), Some("div"));
        assert_eq!(doc.owner_app(el), Some("a"));
        doc.set_creation_hook(None);
        let plain = doc.create_element("p");
        assert_eq!(doc.owner_app(plain), None);
    }
}
