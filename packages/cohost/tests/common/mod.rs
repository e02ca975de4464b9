#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cohost::{
    AppAttributes, Host, LifecycleEvent, Lifecycles, MemoryLoader, NativeScriptRunner, ScriptRecord, SourceBundle,
    StartOptions,
};
use cohost_env::{Env, Function, NodeId, NodeSpec, SharedEnvironment, Value};

pub const A_URL: &str = "https://cdn.test/a/";
pub const B_URL: &str = "https://cdn.test/b/";

pub struct Fixture {
    pub env: Env,
    pub host: Host,
    pub loader: Rc<MemoryLoader>,
    pub runner: Rc<NativeScriptRunner>,
    pub events: Rc<RefCell<Vec<String>>>,
}

/// A page with one root element, one stylesheet and one script `main`.
pub fn page() -> SourceBundle {
    SourceBundle::new()
        .with_body(NodeSpec::element("div").attr("id", "root").child(NodeSpec::text("hello")))
        .with_style("p { color: red }")
        .with_script(ScriptRecord::inline("main", ""))
}

pub fn fixture() -> Fixture {
    fixture_with(StartOptions::default())
}

/// A started host with `A_URL` and `B_URL` served. Every lifecycle event is
/// appended to `events` as `"<app>:<event>"`.
pub fn fixture_with(mut options: StartOptions) -> Fixture {
    let env = SharedEnvironment::new("https://host.test/").unwrap();
    let loader = Rc::new(MemoryLoader::new());
    loader.insert(A_URL, page());
    loader.insert(B_URL, page());
    let runner = Rc::new(NativeScriptRunner::new());
    runner.register("main", |_| Ok(()));

    let events = Rc::new(RefCell::new(Vec::new()));
    let mut lifecycles = Lifecycles::new();
    for event in [
        LifecycleEvent::Created,
        LifecycleEvent::BeforeMount,
        LifecycleEvent::Mounted,
        LifecycleEvent::Unmount,
        LifecycleEvent::Error,
        LifecycleEvent::BeforeShow,
        LifecycleEvent::AfterShow,
        LifecycleEvent::AfterHidden,
    ] {
        let log = Rc::clone(&events);
        lifecycles = lifecycles.on(event, move |ev| {
            let name = ev.detail.as_object().map(|d| d.get("name")).unwrap_or_default();
            log.borrow_mut()
                .push(format!("{}:{}", name.as_str().unwrap_or("?"), ev.event_type));
            Ok(())
        });
    }
    options.lifecycles = lifecycles;

    let host = Host::new(Rc::clone(&env), loader.clone(), runner.clone());
    host.start(options).unwrap();
    Fixture {
        env,
        host,
        loader,
        runner,
        events,
    }
}

impl Fixture {
    /// A fresh container attached to the page body.
    pub fn container(&self) -> NodeId {
        let mut doc = self.env.document_mut();
        let node = doc.create_element("micro-app");
        let body = doc.body();
        doc.append_child(body, node).unwrap();
        node
    }

    pub fn settle(&self) {
        self.env.event_loop().run_until_idle();
    }

    pub fn mount(&self, name: &str, url: &str) -> NodeId {
        self.mount_with(AppAttributes::new(name, url))
    }

    pub fn mount_with(&self, attrs: AppAttributes) -> NodeId {
        let container = self.container();
        self.host.register(&attrs, container).unwrap();
        self.settle();
        container
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn text(&self, node: NodeId) -> String {
        self.env.document().text_content(node)
    }

    pub fn child_count(&self, node: NodeId) -> usize {
        self.env.document().children(node).len()
    }
}

/// A function that counts its calls.
pub fn counter(name: &str) -> (Rc<Cell<usize>>, Function) {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    let f = Function::new(name, move |_| {
        c.set(c.get() + 1);
        Ok(Value::Undefined)
    });
    (count, f)
}
