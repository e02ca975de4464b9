mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cohost::{AppAttributes, UnmountAppOptions};
use cohost_env::{Listener, Value};
use cohost_router::{encode, GuardScope, RouterError};

use common::{fixture, Fixture, A_URL};

fn query(f: &Fixture) -> String {
    f.env.history().url().query().unwrap_or_default().to_string()
}

#[test]
fn test_mount_attaches_guest_path() {
    let f = fixture();
    f.mount("a", A_URL);
    assert_eq!(query(&f), format!("app-a={}", encode("/a/")));
    assert_eq!(f.host.router().current("a").unwrap().full_path, "/a/");
}

#[test]
fn test_host_navigation_encodes_query_and_hash() {
    let f = fixture();
    f.mount("a", A_URL);
    f.host.router().push("a", "/x?y=1#z").unwrap();

    assert_eq!(query(&f), "app-a=%2Fx%3Fy%25M21%23z");
    let loc = f.host.router().location("a").unwrap();
    assert_eq!(loc.pathname, "/x");
    assert_eq!(loc.search, "?y=1");
    assert_eq!(loc.hash, "#z");
}

#[test]
fn test_guards_fire_in_order_and_skip_noops() {
    let f = fixture();
    f.mount("a", A_URL);
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = Rc::clone(&log);
    f.host.router().before_each(GuardScope::All, move |to, from| {
        l.borrow_mut().push(format!("all {} -> {}", from.full_path, to.full_path));
    });
    let l = Rc::clone(&log);
    f.host
        .router()
        .before_each(GuardScope::App("a".to_string()), move |to, _| {
            l.borrow_mut().push(format!("a {}", to.full_path));
        });

    f.host.router().push("a", "/next").unwrap();
    assert_eq!(*log.borrow(), vec!["all /a/ -> /next", "a /next"]);

    f.host.router().push("a", "/next").unwrap();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn test_guest_history_drives_url() {
    let f = fixture();
    f.runner.register("main", |scope| {
        let history = scope.history().expect("virtual router is on");
        history
            .push_state(Value::from("s"), Some("/page"))
            .map_err(|e| cohost_env::Thrown::new(e.to_string()))
    });
    f.mount("a", A_URL);
    assert_eq!(f.host.router().location("a").unwrap().pathname, "/page");
    assert_eq!(query(&f), format!("app-a={}", encode("/page")));
}

#[test]
fn test_guest_receives_namespaced_popstate() {
    let f = fixture();
    let pops = Rc::new(Cell::new(0));
    let p = Rc::clone(&pops);
    f.runner.register("main", move |scope| {
        let p = Rc::clone(&p);
        scope.add_event_listener(
            "popstate",
            Listener::new(move |_| {
                p.set(p.get() + 1);
                Ok(())
            }),
        );
        Ok(())
    });
    f.mount("a", A_URL);
    f.host.router().push("a", "/one").unwrap();
    assert_eq!(pops.get(), 1);
    assert_eq!(f.env.window_listener_count("popstate-a"), 1);

    f.host.router().push("a", "/two").unwrap();
    f.host.router().back();
    f.settle();
    assert_eq!(f.host.router().location("a").unwrap().pathname, "/one");
    assert_eq!(pops.get(), 3);
}

#[test]
fn test_keep_router_state_survives_unmount() {
    let f = fixture();
    let mut attrs = AppAttributes::new("a", A_URL);
    attrs.keep_router_state = Some(true);
    f.mount_with(attrs.clone());
    f.host.router().push("a", "/deep").unwrap();

    f.host.disconnect("a");
    assert!(f.host.router().has_route("a"));
    f.mount_with(attrs);
    assert_eq!(f.host.router().current("a").unwrap().full_path, "/deep");
}

#[test]
fn test_route_state_cleared_without_keep() {
    let f = fixture();
    f.mount("a", A_URL);
    f.host.router().push("a", "/deep").unwrap();
    f.host.unmount_app("a", UnmountAppOptions::default());
    assert!(!f.host.router().has_route("a"));
    assert!(!query(&f).contains("app-a="));

    f.mount("a", A_URL);
    assert_eq!(f.host.router().current("a").unwrap().full_path, "/a/");
}

#[test]
fn test_default_page_applies_on_first_mount() {
    let f = fixture();
    let mut attrs = AppAttributes::new("a", A_URL);
    attrs.default_page = Some("/welcome".to_string());
    f.mount_with(attrs);
    assert_eq!(f.host.router().current("a").unwrap().pathname, "/welcome");
}

#[test]
fn test_disabled_memory_router_leaves_url_alone() {
    let f = fixture();
    let had_history = Rc::new(Cell::new(true));
    let h = Rc::clone(&had_history);
    f.runner.register("main", move |scope| {
        h.set(scope.history().is_some());
        Ok(())
    });
    let mut attrs = AppAttributes::new("a", A_URL);
    attrs.disable_memory_router = Some(true);
    f.mount_with(attrs);

    assert!(!had_history.get());
    assert_eq!(query(&f), "");
    assert!(!f.host.router().has_route("a"));
}

#[test]
fn test_hidden_guest_cannot_be_navigated() {
    let f = fixture();
    let mut attrs = AppAttributes::new("a", A_URL);
    attrs.keep_alive = Some(true);
    f.mount_with(attrs);
    f.host.disconnect("a");

    let err = f.host.router().push("a", "/x").unwrap_err();
    assert!(matches!(err, RouterError::NotActive(_)));
}
