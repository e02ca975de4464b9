mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cohost::{AppState, UnmountAppOptions, UMD_LIBRARY_PREFIX};
use cohost_env::{Function, Object, Promise, Resolver, Thrown, Value};

use common::{counter, fixture, Fixture, A_URL};

/// Register `main` so it exposes `mount`/`unmount` on the guest library.
fn expose(f: &Fixture, mount: Function, unmount: Function) {
    f.runner.register("main", move |scope| {
        let library = Object::new();
        library.set("mount", mount.clone());
        library.set("unmount", unmount.clone());
        scope.set(&format!("{UMD_LIBRARY_PREFIX}a"), library)
    });
}

#[test]
fn test_umd_remount_skips_scripts() {
    let f = fixture();
    let (mounts, mount) = counter("mount");
    let (unmounts, unmount) = counter("unmount");
    expose(&f, mount, unmount);

    f.mount("a", A_URL);
    let app = f.host.get_app("a").unwrap();
    assert_eq!(app.get_app_state(), AppState::Mounted);
    assert!(app.instance().umd_mode());
    assert_eq!((f.runner.run_count("main"), mounts.get(), unmounts.get()), (1, 1, 0));

    let container = app.container().unwrap();
    f.host.unmount_app("a", UnmountAppOptions::default());
    assert_eq!(unmounts.get(), 1);
    assert_eq!(app.get_app_state(), AppState::Unmount);
    // the container is reset to pristine markup, not emptied
    assert!(f.text(container).contains("hello"));
    // library survives for the next mount
    assert!(app.sandbox().unwrap().has(&format!("{UMD_LIBRARY_PREFIX}a")));

    f.mount("a", A_URL);
    assert_eq!(app.get_app_state(), AppState::Mounted);
    assert_eq!((f.runner.run_count("main"), mounts.get()), (1, 2));
}

#[test]
fn test_umd_mount_receives_latest_data() {
    let f = fixture();
    let seen = Rc::new(RefCell::new(Value::Undefined));
    let s = Rc::clone(&seen);
    let mount = Function::new("mount", move |args| {
        *s.borrow_mut() = args.first().cloned().unwrap_or_default();
        Ok(Value::Undefined)
    });
    let (_, unmount) = counter("unmount");
    expose(&f, mount, unmount);

    f.host
        .data()
        .set_data("a", collection_literals::btree! { "user".to_string() => Value::from("ada") });
    f.settle();
    f.mount("a", A_URL);

    let data = seen.borrow().as_object().cloned().expect("mount got data");
    assert_eq!(data.get("user"), Value::from("ada"));
}

#[test]
fn test_mounted_waits_for_returned_promise() {
    let f = fixture();
    let resolver: Rc<RefCell<Option<Resolver>>> = Rc::new(RefCell::new(None));
    let r = Rc::clone(&resolver);
    let mount = Function::new("mount", move |_| {
        let (promise, resolve) = Promise::pending();
        *r.borrow_mut() = Some(resolve);
        Ok(Value::Promise(promise))
    });
    let (_, unmount) = counter("unmount");
    expose(&f, mount, unmount);

    f.mount("a", A_URL);
    let app = f.host.get_app("a").unwrap();
    assert_eq!(app.get_app_state(), AppState::Mounting);
    assert!(!f.events().contains(&"a:mounted".to_string()));

    resolver.borrow().as_ref().unwrap().resolve(Value::Undefined);
    f.settle();
    assert_eq!(app.get_app_state(), AppState::Mounted);
    assert_eq!(f.events().last().map(String::as_str), Some("a:mounted"));
}

#[test]
fn test_throwing_hooks_are_isolated() {
    let f = fixture();
    let unmount_calls = Rc::new(Cell::new(0));
    let u = Rc::clone(&unmount_calls);
    let mount = Function::new("mount", |_| Err(Thrown::new("mount failed")));
    let unmount = Function::new("unmount", move |_| {
        u.set(u.get() + 1);
        Err(Thrown::new("unmount failed"))
    });
    expose(&f, mount, unmount);

    f.mount("a", A_URL);
    let app = f.host.get_app("a").unwrap();
    assert_eq!(app.get_app_state(), AppState::Mounted);

    let outcome = f.host.unmount_app("a", UnmountAppOptions::default()).outcome();
    assert_eq!(outcome, Some(Ok(Value::from(true))));
    assert_eq!(unmount_calls.get(), 1);
    assert_eq!(app.get_app_state(), AppState::Unmount);
    assert_eq!(f.events().last().map(String::as_str), Some("a:unmount"));
}

#[test]
fn test_destroying_umd_guest_drops_library() {
    let f = fixture();
    let (_, mount) = counter("mount");
    let (_, unmount) = counter("unmount");
    expose(&f, mount, unmount);
    f.mount("a", A_URL);
    let app = f.host.get_app("a").unwrap();
    let container = app.container().unwrap();

    f.host.unmount_app(
        "a",
        UnmountAppOptions {
            destroy: true,
            ..Default::default()
        },
    );
    assert!(!app.sandbox().unwrap().has(&format!("{UMD_LIBRARY_PREFIX}a")));
    assert_eq!(f.child_count(container), 0);
    assert!(f.host.get_app("a").is_none());
}
