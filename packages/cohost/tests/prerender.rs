mod common;

use std::cell::Cell;
use std::rc::Rc;

use cohost::{ActiveAppsOptions, AppAttributes, AppState, PrefetchParam, UnmountAppOptions};
use cohost_env::{Event, Listener};

use common::{fixture, A_URL, B_URL};

#[test]
fn test_prefetch_loads_without_mounting() {
    let f = fixture();
    f.host
        .pre_fetch(&[PrefetchParam::new("a", A_URL), PrefetchParam::new("b", B_URL)])
        .unwrap();
    f.settle();

    let app = f.host.get_app("a").unwrap();
    assert_eq!(app.get_app_state(), AppState::Loaded);
    assert!(app.instance().is_prefetch());
    assert_eq!(f.runner.run_count("main"), 0);
    assert_eq!(f.loader.request_count(), 2);
    assert!(f.host.get_active_apps(ActiveAppsOptions::default()).is_empty());
}

#[test]
fn test_prefetch_skips_registered_names() {
    let f = fixture();
    f.mount("a", A_URL);
    let mounted = f.host.get_app("a").unwrap();
    f.host.pre_fetch(&[PrefetchParam::new("a", A_URL)]).unwrap();
    assert!(Rc::ptr_eq(&mounted, &f.host.get_app("a").unwrap()));
}

#[test]
fn test_prerender_runs_ahead_and_defers_events() {
    let f = fixture();
    let resizes = Rc::new(Cell::new(0));
    let r = Rc::clone(&resizes);
    f.runner.register("main", move |scope| {
        let r = Rc::clone(&r);
        scope.add_event_listener(
            "resize",
            Listener::new(move |_| {
                r.set(r.get() + 1);
                Ok(())
            }),
        );
        Ok(())
    });
    f.host.pre_fetch(&[PrefetchParam::new("a", A_URL).prerender()]).unwrap();
    f.settle();

    let app = f.host.get_app("a").unwrap();
    assert_eq!(app.get_app_state(), AppState::Mounted);
    assert!(app.instance().is_prerender());
    assert_eq!(f.runner.run_count("main"), 1);
    assert_eq!(f.events(), vec!["a:created"]);
    // parked: no url slot, no live listeners
    assert!(!f.env.history().url().query().unwrap_or_default().contains("app-a="));
    f.env.dispatch_window_event(&Event::new("resize"));
    assert_eq!(resizes.get(), 0);

    assert_eq!(f.host.get_active_apps(ActiveAppsOptions::default()), vec!["a".to_string()]);
    let without = f.host.get_active_apps(ActiveAppsOptions {
        exclude_prerender: true,
        ..Default::default()
    });
    assert!(without.is_empty());
}

#[test]
fn test_first_real_mount_adopts_prerendered_dom() {
    let f = fixture();
    f.host.pre_fetch(&[PrefetchParam::new("a", A_URL).prerender()]).unwrap();
    f.settle();
    let app = f.host.get_app("a").unwrap();

    let container = f.container();
    let adopted = f.host.register(&AppAttributes::new("a", A_URL), container).unwrap();
    assert!(Rc::ptr_eq(&adopted, &app));
    assert!(!app.instance().is_prerender());
    assert!(!app.instance().is_prefetch());
    assert_eq!(app.container(), Some(container));
    assert!(f.text(container).contains("hello"));
    assert_eq!(f.runner.run_count("main"), 1);
    assert_eq!(f.events(), vec!["a:created", "a:beforemount", "a:mounted"]);
    assert!(f.env.history().url().query().unwrap_or_default().contains("app-a="));
}

#[test]
fn test_unmounting_prerendered_guest() {
    let f = fixture();
    f.host.pre_fetch(&[PrefetchParam::new("a", A_URL).prerender()]).unwrap();
    f.settle();
    let app = f.host.get_app("a").unwrap();

    f.host.unmount_app("a", UnmountAppOptions::default());
    assert_eq!(app.get_app_state(), AppState::Unmount);
    assert!(!app.instance().is_prerender());
    assert_eq!(f.events().last().map(String::as_str), Some("a:unmount"));
}
