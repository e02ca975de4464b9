//! Data channel between host and guests.
//!
//! Each guest has two directed channels (host to guest and guest to host)
//! and all parties share one global channel. Writes to a channel within one
//! macrotask are merged field by field, last writer winning, and delivered
//! once on the next macrotask. A flush whose merged payload equals the data
//! already delivered is dropped.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use cohost_env::{Env, Object, Thrown, Value};
use cohost_sandbox::DataChannelHooks;
use tracing::{debug, warn};

/// Fields of one data payload.
pub type DataMap = BTreeMap<String, Value>;

type DataFn = dyn Fn(&Object) -> Result<(), Thrown>;

/// A data listener, compared by identity.
#[derive(Clone)]
pub struct DataListener {
    inner: Rc<DataFn>,
}

impl DataListener {
    pub fn new(f: impl Fn(&Object) -> Result<(), Thrown> + 'static) -> Self {
        Self { inner: Rc::new(f) }
    }

    pub fn call(&self, data: &Object) -> Result<(), Thrown> {
        (self.inner)(data)
    }

    pub fn ptr_eq(&self, other: &DataListener) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Direction {
    ToGuest,
    ToHost,
    Global,
}

type Key = (Direction, String);

fn global_key() -> Key {
    (Direction::Global, String::new())
}

#[derive(Default)]
struct Channel {
    data: Option<DataMap>,
    pending: Option<DataMap>,
    /// Listener with the guest that owns it, if any.
    listeners: Vec<(Option<String>, DataListener)>,
}

#[derive(Default, Clone)]
struct Snapshot {
    guest: Vec<DataListener>,
    global: Vec<DataListener>,
}

pub struct EventCenter {
    env: Env,
    this: Weak<EventCenter>,
    channels: RefCell<BTreeMap<Key, Channel>>,
    snapshots: RefCell<BTreeMap<String, Snapshot>>,
}

impl EventCenter {
    pub fn new(env: Env) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            env,
            this: this.clone(),
            channels: RefCell::new(BTreeMap::new()),
            snapshots: RefCell::new(BTreeMap::new()),
        })
    }

    /// The guest-side handle for `app`.
    pub fn guest(self: &Rc<Self>, app: &str) -> GuestData {
        GuestData {
            center: Rc::clone(self),
            app: app.to_string(),
        }
    }

    // ---- channel plumbing ----

    fn enqueue(&self, key: Key, data: DataMap) {
        let schedule = {
            let mut channels = self.channels.borrow_mut();
            let channel = channels.entry(key.clone()).or_default();
            let first = channel.pending.is_none();
            channel.pending.get_or_insert_with(BTreeMap::new).extend(data);
            first
        };
        if schedule {
            let this = self.this.clone();
            self.env.event_loop().queue_task(move || {
                if let Some(center) = this.upgrade() {
                    center.flush(&key);
                }
            });
        }
    }

    fn flush(&self, key: &Key) {
        let (payload, listeners) = {
            let mut channels = self.channels.borrow_mut();
            let Some(channel) = channels.get_mut(key) else {
                return;
            };
            let Some(pending) = channel.pending.take() else {
                return;
            };
            if channel.data.as_ref() == Some(&pending) {
                return;
            }
            channel.data = Some(pending.clone());
            let listeners: Vec<_> = channel.listeners.clone();
            (pending, listeners)
        };
        debug!(channel = ?key.0, app = %key.1, listeners = listeners.len(), "flushing data");
        self.deliver(&payload, &listeners);
    }

    fn deliver(&self, payload: &DataMap, listeners: &[(Option<String>, DataListener)]) {
        let data = Object::from_map(payload.clone());
        for (owner, listener) in listeners {
            let result = match owner {
                Some(app) => {
                    let _current = self.env.current_app().enter(app);
                    listener.call(&data)
                }
                None => listener.call(&data),
            };
            if let Err(e) = result {
                warn!(app = owner.as_deref().unwrap_or("host"), error = %e, "data listener threw");
            }
        }
    }

    fn data(&self, key: &Key) -> Option<Object> {
        self.channels
            .borrow()
            .get(key)
            .and_then(|c| c.data.clone())
            .map(Object::from_map)
    }

    fn add_listener(&self, key: Key, owner: Option<String>, listener: DataListener, auto_trigger: bool) {
        let current = {
            let mut channels = self.channels.borrow_mut();
            let channel = channels.entry(key).or_default();
            if channel.listeners.iter().any(|(_, l)| l.ptr_eq(&listener)) {
                return;
            }
            channel.listeners.push((owner.clone(), listener.clone()));
            channel.data.clone()
        };
        if auto_trigger {
            if let Some(data) = current {
                self.deliver(&data, &[(owner, listener)]);
            }
        }
    }

    fn remove_listener(&self, key: &Key, listener: &DataListener) -> bool {
        let mut channels = self.channels.borrow_mut();
        let Some(channel) = channels.get_mut(key) else {
            return false;
        };
        let before = channel.listeners.len();
        channel.listeners.retain(|(_, l)| !l.ptr_eq(listener));
        before != channel.listeners.len()
    }

    fn clear_listeners(&self, key: &Key, owner: Option<&str>) {
        if let Some(channel) = self.channels.borrow_mut().get_mut(key) {
            channel.listeners.retain(|(o, _)| o.as_deref() != owner);
        }
    }

    fn listeners_owned_by(&self, key: &Key, owner: &str) -> Vec<DataListener> {
        self.channels
            .borrow()
            .get(key)
            .map(|c| {
                c.listeners
                    .iter()
                    .filter(|(o, _)| o.as_deref() == Some(owner))
                    .map(|(_, l)| l.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- host side ----

    /// Send data to `app`.
    pub fn set_data(&self, app: &str, data: DataMap) {
        self.enqueue((Direction::ToGuest, app.to_string()), data);
    }

    /// The latest data `app` sent to the host.
    pub fn get_data(&self, app: &str) -> Option<Object> {
        self.data(&(Direction::ToHost, app.to_string()))
    }

    /// The latest data the host sent to `app`.
    pub fn sent_data(&self, app: &str) -> Option<Object> {
        self.data(&(Direction::ToGuest, app.to_string()))
    }

    /// Listen to data `app` sends to the host.
    pub fn add_data_listener(&self, app: &str, listener: DataListener, auto_trigger: bool) {
        self.add_listener((Direction::ToHost, app.to_string()), None, listener, auto_trigger);
    }

    pub fn remove_data_listener(&self, app: &str, listener: &DataListener) -> bool {
        self.remove_listener(&(Direction::ToHost, app.to_string()), listener)
    }

    pub fn clear_data_listeners(&self, app: &str) {
        self.clear_listeners(&(Direction::ToHost, app.to_string()), None);
    }

    pub fn set_global_data(&self, data: DataMap) {
        self.enqueue(global_key(), data);
    }

    pub fn get_global_data(&self) -> Option<Object> {
        self.data(&global_key())
    }

    pub fn add_global_data_listener(&self, listener: DataListener, auto_trigger: bool) {
        self.add_listener(global_key(), None, listener, auto_trigger);
    }

    pub fn remove_global_data_listener(&self, listener: &DataListener) -> bool {
        self.remove_listener(&global_key(), listener)
    }

    /// Remove the host's global listeners. Guests' global listeners stay.
    pub fn clear_global_data_listeners(&self) {
        self.clear_listeners(&global_key(), None);
    }

    /// Drop cached data in both directions for `app`.
    pub fn clear_data(&self, app: &str) {
        let mut channels = self.channels.borrow_mut();
        for direction in [Direction::ToGuest, Direction::ToHost] {
            if let Some(channel) = channels.get_mut(&(direction, app.to_string())) {
                channel.data = None;
                channel.pending = None;
            }
        }
    }
}

impl DataChannelHooks for EventCenter {
    fn record(&self, app: &str) {
        let snapshot = Snapshot {
            guest: self.listeners_owned_by(&(Direction::ToGuest, app.to_string()), app),
            global: self.listeners_owned_by(&global_key(), app),
        };
        self.snapshots.borrow_mut().insert(app.to_string(), snapshot);
    }

    fn rebuild(&self, app: &str) {
        let Some(snapshot) = self.snapshots.borrow_mut().remove(app) else {
            return;
        };
        for listener in snapshot.guest {
            self.add_listener((Direction::ToGuest, app.to_string()), Some(app.to_string()), listener, false);
        }
        for listener in snapshot.global {
            self.add_listener(global_key(), Some(app.to_string()), listener, false);
        }
    }

    fn release(&self, app: &str, clear_data: bool) {
        self.clear_listeners(&(Direction::ToGuest, app.to_string()), Some(app));
        self.clear_listeners(&global_key(), Some(app));
        if clear_data {
            self.clear_data(app);
        }
    }
}

/// A guest's end of the data channel.
#[derive(Clone)]
pub struct GuestData {
    center: Rc<EventCenter>,
    app: String,
}

impl GuestData {
    pub fn app(&self) -> &str {
        &self.app
    }

    /// The latest data the host sent.
    pub fn get_data(&self) -> Option<Object> {
        self.center.sent_data(&self.app)
    }

    pub fn add_data_listener(&self, listener: DataListener, auto_trigger: bool) {
        self.center.add_listener(
            (Direction::ToGuest, self.app.clone()),
            Some(self.app.clone()),
            listener,
            auto_trigger,
        );
    }

    pub fn remove_data_listener(&self, listener: &DataListener) -> bool {
        self.center.remove_listener(&(Direction::ToGuest, self.app.clone()), listener)
    }

    pub fn clear_data_listeners(&self) {
        self.center
            .clear_listeners(&(Direction::ToGuest, self.app.clone()), Some(&self.app));
    }

    /// Send data to the host.
    pub fn dispatch(&self, data: DataMap) {
        self.center.enqueue((Direction::ToHost, self.app.clone()), data);
    }

    pub fn get_global_data(&self) -> Option<Object> {
        self.center.get_global_data()
    }

    pub fn set_global_data(&self, data: DataMap) {
        self.center.set_global_data(data);
    }

    pub fn add_global_data_listener(&self, listener: DataListener, auto_trigger: bool) {
        self.center
            .add_listener(global_key(), Some(self.app.clone()), listener, auto_trigger);
    }

    pub fn remove_global_data_listener(&self, listener: &DataListener) -> bool {
        self.center.remove_listener(&global_key(), listener)
    }

    pub fn clear_global_data_listeners(&self) {
        self.center.clear_listeners(&global_key(), Some(&self.app));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_env::SharedEnvironment;
    use collection_literals::btree;

    fn counter() -> (DataListener, Rc<RefCell<Vec<Object>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let l = DataListener::new(move |d| {
            s.borrow_mut().push(d.clone());
            Ok(())
        });
        (l, seen)
    }

    #[test]
    fn dispatches_in_one_tick_merge_into_one_delivery() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        let (listener, seen) = counter();
        center.add_data_listener("a", listener, false);

        let guest = center.guest("a");
        guest.dispatch(btree! { "x".to_string() => Value::from(1i64), "y".to_string() => Value::from(1i64) });
        guest.dispatch(btree! { "x".to_string() => Value::from(2i64) });
        assert!(seen.borrow().is_empty());

        env.event_loop().run_until_idle();
        assert_eq!(seen.borrow().len(), 1);
        let got = &seen.borrow()[0];
        assert_eq!(got.get("x"), Value::from(2i64));
        assert_eq!(got.get("y"), Value::from(1i64));
        assert_eq!(center.get_data("a").unwrap().get("x"), Value::from(2i64));
    }

    #[test]
    fn identical_payloads_are_not_redelivered() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        let (listener, seen) = counter();
        center.guest("a").add_data_listener(listener, false);
        center.set_data("a", btree! { "k".to_string() => Value::from("v") });
        env.event_loop().run_until_idle();
        center.set_data("a", btree! { "k".to_string() => Value::from("v") });
        env.event_loop().run_until_idle();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn guest_listeners_run_as_current_app() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        let current = Rc::new(RefCell::new(None));
        let c = Rc::clone(&current);
        let env_ref = Rc::clone(&env);
        center.guest("a").add_data_listener(
            DataListener::new(move |_| {
                *c.borrow_mut() = env_ref.current_app().name();
                Ok(())
            }),
            false,
        );
        center.set_data("a", btree! { "k".to_string() => Value::from(1i64) });
        env.event_loop().run_until_idle();
        assert_eq!(current.borrow().as_deref(), Some("a"));
    }

    #[test]
    fn auto_trigger_delivers_cached_data() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        center.set_global_data(btree! { "theme".to_string() => Value::from("dark") });
        env.event_loop().run_until_idle();

        let (listener, seen) = counter();
        center.guest("a").add_global_data_listener(listener, true);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].get("theme"), Value::from("dark"));
    }

    #[test]
    fn record_release_rebuild_round_trips_guest_listeners() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        let guest = center.guest("a");
        let (mine, seen) = counter();
        let (host_side, host_seen) = counter();
        guest.add_data_listener(mine.clone(), false);
        center.add_global_data_listener(host_side, false);

        center.record("a");
        center.release("a", false);
        center.set_data("a", btree! { "n".to_string() => Value::from(1i64) });
        center.set_global_data(btree! { "g".to_string() => Value::from(1i64) });
        env.event_loop().run_until_idle();
        assert!(seen.borrow().is_empty());
        assert_eq!(host_seen.borrow().len(), 1);

        center.rebuild("a");
        center.set_data("a", btree! { "n".to_string() => Value::from(2i64) });
        env.event_loop().run_until_idle();
        assert_eq!(seen.borrow().len(), 1);
        assert!(!guest.remove_data_listener(&DataListener::new(|_| Ok(()))));
        assert!(guest.remove_data_listener(&mine));
    }

    #[test]
    fn release_with_clear_data_drops_both_directions() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let center = EventCenter::new(Rc::clone(&env));
        center.set_data("a", btree! { "to".to_string() => Value::from(1i64) });
        center.guest("a").dispatch(btree! { "from".to_string() => Value::from(1i64) });
        env.event_loop().run_until_idle();
        assert!(center.get_data("a").is_some());
        center.release("a", true);
        assert!(center.get_data("a").is_none());
        assert!(center.guest("a").get_data().is_none());
    }
}
