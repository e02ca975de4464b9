//! Request-issuing globals that resolve relative URLs against the guest.
//!
//! A guest loaded from `https://cdn.test/shop/` that calls `fetch("api/x")`
//! means `https://cdn.test/shop/api/x`, not a path on the host. While a
//! sandbox is started its private record carries wrapped `fetch`,
//! `XMLHttpRequest` and `EventSource` that rewrite their URL argument and
//! then call the pristine built-ins.

use std::cell::RefCell;
use std::rc::Rc;

use cohost_env::{Function, GlobalObject, Object, PropertyDescriptor, SharedEnvironmentCache, Value};
use tracing::debug;
use url::Url;

use crate::error::Result;

/// Globals replaced while a sandbox runs.
pub const REQUEST_GLOBALS: &[&str] = &["fetch", "XMLHttpRequest", "EventSource"];

fn resolve(base: &Url, raw: &str) -> String {
    match base.join(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

fn rewrite_arg(base: &Url, args: &[Value], index: usize) -> Vec<Value> {
    let mut args = args.to_vec();
    if let Some(raw) = args.get(index).and_then(Value::as_str).map(str::to_string) {
        args[index] = Value::from(resolve(base, &raw));
    }
    args
}

pub struct RequestPatch {
    base: Url,
    cache: SharedEnvironmentCache,
    installed: RefCell<Vec<(String, Function)>>,
    event_sources: Rc<RefCell<Vec<Object>>>,
}

impl RequestPatch {
    pub fn new(cache: SharedEnvironmentCache, base: Url) -> Self {
        Self {
            base,
            cache,
            installed: RefCell::new(Vec::new()),
            event_sources: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Resolve `raw` the way the patched globals do.
    pub fn resolve(&self, raw: &str) -> String {
        resolve(&self.base, raw)
    }

    fn wrap(&self, key: &str, raw: &Function) -> Function {
        let base = self.base.clone();
        let raw = raw.clone();
        match key {
            "XMLHttpRequest" => Function::constructor(key, move |args| raw.call(&rewrite_arg(&base, args, 1))),
            "EventSource" => {
                let sources = Rc::clone(&self.event_sources);
                Function::constructor(key, move |args| {
                    let source = raw.call(&rewrite_arg(&base, args, 0))?;
                    if let Some(obj) = source.as_object() {
                        sources.borrow_mut().push(obj.clone());
                    }
                    Ok(source)
                })
            }
            _ => Function::new(key, move |args| raw.call(&rewrite_arg(&base, args, 0))),
        }
    }

    /// Define the wrapped globals on a guest's private record.
    pub fn install(&self, local: &mut GlobalObject) -> Result<()> {
        if !self.installed.borrow().is_empty() {
            return Ok(());
        }
        for key in REQUEST_GLOBALS {
            let Some(raw) = self.cache.raw(key).and_then(Value::as_function).cloned() else {
                continue;
            };
            let wrapped = self.wrap(key, &raw);
            local.define_property(key, PropertyDescriptor::data(wrapped.clone()).enumerable(false))?;
            self.installed.borrow_mut().push((key.to_string(), wrapped));
        }
        debug!(base = %self.base, "installed request globals");
        Ok(())
    }

    /// Remove the wrapped globals, leaving anything the guest reassigned.
    pub fn uninstall(&self, local: &mut GlobalObject) -> Result<()> {
        let installed = std::mem::take(&mut *self.installed.borrow_mut());
        for (key, wrapped) in installed {
            let ours = matches!(local.get(&key), Some(Value::Function(f)) if f.ptr_eq(&wrapped));
            if ours {
                local.delete(&key)?;
            }
        }
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        !self.installed.borrow().is_empty()
    }

    /// Number of open server-push connections created through the patch.
    pub fn event_source_count(&self) -> usize {
        self.event_sources.borrow().len()
    }

    /// Close every tracked server-push connection. Returns how many.
    pub fn close_event_sources(&self) -> usize {
        let sources = std::mem::take(&mut *self.event_sources.borrow_mut());
        for source in &sources {
            if let Err(e) = source.call_method("close", &[]) {
                debug!(error = %e, "event source close threw");
            }
        }
        sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_env::SharedEnvironment;

    fn patch(env: &cohost_env::Env) -> RequestPatch {
        RequestPatch::new(env.cache().clone(), Url::parse("https://cdn.test/shop/").unwrap())
    }

    #[test]
    fn fetch_resolves_against_guest_url() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let p = patch(&env);
        let mut local = GlobalObject::new();
        p.install(&mut local).unwrap();
        let fetch = local.get("fetch").unwrap();
        fetch.as_function().unwrap().call(&[Value::from("api/x")]).unwrap();
        fetch
            .as_function()
            .unwrap()
            .call(&[Value::from("https://other.test/y")])
            .unwrap();
        let log = env.network_log();
        assert_eq!(log[0].url, "https://cdn.test/shop/api/x");
        assert_eq!(log[1].url, "https://other.test/y");
    }

    #[test]
    fn xhr_rewrites_second_argument() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let p = patch(&env);
        let mut local = GlobalObject::new();
        p.install(&mut local).unwrap();
        let xhr = local.get("XMLHttpRequest").unwrap();
        let xhr = xhr.as_function().unwrap();
        assert!(xhr.is_constructor());
        xhr.call(&[Value::from("POST"), Value::from("/submit")]).unwrap();
        assert_eq!(env.network_log()[0].url, "https://cdn.test/submit");
    }

    #[test]
    fn event_sources_are_tracked_and_closed() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let p = patch(&env);
        let mut local = GlobalObject::new();
        p.install(&mut local).unwrap();
        let ctor = local.get("EventSource").unwrap();
        let source = ctor.as_function().unwrap().call(&[Value::from("stream")]).unwrap();
        assert_eq!(p.event_source_count(), 1);
        assert_eq!(p.close_event_sources(), 1);
        assert_eq!(source.as_object().unwrap().get("readyState"), Value::from(2i64));
        assert_eq!(p.event_source_count(), 0);
    }

    #[test]
    fn uninstall_keeps_guest_reassignments() {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let p = patch(&env);
        let mut local = GlobalObject::new();
        p.install(&mut local).unwrap();
        local.set("fetch", Value::from("mine")).unwrap();
        p.uninstall(&mut local).unwrap();
        assert_eq!(local.get("fetch"), Some(Value::from("mine")));
        assert!(!local.has_own("XMLHttpRequest"));
        assert!(!p.is_installed());
    }
}
