//! Stylesheet scoping seam.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Rewrites a stylesheet so its selectors only match under `prefix`.
pub trait CssScoper {
    fn scope(&self, css: &str, prefix: &str) -> String;
}

impl<F: Fn(&str, &str) -> String> CssScoper for F {
    fn scope(&self, css: &str, prefix: &str) -> String {
        self(css, prefix)
    }
}

/// Selector prefix for a guest's styles.
pub fn scope_prefix(app: &str) -> String {
    format!("micro-app[name={app}]")
}

/// Caches scoped stylesheets by `(content, prefix)`.
#[derive(Default)]
pub struct CssCache {
    scoper: RefCell<Option<Rc<dyn CssScoper>>>,
    cache: RefCell<BTreeMap<(String, String), String>>,
    misses: Cell<usize>,
}

impl CssCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scoper(&self, scoper: Option<Rc<dyn CssScoper>>) {
        *self.scoper.borrow_mut() = scoper;
        self.cache.borrow_mut().clear();
    }

    /// Scope `css` under `prefix`. Without a scoper the text is unchanged.
    pub fn scope(&self, css: &str, prefix: &str) -> String {
        let Some(scoper) = self.scoper.borrow().clone() else {
            return css.to_string();
        };
        let key = (css.to_string(), prefix.to_string());
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }
        self.misses.set(self.misses.get() + 1);
        let scoped = scoper.scope(css, prefix);
        self.cache.borrow_mut().insert(key, scoped.clone());
        scoped
    }

    /// How many times the scoper actually ran.
    pub fn miss_count(&self) -> usize {
        self.misses.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_are_cached_by_content_and_prefix() {
        let cache = CssCache::new();
        let scoper: Rc<dyn CssScoper> = Rc::new(|css: &str, prefix: &str| format!("{prefix} {css}"));
        cache.set_scoper(Some(scoper));
        let a = scope_prefix("a");
        assert_eq!(cache.scope("p{}", &a), "micro-app[name=a] p{}");
        assert_eq!(cache.scope("p{}", &a), "micro-app[name=a] p{}");
        assert_eq!(cache.miss_count(), 1);
        cache.scope("p{}", &scope_prefix("b"));
        assert_eq!(cache.miss_count(), 2);
    }

    #[test]
    fn no_scoper_passes_through() {
        let cache = CssCache::new();
        assert_eq!(cache.scope("p{}", "x"), "p{}");
        assert_eq!(cache.miss_count(), 0);
    }
}
