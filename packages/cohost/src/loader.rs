//! The source loader seam.
//!
//! Fetching and parsing guest markup is not done here. A [`SourceLoader`]
//! receives a [`LoadRequest`] and completes it through a [`LoadCallback`],
//! which always delivers the result on a later macrotask.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use cohost_env::{Env, NodeSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// One guest script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// Key the script runner executes by.
    pub id: String,
    /// Source URL for external scripts.
    #[serde(default)]
    pub src: Option<String>,
    /// Script text.
    #[serde(default)]
    pub code: String,
    /// Whether the script was inline in the markup.
    #[serde(default)]
    pub inline: bool,
    /// Whether the script is an ES module.
    #[serde(default)]
    pub module: bool,
}

impl ScriptRecord {
    pub fn inline(id: &str, code: &str) -> Self {
        Self {
            id: id.to_string(),
            src: None,
            code: code.to_string(),
            inline: true,
            module: false,
        }
    }

    pub fn external(id: &str, src: &str) -> Self {
        Self {
            id: id.to_string(),
            src: Some(src.to_string()),
            code: String::new(),
            inline: false,
            module: false,
        }
    }
}

/// One guest stylesheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRecord {
    #[serde(default)]
    pub href: Option<String>,
    pub css: String,
}

/// A parsed guest: markup split into head and body, plus scripts and styles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceBundle {
    #[serde(default)]
    pub head: Vec<NodeSpec>,
    #[serde(default)]
    pub body: Vec<NodeSpec>,
    #[serde(default)]
    pub scripts: Vec<ScriptRecord>,
    #[serde(default)]
    pub styles: Vec<StyleRecord>,
}

impl SourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, node: NodeSpec) -> Self {
        self.body.push(node);
        self
    }

    pub fn with_head(mut self, node: NodeSpec) -> Self {
        self.head.push(node);
        self
    }

    pub fn with_script(mut self, script: ScriptRecord) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_style(mut self, css: &str) -> Self {
        self.styles.push(StyleRecord {
            href: None,
            css: css.to_string(),
        });
        self
    }
}

/// A fetch or parse failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{url}: {message}")]
pub struct LoadError {
    pub url: String,
    pub message: String,
}

/// What to load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub app: String,
    pub url: Url,
}

type LoadDone = Box<dyn FnOnce(std::result::Result<SourceBundle, LoadError>)>;

/// Completion handle for one [`LoadRequest`].
pub struct LoadCallback {
    env: Env,
    done: LoadDone,
}

impl LoadCallback {
    pub(crate) fn new(env: Env, done: impl FnOnce(std::result::Result<SourceBundle, LoadError>) + 'static) -> Self {
        Self {
            env,
            done: Box::new(done),
        }
    }

    pub fn resolve(self, bundle: SourceBundle) {
        self.complete(Ok(bundle));
    }

    pub fn reject(self, error: LoadError) {
        self.complete(Err(error));
    }

    fn complete(self, outcome: std::result::Result<SourceBundle, LoadError>) {
        let done = self.done;
        self.env.event_loop().queue_task(move || done(outcome));
    }
}

/// Fetches and parses guest sources.
pub trait SourceLoader {
    fn load(&self, request: LoadRequest, done: LoadCallback);
}

/// A loader serving bundles registered ahead of time.
#[derive(Default)]
pub struct MemoryLoader {
    bundles: RefCell<BTreeMap<String, SourceBundle>>,
    failures: RefCell<BTreeMap<String, String>>,
    requests: Cell<usize>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bundle` for `url`.
    pub fn insert(&self, url: &str, bundle: SourceBundle) {
        self.bundles.borrow_mut().insert(url.to_string(), bundle);
    }

    /// Fail every load of `url` with `message`.
    pub fn fail(&self, url: &str, message: &str) {
        self.failures.borrow_mut().insert(url.to_string(), message.to_string());
    }

    /// How many loads were requested.
    pub fn request_count(&self) -> usize {
        self.requests.get()
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, request: LoadRequest, done: LoadCallback) {
        self.requests.set(self.requests.get() + 1);
        let url = request.url.to_string();
        if let Some(message) = self.failures.borrow().get(&url).cloned() {
            done.reject(LoadError { url, message });
            return;
        }
        let bundle = self.bundles.borrow().get(&url).cloned();
        match bundle {
            Some(bundle) => done.resolve(bundle),
            None => done.reject(LoadError {
                url,
                message: "not found".to_string(),
            }),
        }
    }
}

/// Loaded bundles by URL and inline scripts by guest.
#[derive(Default)]
pub struct SourceCache {
    bundles: RefCell<BTreeMap<String, Rc<SourceBundle>>>,
    inline: RefCell<BTreeMap<String, Vec<ScriptRecord>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &Url) -> Option<Rc<SourceBundle>> {
        self.bundles.borrow().get(url.as_str()).cloned()
    }

    pub fn insert(&self, url: &Url, bundle: Rc<SourceBundle>) {
        self.bundles.borrow_mut().insert(url.to_string(), bundle);
    }

    /// Remember the inline scripts of `bundle` for `app`.
    pub fn cache_inline(&self, app: &str, bundle: &SourceBundle) {
        let inline: Vec<_> = bundle.scripts.iter().filter(|s| s.inline).cloned().collect();
        if !inline.is_empty() {
            self.inline.borrow_mut().insert(app.to_string(), inline);
        }
    }

    pub fn inline_scripts(&self, app: &str) -> Vec<ScriptRecord> {
        self.inline.borrow().get(app).cloned().unwrap_or_default()
    }

    pub fn drop_inline(&self, app: &str) -> bool {
        self.inline.borrow_mut().remove(app).is_some()
    }

    pub fn len(&self) -> usize {
        self.bundles.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.borrow().is_empty()
    }
}
