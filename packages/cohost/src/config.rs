//! Host-level and per-guest configuration.
//!
//! Boolean flags exist in two spellings, a legacy kebab-case attribute name
//! and a camelCase option name. For any flag:
//!
//! - if the guest's attributes carry either spelling, the attributes decide
//! - otherwise the host's [`StartOptions`] decide
//! - otherwise the flag is off
//!
//! When both spellings appear in one source they are OR-ed.

use cohost_sandbox::DocumentMode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::events::Lifecycles;

/// Which teardown a timer decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPath {
    /// Plain unmount of a non-UMD guest.
    Default,
    /// Unmount of a guest exposing mount hooks.
    Umd,
    /// Hiding a keep-alive guest.
    KeepAliveHide,
    /// Unmount of a guest that was pre-rendered and never shown.
    Prerender,
    /// Any unmount that destroys the instance.
    Destroy,
}

/// Which teardown paths clear a guest's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerPolicy {
    pub clear_on_default_unmount: bool,
    pub clear_on_umd_unmount: bool,
    pub clear_on_keep_alive_hide: bool,
    pub clear_on_prerender_unmount: bool,
    pub clear_on_destroy: bool,
}

impl Default for TimerPolicy {
    fn default() -> Self {
        Self {
            clear_on_default_unmount: true,
            clear_on_umd_unmount: false,
            clear_on_keep_alive_hide: false,
            clear_on_prerender_unmount: false,
            clear_on_destroy: true,
        }
    }
}

impl TimerPolicy {
    pub fn should_clear(&self, path: TeardownPath) -> bool {
        match path {
            TeardownPath::Default => self.clear_on_default_unmount,
            TeardownPath::Umd => self.clear_on_umd_unmount,
            TeardownPath::KeepAliveHide => self.clear_on_keep_alive_hide,
            TeardownPath::Prerender => self.clear_on_prerender_unmount,
            TeardownPath::Destroy => self.clear_on_destroy,
        }
    }
}

fn either(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
    }
}

/// Host-wide options passed to `Host::start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
    pub disable_sandbox: Option<bool>,
    #[serde(rename = "disable-sandbox")]
    pub disable_sandbox_legacy: Option<bool>,
    pub disable_scopecss: Option<bool>,
    #[serde(rename = "disable-scopecss")]
    pub disable_scopecss_legacy: Option<bool>,
    pub disable_memory_router: Option<bool>,
    #[serde(rename = "disable-memory-router")]
    pub disable_memory_router_legacy: Option<bool>,
    pub keep_router_state: Option<bool>,
    #[serde(rename = "keep-router-state")]
    pub keep_router_state_legacy: Option<bool>,
    pub disable_patch_request: Option<bool>,
    #[serde(rename = "disable-patch-request")]
    pub disable_patch_request_legacy: Option<bool>,
    pub destroy: Option<bool>,
    pub inline: Option<bool>,
    pub iframe: Option<bool>,
    pub fiber: Option<bool>,
    pub esmodule: Option<bool>,
    pub timer_policy: TimerPolicy,
    #[serde(skip)]
    pub lifecycles: Lifecycles,
}

impl StartOptions {
    /// Parse options from JSON.
    ///
    /// ```rust
    /// use cohost::StartOptions;
    ///
    /// let opts = StartOptions::from_json(r#"{"disable-sandbox": true, "timerPolicy": {"clearOnUmdUnmount": true}}"#).unwrap();
    /// assert_eq!(opts.disable_sandbox_legacy, Some(true));
    /// assert!(opts.timer_policy.clear_on_umd_unmount);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Per-guest attributes, as a host element would carry them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppAttributes {
    pub name: String,
    pub url: String,
    pub disable_sandbox: Option<bool>,
    #[serde(rename = "disable-sandbox")]
    pub disable_sandbox_legacy: Option<bool>,
    pub disable_scopecss: Option<bool>,
    #[serde(rename = "disable-scopecss")]
    pub disable_scopecss_legacy: Option<bool>,
    pub disable_memory_router: Option<bool>,
    #[serde(rename = "disable-memory-router")]
    pub disable_memory_router_legacy: Option<bool>,
    pub keep_router_state: Option<bool>,
    #[serde(rename = "keep-router-state")]
    pub keep_router_state_legacy: Option<bool>,
    pub disable_patch_request: Option<bool>,
    #[serde(rename = "disable-patch-request")]
    pub disable_patch_request_legacy: Option<bool>,
    #[serde(rename = "keep-alive", alias = "keepAlive")]
    pub keep_alive: Option<bool>,
    pub destroy: Option<bool>,
    pub inline: Option<bool>,
    pub iframe: Option<bool>,
    pub fiber: Option<bool>,
    pub esmodule: Option<bool>,
    /// Marks a server-rendered guest. Parsed and carried, never acted on.
    pub ssr: Option<bool>,
    #[serde(rename = "baseroute", alias = "baseRoute")]
    pub base_route: Option<String>,
    #[serde(rename = "default-page", alias = "defaultPage")]
    pub default_page: Option<String>,
}

impl AppAttributes {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve against host options. `base` resolves relative URLs.
    pub fn resolve(&self, global: &StartOptions, base: &Url) -> Result<AppConfig> {
        let name = validate_name(&self.name)?;
        let url = validate_url(&self.url, base)?;
        let pick = |attr: Option<bool>, glob: Option<bool>| attr.or(glob).unwrap_or(false);
        Ok(AppConfig {
            name,
            url,
            use_sandbox: !pick(
                either(self.disable_sandbox, self.disable_sandbox_legacy),
                either(global.disable_sandbox, global.disable_sandbox_legacy),
            ),
            scope_css: !pick(
                either(self.disable_scopecss, self.disable_scopecss_legacy),
                either(global.disable_scopecss, global.disable_scopecss_legacy),
            ),
            use_virtual_router: !pick(
                either(self.disable_memory_router, self.disable_memory_router_legacy),
                either(global.disable_memory_router, global.disable_memory_router_legacy),
            ),
            keep_router_state: pick(
                either(self.keep_router_state, self.keep_router_state_legacy),
                either(global.keep_router_state, global.keep_router_state_legacy),
            ),
            disable_patch_request: pick(
                either(self.disable_patch_request, self.disable_patch_request_legacy),
                either(global.disable_patch_request, global.disable_patch_request_legacy),
            ),
            keep_alive: self.keep_alive.unwrap_or(false),
            destroy: pick(self.destroy, global.destroy),
            inline: pick(self.inline, global.inline),
            fiber: pick(self.fiber, global.fiber),
            esmodule: pick(self.esmodule, global.esmodule),
            document_mode: if pick(self.iframe, global.iframe) {
                DocumentMode::NestedContext
            } else {
                DocumentMode::Scoped
            },
            base_route: self.base_route.clone(),
            default_page: self.default_page.clone(),
        })
    }
}

/// Fully resolved configuration of one guest.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub name: String,
    pub url: Url,
    pub use_sandbox: bool,
    pub scope_css: bool,
    pub use_virtual_router: bool,
    pub keep_router_state: bool,
    pub disable_patch_request: bool,
    pub keep_alive: bool,
    pub destroy: bool,
    pub inline: bool,
    pub fiber: bool,
    pub esmodule: bool,
    pub document_mode: DocumentMode,
    pub base_route: Option<String>,
    pub default_page: Option<String>,
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::Config("app name is required".to_string()));
    }
    if let Some(c) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
        return Err(Error::Config(format!("app name '{name}' contains invalid character '{c}'")));
    }
    Ok(name.to_string())
}

fn validate_url(raw: &str, base: &Url) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Config("app url is required".to_string()));
    }
    let mut url = Url::parse(raw).or_else(|_| base.join(raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!("app url '{raw}' must be http or https")));
    }
    url.set_fragment(None);
    Ok(url)
}
