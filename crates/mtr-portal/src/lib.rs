//! Scripted browser session used to drive the MTR portal.
//!
//! The receiving flow only ever talks to [`PortalDriver`]; the WebDriver-backed
//! [`WebDriverPortal`] is the production implementation.

mod webdriver;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use webdriver::{WebDriverConfig, WebDriverPortal};

/// Matches the automation layer's own default element/URL wait.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

/// WebDriver key code for Tab.
pub const TAB_KEY: &str = "\u{e004}";

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("webdriver session could not be created: {0}")]
    Session(#[from] fantoccini::error::NewSessionError),
    #[error("webdriver command failed: {0}")]
    Command(#[from] fantoccini::error::CmdError),
    #[error("timed out after {timeout:?} waiting for {target}")]
    Timeout { target: String, timeout: Duration },
    #[error("no element matched {0}")]
    NotFound(String),
    #[error("export download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("unexpected portal state: {0}")]
    Unexpected(String),
}

/// Browser operations the portal flows need.
///
/// Selectors are CSS unless they start with `//` or `(`, in which case they
/// are XPath (see [`is_xpath`]).
#[async_trait]
pub trait PortalDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), PortalError>;

    async fn current_url(&mut self) -> Result<String, PortalError>;

    /// Blocks until the current URL equals `url`.
    async fn wait_for_url(&mut self, url: &str) -> Result<(), PortalError>;

    /// Blocks until an element matching `selector` exists.
    async fn wait_for(&mut self, selector: &str) -> Result<(), PortalError>;

    /// Clears the matched input and types `text` into it.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), PortalError>;

    /// Types raw keys (e.g. [`TAB_KEY`]) into the matched element without clearing it.
    async fn send_keys(&mut self, selector: &str, keys: &str) -> Result<(), PortalError>;

    /// Clicks the first visible match, falling back to the first match.
    async fn click(&mut self, selector: &str) -> Result<(), PortalError>;

    async fn text(&mut self, selector: &str) -> Result<String, PortalError>;

    async fn select_by_label(&mut self, selector: &str, label: &str) -> Result<(), PortalError>;

    /// Runs a page script; used for the portal's own JS entry points.
    async fn run_script(&mut self, script: &str) -> Result<(), PortalError>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, PortalError>;

    /// Fetches `url` with the session's cookies and returns the body.
    async fn download(&mut self, url: &str) -> Result<Vec<u8>, PortalError>;

    async fn close(&mut self) -> Result<(), PortalError>;
}

pub fn is_xpath(selector: &str) -> bool {
    selector.starts_with("//") || selector.starts_with('(')
}

/// Quotes `value` as an XPath string literal, handling embedded quotes.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
