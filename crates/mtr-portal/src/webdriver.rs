use std::time::Duration;

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use reqwest::header::COOKIE;
use serde_json::{json, Map};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{is_xpath, PortalDriver, PortalError, DEFAULT_WAIT};

const URL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub wait_timeout: Duration,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: false,
            wait_timeout: DEFAULT_WAIT,
        }
    }
}

/// Chrome session behind a WebDriver server (chromedriver, selenium).
pub struct WebDriverPortal {
    client: Client,
    http: reqwest::Client,
    wait_timeout: Duration,
}

impl WebDriverPortal {
    pub async fn connect(config: &WebDriverConfig) -> Result<Self, PortalError> {
        let mut args = vec!["--window-size=1366,900".to_string()];
        if config.headless {
            args.push("--headless=new".to_string());
        }

        let mut capabilities = Map::new();
        capabilities.insert("browserName".to_string(), json!("chrome"));
        capabilities.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        let client = ClientBuilder::native()
            .capabilities(capabilities)
            .connect(&config.webdriver_url)
            .await?;
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            http,
            wait_timeout: config.wait_timeout,
        })
    }

    async fn wait_for_element(&self, selector: &str) -> Result<Element, PortalError> {
        self.client
            .wait()
            .at_most(self.wait_timeout)
            .for_element(locator(selector))
            .await
            .map_err(|err| match err {
                CmdError::WaitTimeout => PortalError::Timeout {
                    target: selector.to_string(),
                    timeout: self.wait_timeout,
                },
                other => PortalError::Command(other),
            })
    }

    async fn first_visible(&self, selector: &str) -> Result<Element, PortalError> {
        let first = self.wait_for_element(selector).await?;
        for element in self.client.find_all(locator(selector)).await? {
            if element.is_displayed().await? {
                return Ok(element);
            }
        }
        Ok(first)
    }
}

fn locator(selector: &str) -> Locator<'_> {
    if is_xpath(selector) {
        Locator::XPath(selector)
    } else {
        Locator::Css(selector)
    }
}

#[async_trait]
impl PortalDriver for WebDriverPortal {
    async fn goto(&mut self, url: &str) -> Result<(), PortalError> {
        debug!(url, "navigating");
        self.client.goto(url).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, PortalError> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn wait_for_url(&mut self, url: &str) -> Result<(), PortalError> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if self.client.current_url().await?.as_str() == url {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PortalError::Timeout {
                    target: url.to_string(),
                    timeout: self.wait_timeout,
                });
            }
            sleep(URL_POLL_INTERVAL).await;
        }
    }

    async fn wait_for(&mut self, selector: &str) -> Result<(), PortalError> {
        self.wait_for_element(selector).await.map(|_| ())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), PortalError> {
        let element = self.first_visible(selector).await?;
        element.clear().await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn send_keys(&mut self, selector: &str, keys: &str) -> Result<(), PortalError> {
        let element = self.first_visible(selector).await?;
        element.send_keys(keys).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), PortalError> {
        debug!(selector, "click");
        self.first_visible(selector).await?.click().await?;
        Ok(())
    }

    async fn text(&mut self, selector: &str) -> Result<String, PortalError> {
        Ok(self.wait_for_element(selector).await?.text().await?)
    }

    async fn select_by_label(&mut self, selector: &str, label: &str) -> Result<(), PortalError> {
        self.wait_for_element(selector)
            .await?
            .select_by_label(label)
            .await?;
        Ok(())
    }

    async fn run_script(&mut self, script: &str) -> Result<(), PortalError> {
        debug!(script, "executing page script");
        self.client.execute(script, Vec::new()).await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PortalError> {
        Ok(self.client.screenshot().await?)
    }

    async fn download(&mut self, url: &str) -> Result<Vec<u8>, PortalError> {
        let cookie_header = self
            .client
            .get_all_cookies()
            .await?
            .iter()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect::<Vec<_>>()
            .join("; ");

        let response = self
            .http
            .get(url)
            .header(COOKIE, cookie_header)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn close(&mut self) -> Result<(), PortalError> {
        self.client.clone().close().await?;
        Ok(())
    }
}
