use autoapply_engine::config::BrowserConfig as BrowserSettings;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::HashSet;
use std::error::Error;
use tokio::task::JoinHandle;

/// Flags that keep cross-origin iframes in the page's own process, so frame
/// contexts are reachable from the page target.
const SAME_PROCESS_FRAMES: &str = "--disable-features=IsolateOrigins,site-per-process";

pub struct CdpClient {
    pub browser: Browser,
    pub handler_task: JoinHandle<()>,
    /// The tab the session navigates.
    pub page: Page,
    /// Launched by us (closed on exit) or borrowed from a running Chrome.
    owned: bool,
    wired: HashSet<String>,
}

impl CdpClient {
    /// Connect to an already running browser when configured, else launch one.
    pub async fn start(settings: &BrowserSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if let Some(url) = settings.connect_url.as_deref() {
            match Self::connect(url).await {
                Ok(client) => return Ok(client),
                Err(e) => tracing::warn!("Could not connect to {}: {}, launching instead", url, e),
            }
        }
        Self::launch(settings).await
    }

    pub async fn connect(url: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        tracing::info!("Connecting to running browser at {}", url);
        let (browser, handler) = Browser::connect(url)
            .await
            .map_err(|e| format!("Failed to connect to browser: {}", e))?;
        let handler_task = spawn_handler(handler);

        let existing = browser.pages().await.unwrap_or_default();
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| format!("Failed to create page: {}", e))?,
        };
        Self::finish(browser, handler_task, page, false).await
    }

    pub async fn launch(settings: &BrowserSettings) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut config_builder = BrowserConfig::builder().no_sandbox().arg(SAME_PROCESS_FRAMES);

        if let Some(dir) = &settings.user_data_dir {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Using browser profile {}", dir.display());
            config_builder = config_builder.user_data_dir(dir);
        }

        if settings.visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        // CHROME_BIN wins over the configured path.
        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        } else if let Some(path) = &settings.chrome_executable {
            config_builder = config_builder.chrome_executable(path);
        }

        let (browser, handler) = Browser::launch(
            config_builder
                .build()
                .map_err(|e| format!("Failed to build browser config: {}", e))?,
        )
        .await
        .map_err(|e| format!("Failed to launch browser: {}", e))?;
        let handler_task = spawn_handler(handler);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("Failed to create page: {}", e))?;
        Self::finish(browser, handler_task, page, true).await
    }

    async fn finish(
        browser: Browser,
        handler_task: JoinHandle<()>,
        page: Page,
        owned: bool,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut client = Self {
            browser,
            handler_task,
            page: page.clone(),
            owned,
            wired: HashSet::new(),
        };
        client.wire(&page).await;
        Ok(client)
    }

    /// Forward console output and auto-accept dialogs on a tab, once per tab.
    pub async fn wire(&mut self, page: &Page) {
        let id = page.target_id().inner().clone();
        if !self.wired.insert(id.clone()) {
            return;
        }

        match page.event_listener::<EventConsoleApiCalled>().await {
            Ok(mut console_events) => {
                tokio::spawn(async move {
                    while let Some(event) = console_events.next().await {
                        let args: Vec<String> = event
                            .args
                            .iter()
                            .map(|arg| arg.description.clone().unwrap_or_default())
                            .collect();
                        tracing::debug!("Browser console [{:?}]: {}", event.r#type, args.join(" "));
                    }
                });
            }
            Err(e) => tracing::warn!("Failed to subscribe to console events on {}: {}", id, e),
        }

        // Alerts and confirms would block every evaluation in the tab.
        match page.event_listener::<EventJavascriptDialogOpening>().await {
            Ok(mut dialog_events) => {
                let page = page.clone();
                tokio::spawn(async move {
                    while let Some(event) = dialog_events.next().await {
                        tracing::info!("Accepting dialog: {} ({:?})", event.message, event.r#type);
                        if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                            tracing::error!("Failed to accept dialog: {}", e);
                        }
                    }
                });
            }
            Err(e) => tracing::warn!("Failed to subscribe to dialog events on {}: {}", id, e),
        }
    }

    pub async fn close(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.owned {
            // Leave a borrowed browser running.
            self.handler_task.abort();
            return Ok(());
        }
        self.browser
            .close()
            .await
            .map_err(|e| format!("Error closing browser: {}", e))?;
        self.handler_task
            .await
            .map_err(|e| format!("Error awaiting handler: {}", e))?;
        Ok(())
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                tracing::debug!("Browser handler error (ignoring): {}", e);
            }
        }
        tracing::info!("Browser handler task ended");
    })
}
