use crate::cdp::CdpClient;
use crate::inject::{self, EvalError, execute_command, is_connection_lost};
use async_trait::async_trait;
use autoapply_engine::backend::{Backend, BackendError, NavigationResult};
use autoapply_engine::config::BrowserConfig;
use autoapply_engine::protocol::{
    DomCommand, DomResponse, ExecutionContext, FrameInfo, NavigateOptions, TabInfo, WaitUntil,
};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::{FrameTree, GetFrameTreeParams};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::error::CdpError;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const NETWORK_POLL: Duration = Duration::from_millis(250);
const RESOURCE_COUNT: &str = "performance.getEntriesByType('resource').length";

pub struct HeadlessBackend {
    settings: BrowserConfig,
    client: Option<CdpClient>,
    /// Isolated worlds per (tab, frame); dropped on navigation.
    worlds: HashMap<(String, String), ExecutionContextId>,
}

impl HeadlessBackend {
    pub fn new(settings: BrowserConfig) -> Self {
        Self {
            settings,
            client: None,
            worlds: HashMap::new(),
        }
    }

    fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.eval_timeout_ms)
    }

    fn client(&self) -> Result<&CdpClient, BackendError> {
        self.client.as_ref().ok_or(BackendError::NotReady)
    }

    async fn page(&mut self, tab: &str) -> Result<Page, BackendError> {
        let client = self.client.as_mut().ok_or(BackendError::NotReady)?;
        if client.page.target_id().inner() == tab {
            return Ok(client.page.clone());
        }
        let pages = client.browser.pages().await.map_err(map_cdp)?;
        let page = pages
            .into_iter()
            .find(|p| p.target_id().inner() == tab)
            .ok_or_else(|| BackendError::TabNotFound(tab.to_string()))?;
        client.wire(&page).await;
        Ok(page)
    }

    async fn world(&mut self, page: &Page, tab: &str, frame: &str) -> Result<ExecutionContextId, BackendError> {
        let key = (tab.to_string(), frame.to_string());
        if let Some(world) = self.worlds.get(&key) {
            return Ok(*world);
        }
        let world = inject::frame_world(page, frame)
            .await
            .map_err(|e| match e {
                EvalError::Lost(_) => BackendError::ConnectionLost,
                other => BackendError::FrameNotFound(format!("{} ({})", frame, other)),
            })?;
        self.worlds.insert(key, world);
        Ok(world)
    }

    async fn navigation_result(page: &Page) -> Result<NavigationResult, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult {
            url,
            title,
            status: 200,
        })
    }

    /// The element behind an agent handle as a remote object, for CDP calls
    /// that need a node rather than a value.
    async fn remote_object(
        &mut self,
        context: &ExecutionContext,
        handle: u32,
    ) -> Result<(Page, chromiumoxide::cdp::js_protocol::runtime::RemoteObjectId), BackendError> {
        let page = self.page(context.tab()).await?;
        let world = match context {
            ExecutionContext::Tab(_) => None,
            ExecutionContext::Frame { tab, frame } => Some(self.world(&page, tab, frame).await?),
        };
        let mut builder = EvaluateParams::builder()
            .expression(format!(
                "document.querySelector('[data-autoapply-handle=\"{}\"]')",
                handle
            ))
            .return_by_value(false);
        if let Some(world) = world {
            builder = builder.context_id(world);
        }
        let params = builder.build().map_err(BackendError::Other)?;
        let response = page.execute(params).await.map_err(map_cdp)?;
        let object_id = response
            .result
            .result
            .object_id
            .clone()
            .ok_or(BackendError::ElementNotFound { handle })?;
        Ok((page, object_id))
    }
}

fn map_cdp(error: CdpError) -> BackendError {
    if is_connection_lost(&error) {
        BackendError::ConnectionLost
    } else {
        BackendError::Other(error.to_string())
    }
}

fn map_eval(error: EvalError) -> BackendError {
    match error {
        EvalError::Timeout => BackendError::TimeoutWithContext {
            operation: "agent evaluation".into(),
        },
        EvalError::Lost(_) => BackendError::ConnectionLost,
        EvalError::Context(e) | EvalError::Other(e) => BackendError::ScriptError(e),
    }
}

fn flatten_frames(tab: &str, tree: &FrameTree, out: &mut Vec<FrameInfo>) {
    let frame = &tree.frame;
    out.push(FrameInfo {
        id: frame.id.inner().clone(),
        tab: tab.to_string(),
        url: frame.url.clone(),
        name: frame.name.clone(),
        parent: frame.parent_id.as_ref().map(|p| p.inner().clone()),
        is_main: frame.parent_id.is_none(),
    });
    for child in tree.child_frames.iter().flatten() {
        flatten_frames(tab, child, out);
    }
}

#[async_trait]
impl Backend for HeadlessBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching Chromium backend...");
        let client = CdpClient::start(&self.settings)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.worlds.clear();
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    fn primary_tab(&self) -> Result<String, BackendError> {
        Ok(self.client()?.page.target_id().inner().clone())
    }

    async fn navigate(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationResult, BackendError> {
        let tab = self.primary_tab()?;
        let page = self.client()?.page.clone();
        self.worlds.retain(|(t, _), _| t != &tab);

        info!("Navigating to: {}", url);
        let started = Instant::now();
        match tokio::time::timeout(options.timeout, page.goto(url)).await {
            Err(_) => {
                return Err(BackendError::TimeoutWithContext {
                    operation: format!("navigate to {}", url),
                });
            }
            Ok(Err(e)) if is_connection_lost(&e) => return Err(BackendError::ConnectionLost),
            Ok(Err(e)) => return Err(BackendError::Navigation(e.to_string())),
            Ok(Ok(_)) => {}
        }

        if options.wait_until == WaitUntil::NetworkIdle {
            let remaining = options.timeout.saturating_sub(started.elapsed());
            if let Err(e) = self
                .wait_for_network_idle(&tab, Duration::from_millis(500), remaining)
                .await
            {
                debug!("Network idle after navigation not reached: {}", e);
            }
        }
        Self::navigation_result(&page).await
    }

    async fn current_url(&mut self, tab: &str) -> Result<String, BackendError> {
        let page = self.page(tab).await?;
        Ok(page.url().await.map_err(map_cdp)?.unwrap_or_default())
    }

    async fn tabs(&mut self) -> Result<Vec<TabInfo>, BackendError> {
        let primary = self.primary_tab()?;
        let client = self.client.as_mut().ok_or(BackendError::NotReady)?;
        let pages = client.browser.pages().await.map_err(map_cdp)?;

        let mut tabs = Vec::new();
        for page in pages {
            client.wire(&page).await;
            let id = page.target_id().inner().clone();
            let url = page.url().await.unwrap_or_default().unwrap_or_default();
            let title = page
                .get_title()
                .await
                .unwrap_or_default()
                .unwrap_or_default();
            tabs.push(TabInfo {
                active: id == primary,
                id,
                url,
                title,
            });
        }
        Ok(tabs)
    }

    async fn frames(&mut self, tab: &str) -> Result<Vec<FrameInfo>, BackendError> {
        let page = self.page(tab).await?;
        let response = page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(map_cdp)?;
        let mut frames = Vec::new();
        flatten_frames(tab, &response.result.frame_tree, &mut frames);
        Ok(frames)
    }

    async fn execute_dom(
        &mut self,
        context: &ExecutionContext,
        command: DomCommand,
    ) -> Result<DomResponse, BackendError> {
        let page = self.page(context.tab()).await?;
        let value = serde_json::to_value(&command)?;
        let timeout = self.eval_timeout();

        let result = match context {
            ExecutionContext::Tab(_) => execute_command(&page, None, &value, timeout).await,
            ExecutionContext::Frame { tab, frame } => {
                let world = self.world(&page, tab, frame).await?;
                match execute_command(&page, Some(world), &value, timeout).await {
                    // The frame navigated; its old world is gone.
                    Err(EvalError::Context(_)) => {
                        self.worlds.remove(&(tab.clone(), frame.clone()));
                        let world = self.world(&page, tab, frame).await?;
                        execute_command(&page, Some(world), &value, timeout).await
                    }
                    other => other,
                }
            }
        };
        let value = result.map_err(map_eval)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn bring_to_front(&mut self, tab: &str) -> Result<(), BackendError> {
        let page = self.page(tab).await?;
        page.bring_to_front().await.map_err(map_cdp)?;
        Ok(())
    }

    async fn press_key(&mut self, tab: &str, key: &str) -> Result<(), BackendError> {
        let page = self.page(tab).await?;
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder().r#type(kind.clone()).key(key);
            if key == "Enter" {
                builder = builder
                    .code("Enter")
                    .windows_virtual_key_code(13)
                    .native_virtual_key_code(13);
                if kind == DispatchKeyEventType::KeyDown {
                    builder = builder.text("\r");
                }
            }
            let event = builder
                .build()
                .map_err(|e| BackendError::Other(format!("Failed to build key event: {:?}", e)))?;
            page.execute(event).await.map_err(map_cdp)?;
        }
        Ok(())
    }

    async fn upload_file(
        &mut self,
        context: &ExecutionContext,
        handle: u32,
        path: &Path,
    ) -> Result<(), BackendError> {
        if !path.is_file() {
            return Err(BackendError::Io(format!("{} is not a file", path.display())));
        }
        let (page, object_id) = self.remote_object(context, handle).await?;
        let params = SetFileInputFilesParams::builder()
            .file(path.display().to_string())
            .object_id(object_id)
            .build()
            .map_err(BackendError::Other)?;
        page.execute(params).await.map_err(map_cdp)?;
        Ok(())
    }

    /// Resource-count heuristic: idle once no new resource entry appeared for
    /// `idle`.
    async fn wait_for_network_idle(
        &mut self,
        tab: &str,
        idle: Duration,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        let page = self.page(tab).await?;
        let deadline = Instant::now() + timeout;
        let eval_timeout = self.eval_timeout();
        let mut last_count = None;
        let mut quiet_since = Instant::now();
        loop {
            let count = inject::evaluate(&page, None, RESOURCE_COUNT, eval_timeout)
                .await
                .map_err(map_eval)?
                .as_u64();
            if count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= idle {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BackendError::TimeoutWithContext {
                    operation: "network idle".into(),
                });
            }
            tokio::time::sleep(NETWORK_POLL).await;
        }
    }
}
