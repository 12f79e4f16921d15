use async_trait::async_trait;
pub use autoapply_common::error::BackendError;
pub use autoapply_common::protocol::NavigationResult;
use autoapply_common::protocol::{
    DomCommand, DomResponse, ExecutionContext, FieldValue, FocusRequest, FrameInfo,
    NavigateOptions, SetFieldRequest, TabInfo,
};
use std::path::Path;
use std::time::Duration;

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// The browser automation capability the orchestrator drives.
///
/// Every DOM interaction goes through [`Backend::execute_dom`] with a typed
/// [`DomCommand`], so the orchestrator logic can be exercised against a fake DOM.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Launch the backend (start or connect to a browser).
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the backend and cleanup resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Check if the backend is ready to accept commands.
    async fn is_ready(&self) -> bool;

    /// The tab the session drives; navigation always targets it.
    fn primary_tab(&self) -> Result<String, BackendError>;

    /// Navigate the primary tab.
    async fn navigate(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationResult, BackendError>;

    async fn current_url(&mut self, tab: &str) -> Result<String, BackendError>;

    /// All open tabs/windows.
    async fn tabs(&mut self) -> Result<Vec<TabInfo>, BackendError>;

    /// All frames of a tab, main frame included.
    async fn frames(&mut self, tab: &str) -> Result<Vec<FrameInfo>, BackendError>;

    /// Evaluate an agent command in a page or frame context.
    async fn execute_dom(
        &mut self,
        context: &ExecutionContext,
        command: DomCommand,
    ) -> Result<DomResponse, BackendError>;

    async fn bring_to_front(&mut self, _tab: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("bring_to_front".into()))
    }

    /// Type text into an element. Backends without real key input fall back to
    /// setting the value through the agent.
    async fn type_text(
        &mut self,
        context: &ExecutionContext,
        handle: u32,
        text: &str,
    ) -> Result<(), BackendError> {
        self.execute_dom(
            context,
            DomCommand::Focus(FocusRequest {
                handle,
                clear: true,
            }),
        )
        .await?
        .into_action()?;
        self.execute_dom(
            context,
            DomCommand::SetField(SetFieldRequest {
                handle,
                value: FieldValue::Text(text.to_string()),
            }),
        )
        .await?
        .into_action()?;
        Ok(())
    }

    /// Press a key in a tab.
    async fn press_key(&mut self, _tab: &str, _key: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("press_key".into()))
    }

    /// Attach a file to a file input.
    async fn upload_file(
        &mut self,
        _context: &ExecutionContext,
        _handle: u32,
        _path: &Path,
    ) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("upload_file".into()))
    }

    /// Wait until `selector` matches something. Returns `false` on timeout.
    async fn wait_for_selector(
        &mut self,
        context: &ExecutionContext,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, BackendError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = !self
                .execute_dom(context, DomCommand::query([selector]))
                .await?
                .into_elements()?
                .is_empty();
            if found {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    /// Wait for the network to go quiet. Backends that cannot observe the
    /// network return immediately.
    async fn wait_for_network_idle(
        &mut self,
        _tab: &str,
        _idle: Duration,
        _timeout: Duration,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Creates one isolated browser resource per session.
pub trait BackendFactory: Send + Sync {
    fn create(&self) -> Box<dyn Backend>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Box<dyn Backend> + Send + Sync,
{
    fn create(&self) -> Box<dyn Backend> {
        self()
    }
}
