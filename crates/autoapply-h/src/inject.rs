use autoapply_scanner::{AGENT_GLOBAL, AGENT_JS};
use chromiumoxide::Page;
use chromiumoxide::error::CdpError;
use chromiumoxide::cdp::browser_protocol::page::{CreateIsolatedWorldParams, FrameId};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use std::time::Duration;

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

const WORLD_NAME: &str = "autoapply";

#[derive(Debug)]
pub enum EvalError {
    Timeout,
    Context(String),
    /// The DevTools connection is gone.
    Lost(String),
    Other(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Timeout => f.write_str(
                "Evaluation timed out, possibly blocked by a dialog (alert/confirm/prompt)",
            ),
            EvalError::Context(e) => write!(f, "Execution context unavailable: {}", e),
            EvalError::Lost(e) => write!(f, "Browser connection lost: {}", e),
            EvalError::Other(e) => f.write_str(e),
        }
    }
}

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("Cannot find default execution context")
        || err.contains("-32000")
}

/// Isolated world in a child frame. The DOM is shared with the page, the JS
/// globals are not, so the agent is injected there separately.
pub async fn frame_world(page: &Page, frame: &str) -> Result<ExecutionContextId, EvalError> {
    let params = CreateIsolatedWorldParams::builder()
        .frame_id(FrameId::new(frame))
        .world_name(WORLD_NAME)
        .build()
        .map_err(EvalError::Other)?;
    let response = page
        .execute(params)
        .await
        .map_err(from_cdp)?;
    Ok(response.result.execution_context_id)
}

/// Run `window.AutoApply.process(command)` in a tab (main world) or a frame
/// world, injecting the agent first and retrying while the context churns.
pub async fn execute_command(
    page: &Page,
    world: Option<ExecutionContextId>,
    command: &serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value, EvalError> {
    let expression = format!("window.{}.process({})", AGENT_GLOBAL, command);
    tracing::debug!("Evaluating agent command {}", command["action"]);

    let mut last_error = None;
    for attempt in 0..MAX_CONTEXT_RETRIES {
        let result = match inject_agent(page, world.clone(), timeout).await {
            Ok(()) => evaluate(page, world.clone(), &expression, timeout).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(EvalError::Context(e)) => {
                tracing::debug!(
                    "Context error during command (attempt {}/{}), retrying...",
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(e);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(EvalError::Context(last_error.unwrap_or_else(|| {
        "Failed to execute command after retries".to_string()
    })))
}

async fn inject_agent(
    page: &Page,
    world: Option<ExecutionContextId>,
    timeout: Duration,
) -> Result<(), EvalError> {
    let probe = format!("typeof window.{} !== 'undefined'", AGENT_GLOBAL);
    let loaded = evaluate(page, world.clone(), &probe, timeout).await?;
    if loaded.as_bool() != Some(true) {
        evaluate(page, world, AGENT_JS, timeout).await?;
    }
    Ok(())
}

pub async fn evaluate(
    page: &Page,
    world: Option<ExecutionContextId>,
    expression: &str,
    timeout: Duration,
) -> Result<serde_json::Value, EvalError> {
    let mut builder = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true);
    if let Some(world) = world {
        builder = builder.context_id(world);
    }
    let params = builder.build().map_err(EvalError::Other)?;

    let response = match tokio::time::timeout(timeout, page.execute(params)).await {
        Err(_) => return Err(EvalError::Timeout),
        Ok(Err(e)) => return Err(from_cdp(e)),
        Ok(Ok(response)) => response,
    };
    if let Some(exception) = &response.result.exception_details {
        let message = exception
            .exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| exception.text.clone());
        return Err(classify(message));
    }
    Ok(response
        .result
        .result
        .value
        .clone()
        .unwrap_or(serde_json::Value::Null))
}

pub fn is_connection_lost(error: &CdpError) -> bool {
    matches!(error, CdpError::Ws(_) | CdpError::ChannelSendError(_))
}

fn from_cdp(error: CdpError) -> EvalError {
    if is_connection_lost(&error) {
        EvalError::Lost(error.to_string())
    } else {
        classify(error.to_string())
    }
}

fn classify(message: String) -> EvalError {
    if is_context_error(&message) {
        EvalError::Context(message)
    } else {
        EvalError::Other(message)
    }
}
