//! Thin typed wrappers over [`Backend::execute_dom`] plus the text-matching
//! rules shared by every control lookup.

use crate::backend::{Backend, BackendError};
use autoapply_common::protocol::{
    CardRequest, DomCommand, ElementInfo, ExecutionContext, FieldInfo, FieldValue,
    FieldsRequest, PageSnapshot, RawCard, ScrollRequest, SetFieldRequest,
    TextRequest,
};

pub async fn query<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    selectors: &[&str],
) -> Result<Vec<ElementInfo>, BackendError> {
    if selectors.is_empty() {
        return Ok(vec![]);
    }
    backend
        .execute_dom(context, DomCommand::query(selectors.iter().copied()))
        .await?
        .into_elements()
}

/// First rendered element, in selector priority order.
pub async fn first_rendered<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    selectors: &[&str],
) -> Result<Option<ElementInfo>, BackendError> {
    Ok(query(backend, context, selectors)
        .await?
        .into_iter()
        .find(ElementInfo::is_rendered))
}

pub async fn snapshot<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
) -> Result<PageSnapshot, BackendError> {
    backend
        .execute_dom(context, DomCommand::snapshot())
        .await?
        .into_snapshot()
}

pub async fn read_text<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    selectors: &[&str],
) -> Result<Option<String>, BackendError> {
    backend
        .execute_dom(
            context,
            DomCommand::ReadText(TextRequest {
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
            }),
        )
        .await?
        .into_text()
}

pub async fn scroll<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    request: ScrollRequest,
) -> Result<(), BackendError> {
    backend
        .execute_dom(context, DomCommand::Scroll(request))
        .await?
        .into_action()
        .map(|_| ())
}

pub async fn cards<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    request: CardRequest,
) -> Result<Vec<RawCard>, BackendError> {
    backend
        .execute_dom(context, DomCommand::ExtractCards(request))
        .await?
        .into_cards()
}

pub async fn fields<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    question_containers: &[&str],
) -> Result<Vec<FieldInfo>, BackendError> {
    backend
        .execute_dom(
            context,
            DomCommand::Fields(FieldsRequest {
                question_containers: question_containers.iter().map(|s| s.to_string()).collect(),
            }),
        )
        .await?
        .into_fields()
}

pub async fn set_field<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    handle: u32,
    value: FieldValue,
) -> Result<(), BackendError> {
    backend
        .execute_dom(context, DomCommand::SetField(SetFieldRequest { handle, value }))
        .await?
        .into_action()
        .map(|_| ())
}

pub async fn click<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    handle: u32,
) -> Result<(), BackendError> {
    backend
        .execute_dom(context, DomCommand::click(handle))
        .await?
        .into_action()
        .map(|_| ())
}

/// What a user would read on the control: its text, else aria-label, else value.
pub fn label_of(element: &ElementInfo) -> String {
    let text = element.text_lower();
    if !text.is_empty() {
        return text;
    }
    element
        .attr("aria-label")
        .or_else(|| element.attr("value"))
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default()
}

pub fn is_skipped(element: &ElementInfo, skip: &[&str]) -> bool {
    let label = label_of(element);
    skip.iter().any(|s| label.contains(s))
}

/// Rendered element whose label contains one of `texts` (tried in order) and
/// none of `skip`.
pub fn match_text<'a>(
    elements: &'a [ElementInfo],
    texts: &[&str],
    skip: &[&str],
) -> Option<&'a ElementInfo> {
    texts.iter().find_map(|wanted| {
        elements.iter().find(|el| {
            el.is_rendered() && !is_skipped(el, skip) && label_of(el).contains(wanted)
        })
    })
}
