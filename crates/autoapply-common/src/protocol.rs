use crate::error::BackendError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Custom deserializer for HashMap<String, String> that filters out null values.
/// The agent reports every attribute it was asked about, with null for missing ones.
fn deserialize_nullable_string_map<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: HashMap<String, Option<String>> = HashMap::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| v.map(|val| (k, val)))
        .collect())
}

// ============================================================
// Browser-level addressing
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub id: String,
    pub tab: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    pub is_main: bool,
}

/// The DOM surface a command is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    Tab(String),
    Frame { tab: String, frame: String },
}

impl ExecutionContext {
    pub fn tab(&self) -> &str {
        match self {
            ExecutionContext::Tab(tab) => tab,
            ExecutionContext::Frame { tab, .. } => tab,
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(self, ExecutionContext::Frame { .. })
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Tab(tab) => write!(f, "tab {}", tab),
            ExecutionContext::Frame { tab, frame } => write!(f, "frame {} of tab {}", frame, tab),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitUntil {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigateOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
}

impl NavigateOptions {
    pub fn new(wait_until: WaitUntil, timeout: Duration) -> Self {
        Self {
            wait_until,
            timeout,
        }
    }
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16, // generic status code (e.g. 200)
}

// ============================================================
// In-page agent commands
// ============================================================

/// Commands processed by the injected page agent (`window.AutoApply.process`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DomCommand {
    Snapshot(SnapshotRequest),
    Query(QueryRequest),
    Scroll(ScrollRequest),
    ExtractCards(CardRequest),
    ReadText(TextRequest),
    Fields(FieldsRequest),
    SetField(SetFieldRequest),
    Click(ClickRequest),
    Focus(FocusRequest),
}

impl DomCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DomCommand::Snapshot(_) => "snapshot",
            DomCommand::Query(_) => "query",
            DomCommand::Scroll(_) => "scroll",
            DomCommand::ExtractCards(_) => "extract_cards",
            DomCommand::ReadText(_) => "read_text",
            DomCommand::Fields(_) => "fields",
            DomCommand::SetField(_) => "set_field",
            DomCommand::Click(_) => "click",
            DomCommand::Focus(_) => "focus",
        }
    }

    pub fn query<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DomCommand::Query(QueryRequest {
            selectors: selectors.into_iter().map(Into::into).collect(),
            limit: None,
        })
    }

    pub fn snapshot() -> Self {
        DomCommand::Snapshot(SnapshotRequest::default())
    }

    pub fn click(handle: u32) -> Self {
        DomCommand::Click(ClickRequest { handle })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Maximum characters of body text to return. Zero means unlimited.
    #[serde(default)]
    pub max_text: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollRequest {
    /// Scroll the first element matching one of these into view before stepping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub into_view: Vec<String>,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub delta_y: i32,
    #[serde(default)]
    pub pause_ms: u64,
}

/// Prioritized selector lists for one listing card. For every field the first
/// selector that yields text wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRequest {
    pub card_selectors: Vec<String>,
    pub title: Vec<String>,
    pub company: Vec<String>,
    pub location: Vec<String>,
    pub salary: Vec<String>,
    pub snippet: Vec<String>,
    pub link: Vec<String>,
    pub easy_apply: Vec<String>,
    #[serde(default)]
    pub easy_apply_phrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsRequest {
    /// Ancestor selectors treated as question containers for label lookup.
    #[serde(default)]
    pub question_containers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Set through the native value setter, then input/change/blur.
    Text(String),
    /// Option value of a select element.
    Select(String),
    /// Checked state of a radio or checkbox.
    Check(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFieldRequest {
    pub handle: u32,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickRequest {
    pub handle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusRequest {
    pub handle: u32,
    #[serde(default)]
    pub clear: bool,
}

// ============================================================
// In-page agent responses
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomResponse {
    Ok {
        data: DomData,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum DomData {
    Snapshot(PageSnapshot),
    Elements(Vec<ElementInfo>),
    Cards(Vec<RawCard>),
    Text(Option<String>),
    Fields(Vec<FieldInfo>),
    Action(ActionResult),
}

impl DomResponse {
    pub fn ok(data: DomData) -> Self {
        DomResponse::Ok {
            data,
            warnings: vec![],
        }
    }

    pub fn into_data(self) -> Result<DomData, BackendError> {
        match self {
            DomResponse::Ok { data, .. } => Ok(data),
            DomResponse::Error { code, message } => Err(BackendError::Agent { code, message }),
        }
    }

    pub fn into_snapshot(self) -> Result<PageSnapshot, BackendError> {
        match self.into_data()? {
            DomData::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(BackendError::UnexpectedResponse {
                expected: "snapshot",
            }),
        }
    }

    pub fn into_elements(self) -> Result<Vec<ElementInfo>, BackendError> {
        match self.into_data()? {
            DomData::Elements(elements) => Ok(elements),
            _ => Err(BackendError::UnexpectedResponse {
                expected: "elements",
            }),
        }
    }

    pub fn into_cards(self) -> Result<Vec<RawCard>, BackendError> {
        match self.into_data()? {
            DomData::Cards(cards) => Ok(cards),
            _ => Err(BackendError::UnexpectedResponse { expected: "cards" }),
        }
    }

    pub fn into_text(self) -> Result<Option<String>, BackendError> {
        match self.into_data()? {
            DomData::Text(text) => Ok(text),
            _ => Err(BackendError::UnexpectedResponse { expected: "text" }),
        }
    }

    pub fn into_fields(self) -> Result<Vec<FieldInfo>, BackendError> {
        match self.into_data()? {
            DomData::Fields(fields) => Ok(fields),
            _ => Err(BackendError::UnexpectedResponse { expected: "fields" }),
        }
    }

    pub fn into_action(self) -> Result<ActionResult, BackendError> {
        match self.into_data()? {
            DomData::Action(result) => Ok(result),
            _ => Err(BackendError::UnexpectedResponse { expected: "action" }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Visible body text (`innerText`).
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub handle: u32,
    /// Index of the first selector in the request that matched this element.
    pub matched: usize,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, deserialize_with = "deserialize_nullable_string_map")]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub has_inputs: bool,
    #[serde(default)]
    pub has_button: bool,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Rendered with a non-zero box.
    pub fn is_rendered(&self) -> bool {
        self.rect.width > 0.0 && self.rect.height > 0.0
    }

    pub fn text_lower(&self) -> String {
        self.text.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCard {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub easy_apply: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub text: String,
    pub value: String,
    #[serde(default)]
    pub selected: bool,
}

/// Raw label candidates collected in the page; the priority order is decided
/// on the Rust side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelHints {
    #[serde(default)]
    pub for_label: Option<String>,
    #[serde(default)]
    pub ancestor_label: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub labelled_by: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub previous_sibling: Option<String>,
    #[serde(default)]
    pub container_heading: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHints {
    #[serde(default)]
    pub legend: Option<String>,
    #[serde(default)]
    pub heading: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub handle: u32,
    /// Lowercase tag name: `input`, `textarea` or `select`.
    pub tag: String,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<FieldOption>,
    #[serde(default)]
    pub hints: LabelHints,
    #[serde(default)]
    pub group: GroupHints,
}

impl FieldInfo {
    /// `name`, falling back to `id`.
    pub fn field_key(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.id.as_deref().filter(|s| !s.is_empty()))
    }

    pub fn kind(&self) -> &str {
        match self.tag.as_str() {
            "input" => self.input_type.as_deref().unwrap_or("text"),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}
