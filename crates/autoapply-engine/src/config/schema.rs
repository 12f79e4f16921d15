use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `llm.max_retries`.
pub const MAX_LLM_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoApplyConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AutoApplyConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("site.base_url", &self.site.base_url),
            ("site.auth_url", &self.site.auth_url),
        ] {
            url::Url::parse(value).map_err(|e| format!("{}: {}", name, e))?;
        }
        if self.apply.max_steps == 0 {
            return Err("apply.max_steps must be at least 1".into());
        }
        if self.apply.context_attempts == 0 {
            return Err("apply.context_attempts must be at least 1".into());
        }
        if self.discovery.page_size == 0 {
            return Err("discovery.page_size must be at least 1".into());
        }
        if self.llm.max_retries > MAX_LLM_RETRIES {
            return Err(format!(
                "llm.max_retries must be at most {}",
                MAX_LLM_RETRIES
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_url: default_auth_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://za.indeed.com".into()
}

fn default_auth_url() -> String {
    "https://secure.indeed.com/auth".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Sign-in is completed by a human, so the window is shown by default.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Persistent profile so a sign-in survives between runs.
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: Option<PathBuf>,
    /// DevTools websocket or http endpoint of an already running browser.
    #[serde(default)]
    pub connect_url: Option<String>,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    #[serde(default = "default_eval_timeout_ms")]
    pub eval_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            visible: default_true(),
            user_data_dir: default_user_data_dir(),
            connect_url: None,
            chrome_executable: None,
            eval_timeout_ms: default_eval_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".autoapply").join("chrome-profile"))
}

fn default_eval_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_sign_in_navigation_ms")]
    pub sign_in_navigation_ms: u64,
    #[serde(default = "default_sign_in_timeout_ms")]
    pub sign_in_timeout_ms: u64,
    #[serde(default = "default_sign_in_poll_ms")]
    pub sign_in_poll_ms: u64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,
    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,
    #[serde(default = "default_between_applications_ms")]
    pub between_applications_ms: u64,
    #[serde(default = "default_after_error_ms")]
    pub after_error_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout_ms(),
            sign_in_navigation_ms: default_sign_in_navigation_ms(),
            sign_in_timeout_ms: default_sign_in_timeout_ms(),
            sign_in_poll_ms: default_sign_in_poll_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            network_idle_ms: default_network_idle_ms(),
            network_idle_timeout_ms: default_network_idle_timeout_ms(),
            between_applications_ms: default_between_applications_ms(),
            after_error_ms: default_after_error_ms(),
        }
    }
}

impl TimingConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn sign_in_navigation(&self) -> Duration {
        Duration::from_millis(self.sign_in_navigation_ms)
    }

    pub fn sign_in_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_in_timeout_ms)
    }

    pub fn sign_in_poll(&self) -> Duration {
        Duration::from_millis(self.sign_in_poll_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.network_idle_timeout_ms)
    }

    pub fn between_applications(&self) -> Duration {
        Duration::from_millis(self.between_applications_ms)
    }

    pub fn after_error(&self) -> Duration {
        Duration::from_millis(self.after_error_ms)
    }
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_sign_in_navigation_ms() -> u64 {
    45_000
}

fn default_sign_in_timeout_ms() -> u64 {
    300_000
}

fn default_sign_in_poll_ms() -> u64 {
    4_000
}

fn default_pause_poll_ms() -> u64 {
    2_500
}

fn default_network_idle_ms() -> u64 {
    1_000
}

fn default_network_idle_timeout_ms() -> u64 {
    5_000
}

fn default_between_applications_ms() -> u64 {
    5_000
}

fn default_after_error_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Fetch a second results page when the first yields fewer raw cards.
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_scroll_steps")]
    pub scroll_steps: u32,
    #[serde(default = "default_scroll_delta")]
    pub scroll_delta: i32,
    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_results: default_min_results(),
            page_size: default_page_size(),
            scroll_steps: default_scroll_steps(),
            scroll_delta: default_scroll_delta(),
            scroll_pause_ms: default_scroll_pause_ms(),
        }
    }
}

fn default_min_results() -> usize {
    15
}

fn default_page_size() -> u32 {
    10
}

fn default_scroll_steps() -> u32 {
    5
}

fn default_scroll_delta() -> i32 {
    500
}

fn default_scroll_pause_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_context_attempts")]
    pub context_attempts: u32,
    /// Base delay between form-context attempts; attempt `n` waits `n` times this.
    #[serde(default = "default_context_retry_ms")]
    pub context_retry_ms: u64,
    #[serde(default = "default_job_navigation_ms")]
    pub job_navigation_ms: u64,
    #[serde(default = "default_description_navigation_ms")]
    pub description_navigation_ms: u64,
    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,
    #[serde(default = "default_step_settle_ms")]
    pub step_settle_ms: u64,
    #[serde(default = "default_description_chars")]
    pub description_chars: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            context_attempts: default_context_attempts(),
            context_retry_ms: default_context_retry_ms(),
            job_navigation_ms: default_job_navigation_ms(),
            description_navigation_ms: default_description_navigation_ms(),
            click_settle_ms: default_click_settle_ms(),
            step_settle_ms: default_step_settle_ms(),
            description_chars: default_description_chars(),
        }
    }
}

impl ApplyConfig {
    pub fn context_retry(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.context_retry_ms * u64::from(attempt))
    }

    pub fn job_navigation(&self) -> Duration {
        Duration::from_millis(self.job_navigation_ms)
    }

    pub fn description_navigation(&self) -> Duration {
        Duration::from_millis(self.description_navigation_ms)
    }

    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }

    pub fn step_settle(&self) -> Duration {
        Duration::from_millis(self.step_settle_ms)
    }
}

fn default_max_steps() -> u32 {
    12
}

fn default_context_attempts() -> u32 {
    5
}

fn default_context_retry_ms() -> u64 {
    1_000
}

fn default_job_navigation_ms() -> u64 {
    25_000
}

fn default_description_navigation_ms() -> u64 {
    20_000
}

fn default_click_settle_ms() -> u64 {
    3_000
}

fn default_step_settle_ms() -> u64 {
    1_500
}

fn default_description_chars() -> usize {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_path")]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".autoapply").join("sessions.jsonl"))
}
