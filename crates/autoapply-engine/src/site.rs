//! Site driver data: every selector list, URL pattern and phrase list the
//! orchestrator needs for one job board. Order within a list is priority.

use crate::config::SiteConfig;
use autoapply_common::protocol::CardRequest;
use url::Url;

type List = &'static [&'static str];

#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub base_url: Url,
    pub auth_url: Url,
    /// Registrable domain; any host equal to it or below it is on-site.
    pub domain: &'static str,
    /// Host of the third-party identity provider used for sign-in.
    pub identity_host: &'static str,
    /// URL fragments that mean the browser was sent to a sign-in page.
    pub sign_in_markers: List,

    pub nav_ready: &'static str,
    pub account_selectors: List,
    pub avatar_selectors: List,
    pub sign_in_selectors: List,
    pub sign_in_texts: List,
    pub email_input: &'static str,
    pub identifier_next: &'static str,

    pub search_path: &'static str,
    pub job_id_param: &'static str,
    pub card_selectors: List,
    pub title_selectors: List,
    pub company_selectors: List,
    pub location_selectors: List,
    pub salary_selectors: List,
    pub snippet_selectors: List,
    pub link_selectors: List,
    pub easy_apply_selectors: List,
    pub easy_apply_phrase: &'static str,

    pub description_selectors: List,
    pub external_phrases: List,
    pub external_link_selectors: List,
    pub external_candidates: List,

    pub apply_area: List,
    pub apply_selectors: List,
    pub apply_candidates: List,
    pub apply_texts: List,
    pub apply_skip_texts: List,

    pub full_page_patterns: List,
    pub form_containers: List,
    pub form_selectors: List,
    pub action_candidates: List,
    pub action_texts: List,
    pub apply_iframes: List,

    pub question_containers: List,
    pub file_inputs: List,
    pub next_selectors: List,
    pub next_candidates: List,
    pub next_texts: List,
    pub next_skip_texts: List,
    pub submit_texts: List,

    pub success_phrases: List,
}

impl SiteProfile {
    pub fn indeed(config: &SiteConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            auth_url: Url::parse(&config.auth_url)?,
            domain: "indeed.com",
            identity_host: "accounts.google.com",
            sign_in_markers: &["secure.indeed.com/auth", "/auth?", "/login"],

            nav_ready: "nav, header, #gnav, [data-gnav-region]",
            account_selectors: &[
                "[data-gnav-element-name=\"Account\"]",
                "#AccountMenu",
                ".gnav-Account",
                "[data-testid=\"gnav-Account\"]",
                "[data-gnav-element-name=\"MyJobs\"]",
                "a[href*=\"/myjobs\"]",
                "a[href*=\"/myaccount\"]",
            ],
            avatar_selectors: &[
                ".gnav-Avatar",
                "[data-testid=\"avatar\"]",
                "img[alt*=\"profile\"]",
            ],
            sign_in_selectors: &[
                "button[data-tn-element=\"google-login-button\"]",
                "[data-testid=\"google-login-button\"]",
                "button[id*=\"google\"]",
                "a[href*=\"accounts.google.com\"]",
                "button[aria-label*=\"Google\"]",
                "div[data-provider=\"google\"] button",
            ],
            sign_in_texts: &["continue with google", "sign in with google", "google"],
            email_input: "input[type=\"email\"]",
            identifier_next: "#identifierNext",

            search_path: "/jobs",
            job_id_param: "jk",
            card_selectors: &[
                "div.job_seen_beacon",
                "div.jobsearch-SerpJobCard",
                "div[data-jk]",
                ".resultContent",
                ".tapItem",
            ],
            title_selectors: &[
                "h2.jobTitle a",
                "h2.jobTitle span",
                "a[data-jk] span[title]",
                ".jobTitle a",
                "a.jcs-JobTitle",
            ],
            company_selectors: &[
                "span[data-testid=\"company-name\"]",
                "span.companyName",
                ".companyName",
                "[data-testid=\"company-name\"]",
            ],
            location_selectors: &[
                "div[data-testid=\"text-location\"]",
                "div.companyLocation",
                ".companyLocation",
            ],
            salary_selectors: &[
                "div.salary-snippet",
                ".salaryText",
                "div[data-testid=\"attribute_snippet_testid\"]",
            ],
            snippet_selectors: &[".job-snippet", "div[data-testid=\"jobsnippet_footer\"]"],
            link_selectors: &["a[data-jk]", "h2.jobTitle a", ".jobTitle a", "a.jcs-JobTitle"],
            easy_apply_selectors: &[
                ".iaLabel",
                ".ialbl",
                "[data-testid=\"indeedApply\"]",
                ".indeed-apply-badge",
            ],
            easy_apply_phrase: "easily apply",

            description_selectors: &["#jobDescriptionText", ".jobsearch-jobDescriptionText"],
            external_phrases: &[
                "apply on company site",
                "apply on employer site",
                "continue to apply",
                "apply externally",
            ],
            external_link_selectors: &[
                "#applyButtonLinkContainer a[target=\"_blank\"]",
                ".jobsearch-IndeedApplyButton a[target=\"_blank\"]",
            ],
            external_candidates: &["button", "a"],

            apply_area: &[
                ".jobsearch-ViewJobButtons-container",
                "#applyButtonLinkContainer",
                ".jobsearch-IndeedApplyButton-newDesign",
            ],
            apply_selectors: &[
                "#indeedApplyButton",
                "button#indeedApplyButton",
                ".jobsearch-IndeedApplyButton-newDesign",
                "button.jobsearch-IndeedApplyButton-newDesign",
                "[data-testid=\"indeedApplyButton\"]",
                "button[data-testid=\"indeedApplyButton\"]",
                ".indeed-apply-button",
                "button.indeed-apply-button",
                "#applyButtonLinkContainer button",
                "#applyButtonLinkContainer a",
                ".jobsearch-IndeedApplyButton button",
                ".ia-IndeedApplyButton",
                "button[aria-label*=\"Apply\"]",
                "a[aria-label*=\"Apply\"]",
                "button[class*=\"apply\"]",
                "button[class*=\"Apply\"]",
            ],
            apply_candidates: &["button", "a", "[role=\"button\"]"],
            apply_texts: &["apply now", "easy apply", "apply on indeed", "indeed apply", "apply"],
            apply_skip_texts: &["save", "report", "share", "sign in to apply"],

            full_page_patterns: &[
                "/applystart",
                "/ia_apply",
                "smartapply",
                "/apply?",
                "/indeedapply/",
                "m5.apply.indeed",
            ],
            form_containers: &[
                ".indeed-apply-widget",
                ".ia-container",
                ".ia-BasePage",
                ".ia-BasePage-component",
                "[class*=\"IndeedApply\"]",
                "[class*=\"indeed-apply\"]",
                "[role=\"dialog\"]",
                ".icl-Modal",
                ".icl-Modal-content",
                "#ia-container",
                "#indeed-apply-container",
                ".jobsearch-ViewJobLayout-applyButtonContainer",
            ],
            form_selectors: &["form"],
            action_candidates: &["button", "[role=\"button\"]", "input[type=\"submit\"]"],
            action_texts: &[
                "continue",
                "submit application",
                "submit your application",
                "next",
                "review your application",
                "apply",
            ],
            apply_iframes: &[
                "iframe[id*=\"indeed-apply\"]",
                "iframe[id*=\"indeedApply\"]",
                "iframe[title*=\"Apply\"]",
                "iframe[title*=\"apply\"]",
                "iframe[src*=\"indeed\"]",
                "iframe[src*=\"apply\"]",
                "iframe.indeed-apply-iframe",
                "#indeed-apply-widget iframe",
                ".ia-container iframe",
                "iframe[name*=\"apply\"]",
            ],

            question_containers: &[
                ".ia-Questions-item",
                ".ia-BasePage-component",
                "[class*=\"question\"]",
            ],
            file_inputs: &["input[type=\"file\"]"],
            next_selectors: &[
                "button[type=\"submit\"]",
                "button[aria-label*=\"Continue\"]",
                "button[aria-label*=\"Submit\"]",
                "button[aria-label*=\"Next\"]",
                "button[data-testid*=\"continue\"]",
                "button[data-testid*=\"submit\"]",
            ],
            next_candidates: &["button", "[role=\"button\"]", "input[type=\"submit\"]", "a"],
            next_texts: &[
                "continue",
                "next",
                "submit your application",
                "submit application",
                "submit",
                "review",
            ],
            next_skip_texts: &["back", "cancel", "return", "previous"],
            submit_texts: &["submit"],

            success_phrases: &[
                "application has been submitted",
                "successfully applied",
                "application sent",
                "you applied",
                "your application has been",
                "application was submitted",
                "application is submitted",
                "thank you for applying",
                "thanks for applying",
                "application received",
                "we received your application",
                "already applied",
            ],
        })
    }

    /// Host equals the site domain or is a subdomain of it.
    pub fn is_on_site(&self, raw: &str) -> bool {
        match Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
            Some(host) => host == self.domain || host.ends_with(&format!(".{}", self.domain)),
            None => false,
        }
    }

    /// On the sign-in entry page (or redirected to a login page).
    pub fn is_sign_in_page(&self, raw: &str) -> bool {
        let lower = raw.to_lowercase();
        self.sign_in_markers.iter().any(|m| lower.contains(m))
    }

    pub fn is_identity_page(&self, raw: &str) -> bool {
        Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == self.identity_host))
            .unwrap_or(false)
    }

    pub fn is_full_page_apply(&self, raw: &str) -> bool {
        let lower = raw.to_lowercase();
        self.full_page_patterns.iter().any(|p| lower.contains(p))
    }

    pub fn contains_success_phrase(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.success_phrases.iter().any(|p| lower.contains(p))
    }

    pub fn home_url(&self) -> String {
        self.base_url.as_str().to_string()
    }

    /// Resolve a listing href against the site base.
    pub fn resolve(&self, href: &str) -> Option<String> {
        self.base_url.join(href).ok().map(String::from)
    }

    pub fn search_url(
        &self,
        query: &str,
        location: &str,
        job_type: Option<&str>,
        start: Option<u32>,
    ) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join(self.search_path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query).append_pair("l", location);
            if let Some(job_type) = job_type.filter(|t| !t.is_empty()) {
                pairs.append_pair("jt", job_type);
            }
            if let Some(start) = start.filter(|s| *s > 0) {
                pairs.append_pair("start", &start.to_string());
            }
        }
        Ok(url)
    }

    pub fn card_request(&self) -> CardRequest {
        CardRequest {
            card_selectors: owned(self.card_selectors),
            title: owned(self.title_selectors),
            company: owned(self.company_selectors),
            location: owned(self.location_selectors),
            salary: owned(self.salary_selectors),
            snippet: owned(self.snippet_selectors),
            link: owned(self.link_selectors),
            easy_apply: owned(self.easy_apply_selectors),
            easy_apply_phrase: Some(self.easy_apply_phrase.to_string()),
        }
    }
}

pub(crate) fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteProfile {
        SiteProfile::indeed(&SiteConfig::default()).unwrap()
    }

    #[test]
    fn search_url_encodes_parameters() {
        let url = site()
            .search_url("rust developer", "Cape Town", Some("fulltime"), Some(10))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://za.indeed.com/jobs?q=rust+developer&l=Cape+Town&jt=fulltime&start=10"
        );
        let url = site().search_url("rust", "", None, None).unwrap();
        assert_eq!(url.as_str(), "https://za.indeed.com/jobs?q=rust&l=");
    }

    #[test]
    fn on_site_matches_subdomains_only() {
        let site = site();
        assert!(site.is_on_site("https://za.indeed.com/viewjob?jk=1"));
        assert!(site.is_on_site("https://m5.apply.indeed.com/beta/indeedapply/form"));
        assert!(!site.is_on_site("https://careers.example.com/indeed.com"));
        assert!(!site.is_on_site("https://notindeed.com/"));
        assert!(!site.is_on_site("about:blank"));
    }

    #[test]
    fn sign_in_page_detection() {
        let site = site();
        assert!(site.is_sign_in_page("https://secure.indeed.com/auth?hl=en"));
        assert!(site.is_sign_in_page("https://za.indeed.com/account/login?dest=x"));
        assert!(!site.is_sign_in_page("https://za.indeed.com/"));
        assert!(site.is_identity_page("https://accounts.google.com/v3/signin"));
    }

    #[test]
    fn success_phrases_ignore_case() {
        assert!(site().contains_success_phrase("Your Application Has Been Submitted!"));
        assert!(!site().contains_success_phrase("Please answer the questions below"));
    }

    #[test]
    fn resolve_relative_listing_links() {
        assert_eq!(
            site().resolve("/rc/clk?jk=abc&from=serp").as_deref(),
            Some("https://za.indeed.com/rc/clk?jk=abc&from=serp")
        );
    }
}
