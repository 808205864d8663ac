//! Option normalization.
//!
//! [`Config`] is built once per client from a [`RawOptions`] bag and is
//! immutable afterwards. Normalization never fails: every malformed or
//! out-of-range value degrades to a documented default or clamp, so a
//! [`Config`] always holds legal values.

use url::Url;

/// Default include directive inserted when the caller supplies none.
pub const DEFAULT_INCLUDE: &str = "web_search_call.action.sources";

const DEFAULT_MODEL: &str = "gpt-5";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";

/// Raw, unvalidated option bag, as received from caller code or the
/// process environment. Every field is optional; [`Config::from_options`]
/// supplies defaults.
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_ms: Option<String>,
    pub max_retries: Option<String>,
    pub retry_delay_ms: Option<String>,
    pub tool_choice: Option<String>,
    pub search_context_size: Option<String>,
    pub reasoning_effort: Option<String>,
    pub include: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub web_access: Option<String>,
    pub max_tool_calls: Option<String>,
    pub min_sources: Option<String>,
    pub max_sources: Option<String>,
}

impl RawOptions {
    /// Reads `GROUNDED_*` environment variables into an option bag.
    ///
    /// List-valued variables (`GROUNDED_INCLUDE`, `GROUNDED_ALLOWED_DOMAINS`)
    /// are comma-separated. The environment is read once, here; nothing else
    /// in the crate consults it at request time.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let list = |name: &str| {
            std::env::var(name)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|entry| !entry.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            model: var("GROUNDED_MODEL"),
            endpoint: var("GROUNDED_ENDPOINT"),
            timeout_ms: var("GROUNDED_TIMEOUT_MS"),
            max_retries: var("GROUNDED_MAX_RETRIES"),
            retry_delay_ms: var("GROUNDED_RETRY_DELAY_MS"),
            tool_choice: var("GROUNDED_TOOL_CHOICE"),
            search_context_size: var("GROUNDED_SEARCH_CONTEXT_SIZE"),
            reasoning_effort: var("GROUNDED_REASONING_EFFORT"),
            include: list("GROUNDED_INCLUDE"),
            allowed_domains: list("GROUNDED_ALLOWED_DOMAINS"),
            country: var("GROUNDED_COUNTRY"),
            region: var("GROUNDED_REGION"),
            city: var("GROUNDED_CITY"),
            timezone: var("GROUNDED_TIMEZONE"),
            web_access: var("GROUNDED_WEB_ACCESS"),
            max_tool_calls: var("GROUNDED_MAX_TOOL_CALLS"),
            min_sources: var("GROUNDED_MIN_SOURCES"),
            max_sources: var("GROUNDED_MAX_SOURCES"),
        }
    }
}

/// How the provider may use the web-search tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
            ToolChoice::None => "none",
        }
    }

    fn parse(raw: Option<&str>, default: ToolChoice) -> ToolChoice {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("auto") => ToolChoice::Auto,
            Some("required") => ToolChoice::Required,
            Some("none") => ToolChoice::None,
            _ => default,
        }
    }
}

/// How much page content the provider feeds the model per search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextSize {
    Low,
    #[default]
    Medium,
    High,
}

impl ContextSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextSize::Low => "low",
            ContextSize::Medium => "medium",
            ContextSize::High => "high",
        }
    }

    fn parse(raw: Option<&str>, default: ContextSize) -> ContextSize {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("low") => ContextSize::Low,
            Some("medium") => ContextSize::Medium,
            Some("high") => ContextSize::High,
            _ => default,
        }
    }
}

/// Reasoning effort requested from the model. `Unspecified` omits the
/// reasoning block from the payload entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
    #[default]
    Unspecified,
}

impl ReasoningEffort {
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            ReasoningEffort::Minimal => Some("minimal"),
            ReasoningEffort::Low => Some("low"),
            ReasoningEffort::Medium => Some("medium"),
            ReasoningEffort::High => Some("high"),
            ReasoningEffort::XHigh => Some("xhigh"),
            ReasoningEffort::Unspecified => None,
        }
    }

    fn parse(raw: Option<&str>, default: ReasoningEffort) -> ReasoningEffort {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("minimal") => ReasoningEffort::Minimal,
            Some("low") => ReasoningEffort::Low,
            Some("medium") => ReasoningEffort::Medium,
            Some("high") => ReasoningEffort::High,
            Some("xhigh") => ReasoningEffort::XHigh,
            Some("none") => ReasoningEffort::Unspecified,
            _ => default,
        }
    }
}

/// Tri-state external web access flag. `Unspecified` is distinct from
/// `Disabled` and omits the field from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebAccess {
    Enabled,
    Disabled,
    #[default]
    Unspecified,
}

impl WebAccess {
    fn parse(raw: Option<&str>) -> WebAccess {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => WebAccess::Enabled,
            Some("0" | "false" | "no" | "off") => WebAccess::Disabled,
            _ => WebAccess::Unspecified,
        }
    }
}

/// Approximate user location forwarded to the search tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserLocation {
    /// ISO-3166 alpha-2 country code, uppercase.
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
}

impl UserLocation {
    fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.region.is_none()
            && self.city.is_none()
            && self.timezone.is_none()
    }
}

/// Fully-validated request-shaping parameters. Every field always holds a
/// legal value; see [`Config::from_options`] for the clamps and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub model: String,
    pub endpoint: String,
    /// Per-attempt deadline, clamped to [1000, 600000] ms.
    pub timeout: std::time::Duration,
    /// Additional attempts after the first, clamped to [0, 2].
    pub max_retries: u32,
    /// Linear backoff base, clamped to [100, 30000] ms.
    pub retry_delay: std::time::Duration,
    pub tool_choice: ToolChoice,
    pub search_context_size: ContextSize,
    pub reasoning_effort: ReasoningEffort,
    /// Deduplicated, first-seen order; never empty.
    pub include: Vec<String>,
    /// Normalized bare hostnames, deduplicated; may be empty.
    pub allowed_domains: Vec<String>,
    pub user_location: Option<UserLocation>,
    pub web_access: WebAccess,
    /// 0 means "no cap", omitted from the payload.
    pub max_tool_calls: u32,
    pub min_sources: usize,
    /// Always >= `min_sources`.
    pub max_sources: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_options(&RawOptions::default())
    }
}

impl Config {
    /// Normalizes a raw option bag. Pure and deterministic; never fails.
    pub fn from_options(raw: &RawOptions) -> Config {
        let timeout_ms = clamped_int(raw.timeout_ms.as_deref(), 60_000, 1_000, 600_000);
        let retry_delay_ms = clamped_int(raw.retry_delay_ms.as_deref(), 1_000, 100, 30_000);
        let min_sources = clamped_int(raw.min_sources.as_deref(), 1, 0, 20) as usize;
        let max_sources = (clamped_int(raw.max_sources.as_deref(), 10, 1, 50) as usize)
            .max(min_sources);

        Config {
            model: non_blank(raw.model.as_deref(), DEFAULT_MODEL),
            endpoint: non_blank(raw.endpoint.as_deref(), DEFAULT_ENDPOINT),
            timeout: std::time::Duration::from_millis(timeout_ms),
            max_retries: clamped_int(raw.max_retries.as_deref(), 1, 0, 2) as u32,
            retry_delay: std::time::Duration::from_millis(retry_delay_ms),
            tool_choice: ToolChoice::parse(raw.tool_choice.as_deref(), ToolChoice::Auto),
            search_context_size: ContextSize::parse(
                raw.search_context_size.as_deref(),
                ContextSize::Medium,
            ),
            reasoning_effort: ReasoningEffort::parse(
                raw.reasoning_effort.as_deref(),
                ReasoningEffort::Unspecified,
            ),
            include: normalize_include(&raw.include),
            allowed_domains: normalize_domains(&raw.allowed_domains),
            user_location: normalize_location(raw),
            web_access: WebAccess::parse(raw.web_access.as_deref()),
            max_tool_calls: clamped_int(raw.max_tool_calls.as_deref(), 0, 0, 50) as u32,
            min_sources,
            max_sources,
        }
    }
}

/// Parses a numeric string (integer or float spelling), rounds it, and
/// clamps it into `[min, max]`. Unparseable input yields `default`.
fn clamped_int(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            let rounded = value.round();
            if rounded <= min as f64 {
                min
            } else if rounded >= max as f64 {
                max
            } else {
                rounded as u64
            }
        }
        _ => default,
    }
}

fn non_blank(raw: Option<&str>, default: &str) -> String {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn normalize_include(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for entry in raw {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !seen.iter().any(|existing: &String| existing.as_str() == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    if seen.is_empty() {
        seen.push(DEFAULT_INCLUDE.to_string());
    }
    seen
}

fn normalize_domains(raw: &[String]) -> Vec<String> {
    let mut domains = Vec::new();
    for entry in raw {
        let Some(host) = normalize_domain(entry) else {
            continue;
        };
        if !domains.contains(&host) {
            domains.push(host);
        }
    }
    domains
}

/// Parses one allow-list entry (bare domain or full URL) into a lowercase
/// hostname with any leading `www.` removed. Returns `None` for anything
/// that does not look like a hostname.
pub(crate) fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }

    let host = if trimmed.contains("://") {
        Url::parse(&trimmed).ok()?.host_str()?.to_string()
    } else {
        trimmed.split('/').next()?.to_string()
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let valid = !host.is_empty()
        && host.contains('.')
        && !host.starts_with(['.', '-'])
        && !host.ends_with(['.', '-'])
        && host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    valid.then(|| host.to_string())
}

fn normalize_location(raw: &RawOptions) -> Option<UserLocation> {
    let country = raw.country.as_deref().and_then(|value| {
        let trimmed = value.trim();
        (trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()))
            .then(|| trimmed.to_ascii_uppercase())
    });
    let free_text = |value: Option<&str>| {
        value.map(str::trim).filter(|v| !v.is_empty()).map(|v| {
            if v.chars().count() > 80 {
                v.chars().take(80).collect()
            } else {
                v.to_string()
            }
        })
    };

    let location = UserLocation {
        country,
        region: free_text(raw.region.as_deref()),
        city: free_text(raw.city.as_deref()),
        timezone: free_text(raw.timezone.as_deref()),
    };
    (!location.is_empty()).then_some(location)
}
