//! Outbound payload construction for the provider's responses endpoint.
//!
//! The payload is built once per logical call. Optional fields are emitted
//! only when they hold non-default values, so a default [`Config`] produces
//! the minimal valid request.

use serde::Serialize;

use crate::config::{Config, ToolChoice, UserLocation, WebAccess};

/// One provider request document. Owned by the retry loop; the compatibility
/// fallback strips the extended tool fields from it at most once.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    model: String,
    input: Vec<InputMessage>,
    tools: Vec<WebSearchTool>,
    tool_choice: &'static str,
    include: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tool_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct InputMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct WebSearchTool {
    #[serde(rename = "type")]
    type_: &'static str,
    search_context_size: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_location: Option<LocationParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_web_access: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct LocationParams {
    #[serde(rename = "type")]
    type_: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ReasoningParams {
    effort: &'static str,
}

impl Payload {
    /// Builds the minimal valid payload for a query under `config`.
    pub fn build(query: &str, config: &Config) -> Payload {
        let tool = WebSearchTool {
            type_: "web_search",
            search_context_size: config.search_context_size.as_str(),
            user_location: config.user_location.as_ref().map(location_params),
            allowed_domains: (!config.allowed_domains.is_empty())
                .then(|| config.allowed_domains.clone()),
            external_web_access: match config.web_access {
                WebAccess::Enabled => Some(true),
                WebAccess::Disabled => Some(false),
                WebAccess::Unspecified => None,
            },
        };

        let instructions = (!config.allowed_domains.is_empty()).then(|| {
            format!(
                "Restrict web searches and citations to these domains: {}.",
                config.allowed_domains.join(", ")
            )
        });

        Payload {
            model: config.model.clone(),
            input: vec![InputMessage {
                role: "user",
                content: query.to_string(),
            }],
            tools: vec![tool],
            tool_choice: ToolChoice::as_str(config.tool_choice),
            include: config.include.clone(),
            reasoning: config
                .reasoning_effort
                .as_str()
                .map(|effort| ReasoningParams { effort }),
            max_tool_calls: (config.max_tool_calls > 0).then_some(config.max_tool_calls),
            instructions,
        }
    }

    /// Whether the tool descriptor still carries the extended fields the
    /// compatibility fallback would remove.
    pub fn has_extended_fields(&self) -> bool {
        self.tools
            .iter()
            .any(|tool| tool.allowed_domains.is_some() || tool.external_web_access.is_some())
    }

    /// Removes the extended tool fields rejected by older provider
    /// deployments. Returns whether anything was stripped.
    pub fn strip_extended_fields(&mut self) -> bool {
        let mut stripped = false;
        for tool in &mut self.tools {
            stripped |= tool.allowed_domains.take().is_some();
            stripped |= tool.external_web_access.take().is_some();
        }
        stripped
    }
}

fn location_params(location: &UserLocation) -> LocationParams {
    LocationParams {
        type_: "approximate",
        country: location.country.clone(),
        region: location.region.clone(),
        city: location.city.clone(),
        timezone: location.timezone.clone(),
    }
}
