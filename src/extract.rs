//! Answer and citation extraction from the raw response document.
//!
//! The response is treated as an untrusted, arbitrarily nested JSON value.
//! Extraction is lenient throughout: malformed or type-mismatched data is
//! skipped, never raised as an error. Termination over the generic object
//! graph is guaranteed twice over, by a visited set keyed on node identity
//! and by a hard visitation budget.

use std::collections::{HashSet, VecDeque};

use serde_json::{Map, Value};
use url::Url;

/// Hard cap on visited nodes during the fallback traversal. Identity-based
/// cycle detection alone does not bound breadth on enormous documents.
const NODE_BUDGET: usize = 5000;
const TITLE_LIMIT: usize = 240;
const WEB_SEARCH_MARKER: &str = "web_search";

/// One citation backing the generated answer. Identity for deduplication is
/// the normalized absolute URL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Trimmed, whitespace-collapsed title, at most 240 characters.
    pub title: String,
    /// Normalized absolute http(s) URL.
    pub url: String,
    /// Lowercase hostname with any leading `www.` removed.
    pub host: String,
}

/// The value returned to the caller: answer text plus ordered citations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Pulls answer text and a filtered, deduplicated source list out of the
/// parsed response document.
pub(crate) fn extract_answer(doc: &Value, allowed_domains: &[String], max_sources: usize) -> Answer {
    Answer {
        text: extract_text(doc),
        sources: extract_sources(doc, allowed_domains, max_sources),
    }
}

/// Prefers the consolidated top-level `output_text`; otherwise concatenates
/// every text fragment inside message-type output items, in document order.
fn extract_text(doc: &Value) -> String {
    if let Some(text) = doc.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut fragments: Vec<&str> = Vec::new();
    if let Some(output) = doc.get("output").and_then(Value::as_array) {
        for item in output {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            if let Some(content) = item.get("content").and_then(Value::as_array) {
                for entry in content {
                    if let Some(text) = entry.get("text").and_then(Value::as_str) {
                        if !text.trim().is_empty() {
                            fragments.push(text);
                        }
                    }
                }
            }
        }
    }
    fragments.join("\n").trim().to_string()
}

fn extract_sources(doc: &Value, allowed_domains: &[String], max_sources: usize) -> Vec<Source> {
    let mut collector = SourceCollector {
        allowed_domains,
        max_sources,
        seen_urls: HashSet::new(),
        sources: Vec::new(),
    };

    // Phase 1: top-level output items declaring a web-search tool call.
    if let Some(output) = doc.get("output").and_then(Value::as_array) {
        for item in output {
            if collector.full() {
                break;
            }
            let is_search_call = item
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.contains(WEB_SEARCH_MARKER));
            if is_search_call {
                collector.scan(item);
            }
        }
    }

    // Phase 2: generic breadth-first sweep of the whole document.
    if !collector.full() {
        traverse(doc, &mut collector);
    }

    let mut sources = collector.sources;
    sources.truncate(max_sources);
    sources
}

/// Accumulates accepted sources up to the configured cap, deduplicating by
/// normalized URL (first occurrence wins).
struct SourceCollector<'a> {
    allowed_domains: &'a [String],
    max_sources: usize,
    seen_urls: HashSet<String>,
    sources: Vec<Source>,
}

impl SourceCollector<'_> {
    fn full(&self) -> bool {
        self.sources.len() >= self.max_sources
    }

    /// Scans the three well-known candidate locations on one node, in
    /// priority order: the action's source list, a direct source list, and
    /// per-result entries. A result entry without a nested `sources` list
    /// is deliberately tried as a candidate itself: current provider
    /// deployments put `url`/`title` inline on each result.
    fn scan(&mut self, node: &Value) {
        if let Some(candidates) = node.pointer("/action/sources").and_then(Value::as_array) {
            for candidate in candidates {
                self.accept(candidate);
            }
        }
        if let Some(candidates) = node.get("sources").and_then(Value::as_array) {
            for candidate in candidates {
                self.accept(candidate);
            }
        }
        if let Some(results) = node.get("results").and_then(Value::as_array) {
            for result in results {
                if let Some(candidates) = result.get("sources").and_then(Value::as_array) {
                    for candidate in candidates {
                        self.accept(candidate);
                    }
                } else {
                    self.accept(result);
                }
            }
        }
    }

    fn accept(&mut self, candidate: &Value) {
        if self.full() {
            return;
        }
        let Some(raw_url) = candidate.get("url").and_then(Value::as_str) else {
            return;
        };
        let Ok(url) = Url::parse(raw_url.trim()) else {
            return;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return;
        }
        let Some(raw_host) = url.host_str() else {
            return;
        };
        let lowered = raw_host.to_lowercase();
        let host = lowered.strip_prefix("www.").unwrap_or(&lowered).to_string();

        if !self.allowed_domains.is_empty()
            && !self
                .allowed_domains
                .iter()
                .any(|allowed| host_matches(&host, allowed))
        {
            return;
        }

        let normalized = url.to_string();
        if !self.seen_urls.insert(normalized.clone()) {
            return;
        }

        let title = candidate
            .get("title")
            .and_then(Value::as_str)
            .map(clean_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| host.clone());

        self.sources.push(Source {
            title,
            url: normalized,
            host,
        });
    }
}

/// Exact match or subdomain of an allow-listed entry.
fn host_matches(host: &str, allowed: &str) -> bool {
    host == allowed
        || (host.len() > allowed.len()
            && host.ends_with(allowed)
            && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
}

fn clean_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > TITLE_LIMIT {
        collapsed.chars().take(TITLE_LIMIT).collect()
    } else {
        collapsed
    }
}

/// Breadth-first worklist over the document as a generic object graph. The
/// "within web-search context" flag is set by a node's `type`/`tool`/`name`
/// field or by the key under which a child was reached, and is inherited by
/// all descendants; flagged nodes get the same three-location scan as
/// phase 1.
fn traverse(doc: &Value, collector: &mut SourceCollector<'_>) {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut queue: VecDeque<(&Value, bool)> = VecDeque::new();
    queue.push_back((doc, false));
    let mut budget = NODE_BUDGET;

    while let Some((node, inherited)) = queue.pop_front() {
        if collector.full() || budget == 0 {
            return;
        }
        budget -= 1;
        if !visited.insert(node as *const Value as usize) {
            continue;
        }

        match node {
            Value::Object(map) => {
                let in_context = inherited || marks_web_search(map);
                if in_context {
                    collector.scan(node);
                }
                for (key, child) in map {
                    let child_context = in_context || key.contains(WEB_SEARCH_MARKER);
                    queue.push_back((child, child_context));
                }
            }
            Value::Array(items) => {
                for child in items {
                    queue.push_back((child, inherited));
                }
            }
            _ => {}
        }
    }
}

fn marks_web_search(map: &Map<String, Value>) -> bool {
    ["type", "tool", "name"].iter().any(|field| {
        map.get(*field)
            .and_then(Value::as_str)
            .is_some_and(|v| v.contains(WEB_SEARCH_MARKER))
    })
}
