//! The client: validation, the retry loop, and the compatibility fallback.
//!
//! One call to [`Client::answer`] drives the whole pipeline: normalize
//! options, build the payload once, attempt the exchange under the retry
//! policy, then extract the answer and its citations. Each call carries its
//! own payload and attempt state, so concurrent calls are independent.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::config::{Config, RawOptions, WebAccess};
use crate::error::ClientError;
use crate::events::{EventSink, TracingSink};
use crate::extract::{Answer, extract_answer};
use crate::request::Payload;
use crate::transport::{ReqwestTransport, Transport, perform_call};

/// Builds a [`Client`] from an option bag plus injected collaborators.
pub struct ClientBuilder {
    options: RawOptions,
    api_key: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            options: RawOptions::default(),
            api_key: None,
            transport: None,
            sink: None,
        }
    }
}

impl ClientBuilder {
    /// Raw request-shaping options; normalized once at [`build`](Self::build).
    pub fn options(mut self, options: RawOptions) -> Self {
        self.options = options;
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the default [`ReqwestTransport`].
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Overrides the default [`TracingSink`].
    pub fn event_sink<S>(mut self, sink: S) -> Self
    where
        S: EventSink + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        let config = Config::from_options(&self.options);

        let api_key = resolve_api_key(
            self.api_key,
            std::env::var("GROUNDED_API_KEY").ok(),
            std::env::var("OPENAI_API_KEY").ok(),
        )
        .ok_or_else(|| {
            ClientError::Validation(
                "API key is not set (GROUNDED_API_KEY or OPENAI_API_KEY)".to_string(),
            )
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        Ok(Client {
            config,
            api_key,
            transport,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        })
    }
}

/// Resilient client for a search-grounded answer-generation endpoint.
///
/// Holds no per-call state; a single instance may serve concurrent calls.
pub struct Client {
    config: Config,
    api_key: String,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submits one query and returns the answer text with its citations.
    ///
    /// Retry policy: up to `max_retries` re-attempts on retryable failures
    /// with linear backoff (`retry_delay × attempt number`), plus at most
    /// one compatibility fallback per call that strips the extended tool
    /// fields and re-attempts without consuming the retry budget.
    pub async fn answer(&self, query: &str) -> Result<Answer, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::Validation("query must not be blank".to_string()));
        }
        if self.config.web_access == WebAccess::Disabled {
            return Err(ClientError::Validation(
                "external web access is disabled".to_string(),
            ));
        }

        self.emit(
            "start",
            json!({"model": self.config.model, "query_chars": query.chars().count()}),
        );

        let mut payload = Payload::build(query, &self.config);
        let mut fallback_used = false;
        // `retries` counts consumed retry budget; `calls` counts every
        // transport exchange, including the free compatibility re-attempt.
        let mut retries: u32 = 0;
        let mut calls: u32 = 0;

        let doc = loop {
            calls += 1;
            self.emit("attempt", json!({"attempt": calls}));
            let started = Instant::now();

            match perform_call(self.transport.as_ref(), &self.config, &self.api_key, &payload).await
            {
                Ok(doc) => {
                    self.emit(
                        "success",
                        json!({
                            "attempt": calls,
                            "elapsed_ms": started.elapsed().as_millis() as u64,
                        }),
                    );
                    break doc;
                }
                Err(err) => {
                    if !fallback_used && is_compatibility_rejection(&err, &payload) {
                        fallback_used = true;
                        payload.strip_extended_fields();
                        self.emit("compatibility_fallback", json!({"cause": err.to_string()}));
                        continue;
                    }

                    if err.is_retryable() && retries < self.config.max_retries {
                        retries += 1;
                        let delay = self.config.retry_delay * retries;
                        self.emit(
                            "retryable_error",
                            json!({"attempt": calls, "error": err.to_string()}),
                        );
                        self.emit("retry_wait", json!({"delay_ms": delay.as_millis() as u64}));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(ClientError::AttemptsExhausted {
                        attempts: calls,
                        source: Box::new(err),
                    });
                }
            }
        };

        let answer = extract_answer(&doc, &self.config.allowed_domains, self.config.max_sources);
        self.emit("sources_collected", json!({"count": answer.sources.len()}));
        if answer.sources.len() < self.config.min_sources {
            // Soft policy: observable, never a hard failure.
            self.emit(
                "sources_insufficient",
                json!({
                    "found": answer.sources.len(),
                    "minimum": self.config.min_sources,
                }),
            );
        }

        Ok(answer)
    }

    fn emit(&self, name: &str, fields: serde_json::Value) {
        let _ = self.sink.event(name, &fields);
    }
}

/// First non-blank credential wins: explicit key, then `GROUNDED_API_KEY`,
/// then `OPENAI_API_KEY`. A variable exported as empty or whitespace never
/// shadows a later source.
fn resolve_api_key(
    explicit: Option<String>,
    primary: Option<String>,
    fallback: Option<String>,
) -> Option<String> {
    [explicit, primary, fallback]
        .into_iter()
        .flatten()
        .find(|key| !key.trim().is_empty())
}

/// An HTTP 400 whose message names one of the extended tool fields, while
/// the payload still carries them. Internal classification only; a second
/// such rejection is treated as a normal HTTP error.
fn is_compatibility_rejection(err: &ClientError, payload: &Payload) -> bool {
    let ClientError::Http {
        status: 400,
        message,
        ..
    } = err
    else {
        return false;
    };
    payload.has_extended_fields()
        && (message.contains("allowed_domains") || message.contains("external_web_access"))
}

#[cfg(test)]
mod tests;
