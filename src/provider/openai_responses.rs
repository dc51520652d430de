//! OpenAI Responses API backend, including background mode and stream resumption.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::SidestreamConfig;
use crate::error::SidestreamError;
use crate::types::{InputItem, Role};
use crate::util::RetryPolicy;

use super::http::{bearer_headers, shared_client, status_to_error};
use super::sse::backend_events;
use super::{CompletionBackend, EventStream, ProviderRequest, ResponseSnapshot};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiResponsesBackend {
    api_key: String,
    base_url: String,
    default_model: String,
    retry: RetryPolicy,
}

impl OpenAiResponsesBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            default_model: default_model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_config(config: &SidestreamConfig) -> Result<Self, SidestreamError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SidestreamError::Authentication("Missing OPENAI_API_KEY".into()))?;
        Ok(Self::new(api_key, config.base_url.clone(), config.model.clone()).with_retry(config.retry.clone()))
    }

    pub(crate) fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let mut obj = Map::new();
        obj.insert("model".into(), model.into());
        obj.insert("instructions".into(), request.instructions.clone().into());
        obj.insert("stream".into(), true.into());

        if request.background {
            // Background responses must be stored to be retrievable later.
            obj.insert("background".into(), true.into());
            obj.insert("store".into(), true.into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": normalize_tool_parameters(&t.parameters),
                            "strict": false,
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
                obj.insert("tool_choice".into(), "auto".into());
            }
        }

        if let Some(effort) = request.reasoning_effort {
            obj.insert(
                "reasoning".into(),
                json!({ "effort": effort.to_string(), "summary": "auto" }),
            );
        }
        if !request.metadata.is_empty() {
            obj.insert("metadata".into(), json!(request.metadata));
        }
        if let Some(ref user) = request.user {
            obj.insert("user".into(), user.clone().into());
        }

        // Input goes last so the static prefix stays cacheable.
        obj.insert("input".into(), Value::Array(build_input_items(&request.input)));
        Value::Object(obj)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn open_stream(&self, request: reqwest::RequestBuilder) -> Result<EventStream, SidestreamError> {
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(backend_events(resp.bytes_stream()))
    }

    async fn fetch_snapshot(&self, request: reqwest::RequestBuilder) -> Result<ResponseSnapshot, SidestreamError> {
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        let data: Value = resp.json().await?;
        Ok(ResponseSnapshot::from_json(&data))
    }
}

fn build_input_items(items: &[InputItem]) -> Vec<Value> {
    items
        .iter()
        .map(|item| match item {
            InputItem::Message(msg) => {
                let role = match msg.role {
                    Role::System => "developer",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            }
            InputItem::BackendOutput { item } => item.clone(),
            InputItem::FunctionCallOutput { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
        })
        .collect()
}

fn normalize_tool_parameters(schema: &Value) -> Value {
    match schema.as_object() {
        Some(obj) => {
            let mut next = obj.clone();
            if matches!(next.get("type"), Some(Value::String(t)) if t == "object") {
                next.entry("properties")
                    .or_insert_with(|| Value::Object(Default::default()));
                next.entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
            }
            Value::Object(next)
        }
        None => json!({ "type": "object", "properties": {} }),
    }
}

#[async_trait]
impl CompletionBackend for OpenAiResponsesBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<EventStream, SidestreamError> {
        let body = self.build_request_body(request);
        let url = self.url("responses");
        debug!(
            model = %body["model"],
            background = request.background,
            input_items = request.input.len(),
            tools = request.tools.as_ref().map_or(0, |t| t.len()),
            "OpenAI Responses stream"
        );
        self.retry
            .execute(|| {
                let req = shared_client()
                    .post(&url)
                    .headers(bearer_headers(&self.api_key, true))
                    .json(&body);
                self.open_stream(req)
            })
            .await
    }

    async fn resume(
        &self,
        response_id: &str,
        starting_after: Option<u64>,
    ) -> Result<EventStream, SidestreamError> {
        let url = self.url(&format!("responses/{response_id}"));
        debug!(response_id, starting_after, "OpenAI Responses resume");
        self.retry
            .execute(|| {
                let mut query: Vec<(&str, String)> = vec![("stream", "true".to_string())];
                if let Some(after) = starting_after {
                    query.push(("starting_after", after.to_string()));
                }
                let req = shared_client()
                    .get(&url)
                    .headers(bearer_headers(&self.api_key, true))
                    .query(&query);
                self.open_stream(req)
            })
            .await
    }

    async fn retrieve(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError> {
        let url = self.url(&format!("responses/{response_id}"));
        self.retry
            .execute(|| {
                let req = shared_client()
                    .get(&url)
                    .headers(bearer_headers(&self.api_key, false));
                self.fetch_snapshot(req)
            })
            .await
    }

    async fn cancel(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError> {
        let url = self.url(&format!("responses/{response_id}/cancel"));
        debug!(response_id, "OpenAI Responses cancel");
        let req = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key, false));
        self.fetch_snapshot(req).await
    }
}
