use async_trait::async_trait;
use parley_core::{
    CompletionBackend, CompletionRequest, CompletionResponse, ContextMessage, Role,
    ToolCallRequest, Usage,
};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Completion backend speaking the `/chat/completions` protocol with
/// function-style tool calls.
pub struct ChatCompletionsProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ChatCompletionsProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating ChatCompletionsProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, body: &Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsProvider {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let body = request_body(request);
        info!(
            "Sending completion request: model={}, messages={}, tools={}",
            request.options.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = parse_response(&self.send(&body).await?)?;
        debug!(
            "Received completion: text={}, tool_calls={}",
            response.text.is_some(),
            response.tool_calls.len()
        );
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

fn request_body(request: &CompletionRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(prompt) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": prompt}));
    }
    messages.extend(request.messages.iter().map(message_json));

    let mut body = json!({
        "model": request.options.model,
        "messages": messages,
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_tokens,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn message_json(message: &ContextMessage) -> Value {
    match message.role {
        Role::System => json!({"role": "system", "content": message.content_str()}),
        Role::User => json!({"role": "user", "content": message.content_str()}),
        Role::Assistant => {
            let mut value = json!({"role": "assistant", "content": message.content});
            if let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                value["tool_calls"] = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect();
            }
            value
        }
        Role::ToolResult => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content_str(),
        }),
    }
}

fn parse_response(response: &Value) -> anyhow::Result<CompletionResponse> {
    let message = &response["choices"][0]["message"];
    if !message.is_object() {
        anyhow::bail!("Invalid response format: missing message");
    }

    let text = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| parse_tool_call(index, call))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let usage = response["usage"].as_object().map(|u| Usage {
        prompt_tokens: u32::try_from(u["prompt_tokens"].as_u64().unwrap_or(0)).unwrap_or(0),
        completion_tokens: u32::try_from(u["completion_tokens"].as_u64().unwrap_or(0))
            .unwrap_or(0),
        total_tokens: u32::try_from(u["total_tokens"].as_u64().unwrap_or(0)).unwrap_or(0),
    });

    Ok(CompletionResponse {
        text,
        tool_calls,
        usage,
    })
}

fn parse_tool_call(index: usize, call: &Value) -> anyhow::Result<ToolCallRequest> {
    let function = &call["function"];
    let name = function["name"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid response format: tool call without name"))?;
    let id = call["id"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map_or_else(|| format!("call_{index}"), str::to_string);
    // Some providers send arguments as an object instead of a JSON string.
    let arguments = match &function["arguments"] {
        Value::String(raw) => raw.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    Ok(ToolCallRequest::new(id, name, arguments))
}
