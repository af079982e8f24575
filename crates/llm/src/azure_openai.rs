//! Azure OpenAI chat-completions backend: a streamed
//! `chat.completions.create(stream=true, tools=..., tool_choice="auto")`
//! call over `reqwest`, with the same retry/backoff and `LlmConfig` shape
//! used elsewhere in this crate, re-pointed at Azure's REST surface.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use voice_agent_config::AzureOpenAiConfig;
use voice_agent_core::llm_types::{
    Delta, FinishReason, GenerateRequest, GenerateResponse, Message, Role, StreamChunk,
    ToolCall, ToolCallDelta, ToolDefinition, TokenUsage,
};
use voice_agent_core::traits::LanguageModel;
use voice_agent_core::Result as CoreResult;

use crate::LlmError;

/// How many times a retryable (network/5xx) request is retried before
/// giving up, and the initial exponential backoff delay.
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct AzureOpenAiBackend {
    client: Client,
    config: AzureOpenAiConfig,
    context_size: usize,
}

impl AzureOpenAiBackend {
    pub fn new(config: AzureOpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            config,
            context_size: 128_000,
        })
    }

    fn endpoint(&self) -> Result<String, LlmError> {
        let base = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| LlmError::Configuration("AZURE_OPENAI_ENDPOINT is not set".into()))?;
        let deployment = self.config.chat_deployment_id.as_deref().ok_or_else(|| {
            LlmError::Configuration("AZURE_OPENAI_CHAT_DEPLOYMENT_ID is not set".into())
        })?;
        let api_version = self
            .config
            .api_version
            .as_deref()
            .unwrap_or("2024-06-01");

        Ok(format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            base.trim_end_matches('/'),
            deployment,
            api_version
        ))
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.config
            .key
            .as_deref()
            .ok_or_else(|| LlmError::Configuration("AZURE_OPENAI_KEY is not set".into()))
    }

    fn build_request_body(&self, request: &GenerateRequest, stream: bool) -> AzureChatRequest {
        AzureChatRequest {
            messages: request.messages.iter().map(AzureMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| AzureToolSpec {
                            r#type: "function",
                            function: AzureFunctionSpec {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
            tool_choice: if request.tools.is_empty() { None } else { Some("auto") },
        }
    }

    async fn execute(&self, body: &AzureChatRequest) -> Result<AzureChatResponse, LlmError> {
        let resp = self
            .client
            .post(self.endpoint()?)
            .header("api-key", self.api_key()?)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("azure openai {status}: {text}")));
            }
            return Err(LlmError::Api(format!("azure openai {status}: {text}")));
        }

        resp.json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(err: &LlmError) -> bool {
        matches!(err, LlmError::Network(_) | LlmError::Timeout)
    }

    async fn generate_non_streaming(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        let body = self.build_request_body(&request, false);

        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max_retries = MAX_RETRIES,
                    ?backoff,
                    "azure openai request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute(&body).await {
                Ok(resp) => return Ok(resp.into_generate_response()),
                Err(e) if Self::is_retryable(&e) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(LlmError::Network("max retries exceeded".into())))
    }
}

#[async_trait]
impl LanguageModel for AzureOpenAiBackend {
    async fn generate(&self, request: GenerateRequest) -> CoreResult<GenerateResponse> {
        Ok(self.generate_non_streaming(request).await?)
    }

    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = CoreResult<StreamChunk>> + Send + 'a>> {
        self.stream(request)
    }

    async fn generate_with_tools(
        &self,
        request: GenerateRequest,
        tools: &[ToolDefinition],
    ) -> CoreResult<GenerateResponse> {
        Ok(self
            .generate_non_streaming(request.with_tools(tools.to_vec()))
            .await?)
    }

    async fn is_available(&self) -> bool {
        self.endpoint().is_ok() && self.api_key().is_ok()
    }

    fn model_name(&self) -> &str {
        self.config
            .chat_deployment_id
            .as_deref()
            .unwrap_or("azure-openai")
    }

    fn context_size(&self) -> usize {
        self.context_size
    }
}

impl AzureOpenAiBackend {
    /// Opens a streaming chat-completions call. Tool schemas, if any, are
    /// read straight off `request.tools` — the turn router builds one
    /// `GenerateRequest` carrying both history and tools and calls this
    /// (via `generate_stream`) exactly once per turn.
    pub fn stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = CoreResult<StreamChunk>> + Send + 'a>> {
        let body = self.build_request_body(&request, true);

        Box::pin(async_stream::try_stream! {
            let endpoint = self.endpoint().map_err(voice_agent_core::Error::from)?;
            let api_key = self.api_key().map_err(voice_agent_core::Error::from)?;

            let resp = self
                .client
                .post(endpoint)
                .header("api-key", api_key)
                .json(&body)
                .send()
                .await
                .map_err(LlmError::from)
                .map_err(voice_agent_core::Error::from)?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err(voice_agent_core::Error::from(LlmError::Api(format!("azure openai {status}: {text}"))))?;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(LlmError::from).map_err(voice_agent_core::Error::from)?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(idx) = buf.find('\n') {
                    let line = buf[..idx].trim_end_matches('\r').to_string();
                    buf.drain(..=idx);

                    let Some(payload) = line.strip_prefix("data: ") else { continue };
                    if payload == "[DONE]" {
                        yield StreamChunk::final_chunk(FinishReason::Stop);
                        return;
                    }
                    if payload.is_empty() {
                        continue;
                    }

                    let parsed: AzureStreamChunk = match serde_json::from_str(payload) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed azure openai stream chunk");
                            continue;
                        }
                    };

                    let Some(choice) = parsed.choices.into_iter().next() else { continue };

                    let mut delta = Delta::default();
                    if let Some(content) = choice.delta.content {
                        delta.content = Some(content);
                    }
                    if let Some(tool_calls) = choice.delta.tool_calls {
                        delta.tool_calls = tool_calls
                            .into_iter()
                            .map(|tc| ToolCallDelta {
                                id: tc.id,
                                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                                arguments: tc
                                    .function
                                    .and_then(|f| f.arguments)
                                    .unwrap_or_default(),
                            })
                            .collect();
                    }

                    let finish_reason = choice.finish_reason.as_deref().map(map_finish_reason);
                    let is_final = finish_reason.is_some();

                    yield StreamChunk { delta, is_final, finish_reason };

                    if is_final {
                        return;
                    }
                }
            }
        })
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

#[derive(Debug, Serialize)]
struct AzureChatRequest {
    messages: Vec<AzureMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AzureToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct AzureToolSpec {
    r#type: &'static str,
    function: AzureFunctionSpec,
}

#[derive(Debug, Serialize)]
struct AzureFunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct AzureMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "tool_call_id")]
    tool_call_id: Option<String>,
}

impl From<&Message> for AzureMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string(),
            content: m.content.clone(),
            name: m.name.clone(),
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse {
    choices: Vec<AzureChatChoice>,
    #[serde(default)]
    usage: Option<AzureUsage>,
}

impl AzureChatResponse {
    fn into_generate_response(self) -> GenerateResponse {
        let choice = self.choices.into_iter().next();
        let (text, finish_reason, tool_calls) = match choice {
            Some(c) => (
                c.message.content.unwrap_or_default(),
                map_finish_reason(&c.finish_reason.unwrap_or_else(|| "stop".to_string())),
                c.message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|tc| {
                        let args: std::collections::HashMap<String, Value> = tc
                            .function
                            .arguments
                            .as_deref()
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or_default();
                        Some(ToolCall {
                            id: tc.id,
                            name: tc.function.name?,
                            arguments: args,
                        })
                    })
                    .collect(),
            ),
            None => (String::new(), FinishReason::Error, Vec::new()),
        };

        GenerateResponse {
            text,
            finish_reason,
            usage: self.usage.map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            tool_calls,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureChatChoice {
    message: AzureResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<AzureResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseToolCall {
    id: String,
    function: AzureResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct AzureResponseFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AzureStreamChunk {
    choices: Vec<AzureStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct AzureStreamChoice {
    delta: AzureStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AzureStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<AzureStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct AzureStreamToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<AzureStreamFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct AzureStreamFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_without_credentials() -> AzureOpenAiBackend {
        AzureOpenAiBackend::new(AzureOpenAiConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn unavailable_without_endpoint_and_key() {
        let backend = backend_without_credentials();
        assert!(!backend.is_available().await);
    }

    #[test]
    fn endpoint_requires_deployment_id() {
        let mut config = AzureOpenAiConfig::default();
        config.endpoint = Some("https://example.openai.azure.com".to_string());
        let backend = AzureOpenAiBackend::new(config).unwrap();
        assert!(backend.endpoint().is_err());
    }

    #[test]
    fn endpoint_formats_azure_chat_completions_path() {
        let config = AzureOpenAiConfig {
            endpoint: Some("https://example.openai.azure.com/".to_string()),
            key: Some("secret".to_string()),
            api_version: Some("2024-06-01".to_string()),
            chat_deployment_id: Some("gpt-4o".to_string()),
        };
        let backend = AzureOpenAiBackend::new(config).unwrap();
        assert_eq!(
            backend.endpoint().unwrap(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(map_finish_reason("weird"), FinishReason::Error);
    }
}
