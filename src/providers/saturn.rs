use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{
    AssistantTurn, ChatDelta, ConversationMessage, Provider, ProviderError, ProviderOptions,
    ToolCall, ToolCallDelta, ToolSpec,
};
use crate::discovery::SaturnService;

/// Used when neither the options nor the service advertise a model id.
const DEFAULT_MODEL: &str = "default";

/// One discovered backend behind the chat-completions contract.
///
/// The provider borrows the service record at construction and never
/// mutates it; credentials and base URL come from the advertisement.
pub struct SaturnProvider {
    service: SaturnService,
    model: String,
    max_tokens: u32,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON text, per the chat-completions wire format.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

/// A single SSE chunk from the streaming endpoint.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl SaturnProvider {
    pub fn new(service: SaturnService, options: &ProviderOptions) -> Self {
        let model = pick_model(&options.model, &service);
        Self {
            service,
            model,
            max_tokens: options.max_tokens,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn service(&self) -> &SaturnService {
        &self.service
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.service.base_url())
    }

    fn build_request(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: encode_conversation(system_prompt, conversation),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(encode_tool).collect())
            },
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let mut req = self.client.post(self.endpoint()).json(request);
        if !self.service.ephemeral_key.is_empty() {
            req = req.header(
                "Authorization",
                format!("Bearer {}", self.service.ephemeral_key),
            );
        }
        let response = req
            .send()
            .await
            .map_err(|e| super::transport_error(&self.service.name, &e))?;
        if !response.status().is_success() {
            return Err(super::api_error(&self.service.name, response).await);
        }
        Ok(response)
    }
}

fn pick_model(configured: &str, service: &SaturnService) -> String {
    if !configured.is_empty() {
        configured.to_string()
    } else if let Some(first) = service.models.first() {
        first.clone()
    } else {
        DEFAULT_MODEL.to_string()
    }
}

/// Flatten the internal conversation into wire messages. Assistant turns
/// keep their tool calls with stable ids; tool results become one
/// `role:"tool"` message apiece, referencing those ids verbatim.
fn encode_conversation(
    system_prompt: &str,
    conversation: &[ConversationMessage],
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);

    if !system_prompt.is_empty() {
        messages.push(WireMessage {
            role: "system".into(),
            content: Some(system_prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for entry in conversation {
        match entry {
            ConversationMessage::User { content } => messages.push(WireMessage {
                role: "user".into(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            ConversationMessage::Assistant(turn) => messages.push(WireMessage {
                role: "assistant".into(),
                content: (!turn.text.is_empty()).then(|| turn.text.clone()),
                tool_calls: if turn.tool_calls.is_empty() {
                    None
                } else {
                    Some(turn.tool_calls.iter().map(encode_tool_call).collect())
                },
                tool_call_id: None,
            }),
            ConversationMessage::ToolResults { results } => {
                for result in results {
                    messages.push(WireMessage {
                        role: "tool".into(),
                        content: Some(result.content.clone()),
                        tool_calls: None,
                        tool_call_id: Some(result.id.clone()),
                    });
                }
            }
        }
    }

    messages
}

fn encode_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        call_type: "function".into(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: call.input.to_string(),
        },
    }
}

fn encode_tool(spec: &ToolSpec) -> WireTool {
    WireTool {
        tool_type: "function".into(),
        function: WireToolFunction {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.input_schema.clone(),
        },
    }
}

fn decode_tool_call(wire: WireToolCall) -> Result<ToolCall, ProviderError> {
    let input = if wire.function.arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&wire.function.arguments).map_err(|e| {
            ProviderError::ProtocolError(format!(
                "tool call '{}' carried malformed arguments: {e}",
                wire.function.name
            ))
        })?
    };
    Ok(ToolCall {
        id: wire.id,
        name: wire.function.name,
        input,
    })
}

fn decode_response(response: ChatResponse) -> Result<AssistantTurn, ProviderError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ProviderError::ProtocolError("response carried no choices".into()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(decode_tool_call)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AssistantTurn {
        text: message.content.unwrap_or_default(),
        tool_calls,
    })
}

/// Assembles streamed tool-call fragments, keyed by choice index.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: Vec<PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    fn apply(&mut self, index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) {
        if index >= self.calls.len() {
            self.calls.resize_with(index + 1, PartialCall::default);
        }
        let call = &mut self.calls[index];
        if let Some(id) = id {
            call.id = id.to_string();
        }
        if let Some(name) = name {
            call.name = name.to_string();
        }
        if let Some(args) = args {
            call.arguments.push_str(args);
        }
    }

    fn finish(self) -> Result<Vec<ToolCall>, ProviderError> {
        self.calls
            .into_iter()
            .map(|partial| {
                decode_tool_call(WireToolCall {
                    id: partial.id,
                    call_type: "function".into(),
                    function: WireFunction {
                        name: partial.name,
                        arguments: partial.arguments,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for SaturnProvider {
    fn name(&self) -> &str {
        "saturn"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn set_model(&mut self, model: &str) {
        self.model = pick_model(model, &self.service);
    }

    fn models(&self) -> Vec<String> {
        self.service.models.clone()
    }

    async fn chat(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError> {
        let request = self.build_request(system_prompt, conversation, tools, false);
        debug!(backend = %self.service.name, model = %self.model, messages = request.messages.len(), "chat request");

        let response = self.send(&request).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ProtocolError(e.to_string()))?;
        decode_response(body)
    }

    async fn chat_stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
        delta_tx: mpsc::Sender<ChatDelta>,
    ) -> Result<AssistantTurn, ProviderError> {
        let request = self.build_request(system_prompt, conversation, tools, true);
        let mut response = self.send(&request).await?;

        let mut text = String::new();
        let mut assembler = ToolCallAssembler::default();
        let mut buffer = String::new();

        'stream: loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let err = super::transport_error(&self.service.name, &e);
                    let _ = delta_tx
                        .send(ChatDelta {
                            error: Some(err.to_string()),
                            done: true,
                            ..ChatDelta::default()
                        })
                        .await;
                    return Err(err);
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').trim().to_string();
                buffer.drain(..=newline);

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    break 'stream;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                    continue;
                };
                for choice in chunk.choices {
                    let Some(delta) = choice.delta else { continue };
                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            text.push_str(&content);
                            let _ = delta_tx.send(ChatDelta::content(content)).await;
                        }
                    }
                    for call in delta.tool_calls.unwrap_or_default() {
                        let (name, arguments) = call
                            .function
                            .map(|f| (f.name, f.arguments))
                            .unwrap_or_default();
                        assembler.apply(
                            call.index,
                            call.id.as_deref(),
                            name.as_deref(),
                            arguments.as_deref(),
                        );
                        let _ = delta_tx
                            .send(ChatDelta {
                                tool_call_delta: Some(ToolCallDelta {
                                    index: call.index,
                                    id: call.id,
                                    name,
                                    arguments_delta: arguments,
                                }),
                                ..ChatDelta::default()
                            })
                            .await;
                    }
                }
            }
        }

        let _ = delta_tx.send(ChatDelta::done()).await;
        Ok(AssistantTurn {
            text,
            tool_calls: assembler.finish()?,
        })
    }
}
