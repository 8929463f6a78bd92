use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::Agent;
use crate::provider::{ChatMessage, ChatModel, ToolCall, ToolSpec};
use crate::tools::{FunctionTool, tool_error_payload};

pub const MAX_TOOL_ROUNDS: usize = 8;

/// Instruction-configured agent over a chat model, resolving local tool calls
/// until the model answers in text.
pub struct LlmAgent {
    name: String,
    instruction: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<FunctionTool>,
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: Vec<FunctionTool>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            model,
            tools,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(FunctionTool::name).collect()
    }

    fn run_tool(&self, call: &ToolCall) -> Value {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.function.name) else {
            return tool_error_payload(
                "unknown_tool",
                format!("tool '{}' is not available", call.function.name),
            );
        };

        let raw = call.function.arguments.trim();
        let args = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(raw) {
                Ok(args) => args,
                Err(err) => {
                    return tool_error_payload(
                        "invalid_args",
                        format!("arguments are not valid JSON: {err}"),
                    );
                }
            }
        };

        tool.call(&args)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let specs = self.tools.iter().map(FunctionTool::spec).collect::<Vec<ToolSpec>>();
        let mut messages = vec![
            ChatMessage::system(self.instruction.clone()),
            ChatMessage::user(prompt),
        ];

        for round in 0..=MAX_TOOL_ROUNDS {
            // Last round withholds tools so the model has to answer.
            let offered: &[ToolSpec] = if round < MAX_TOOL_ROUNDS { &specs } else { &[] };
            let reply = self
                .model
                .generate(&messages, offered)
                .await
                .with_context(|| format!("agent '{}' invocation failed", self.name))?;

            if reply.tool_calls.is_empty() {
                let text = reply.text().trim().to_string();
                if text.is_empty() {
                    return Err(anyhow::anyhow!(
                        "agent '{}' returned an empty response",
                        self.name
                    ));
                }
                return Ok(text);
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                tracing::info!(agent = %self.name, tool = %call.function.name, round, "tool requested");
                let result = self.run_tool(call);
                if result.get("status").and_then(Value::as_str) == Some("error") {
                    tracing::warn!(agent = %self.name, tool = %call.function.name, "tool returned an error payload");
                }
                messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
            }
        }

        Err(anyhow::anyhow!(
            "agent '{}' did not produce an answer within {} tool rounds",
            self.name,
            MAX_TOOL_ROUNDS
        ))
    }
}
