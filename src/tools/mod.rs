pub mod analysis;
pub mod formatting;
pub mod web;

use std::fmt;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::provider::ToolSpec;

pub type ToolHandler = fn(&Value) -> Value;

/// Local function exposed to the model through the chat-completions tool interface.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: ToolHandler,
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FunctionTool {
    /// `A` is the argument struct; its JSON schema becomes the tool's parameter schema.
    pub fn new<A: JsonSchema>(name: &str, description: &str, handler: ToolHandler) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: argument_schema::<A>(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub fn call(&self, args: &Value) -> Value {
        (self.handler)(args)
    }
}

pub fn argument_schema<A: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(A))
        .unwrap_or_else(|_| json!({ "type": "object" }));
    if let Some(map) = schema.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
    }
    schema
}

pub fn tool_error_payload(code: &str, message: impl Into<String>) -> Value {
    json!({
        "status": "error",
        "code": code,
        "error": message.into(),
    })
}

/// Decodes `args` into `A`, runs `f`, and renders the outcome as a JSON tool result.
pub(crate) fn run_with_args<A, R>(args: &Value, f: impl FnOnce(A) -> anyhow::Result<R>) -> Value
where
    A: DeserializeOwned,
    R: Serialize,
{
    let parsed = match serde_json::from_value::<A>(args.clone()) {
        Ok(parsed) => parsed,
        Err(err) => return tool_error_payload("invalid_args", err.to_string()),
    };

    match f(parsed).and_then(|result| serde_json::to_value(result).map_err(Into::into)) {
        Ok(value) => value,
        Err(err) => tool_error_payload("failed", err.to_string()),
    }
}

/// Sentence boundaries shared by the text tools (Japanese and ASCII terminators).
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|ch: char| matches!(ch, '。' | '．' | '.' | '!' | '?' | '！' | '？' | '\n'))
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}
