use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::{AzureOpenAiSettings, CredentialMode};

pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as sent by the service.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool_result(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::with_role("tool", content)
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Function tool advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_on: i64,
}

#[derive(Debug, Deserialize)]
struct AzCliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    expires_on: Option<i64>,
}

/// Produces the auth header for Azure requests. CLI tokens are cached until
/// shortly before they expire.
#[derive(Debug)]
pub struct AzureCredential {
    mode: CredentialMode,
    cached: Mutex<Option<CachedToken>>,
}

pub enum AuthHeader {
    ApiKey(String),
    Bearer(String),
}

impl AzureCredential {
    pub fn new(mode: CredentialMode) -> Self {
        Self {
            mode,
            cached: Mutex::new(None),
        }
    }

    pub async fn auth_header(&self) -> Result<AuthHeader> {
        match &self.mode {
            CredentialMode::ApiKey(key) => Ok(AuthHeader::ApiKey(key.clone())),
            CredentialMode::AzureCli => {
                let mut cached = self.cached.lock().await;
                let now = chrono::Utc::now().timestamp();
                if let Some(token) = cached.as_ref() {
                    if token.expires_on - TOKEN_REFRESH_MARGIN_SECS > now {
                        return Ok(AuthHeader::Bearer(token.token.clone()));
                    }
                }
                let fresh = fetch_az_cli_token().await?;
                let token = fresh.token.clone();
                *cached = Some(fresh);
                Ok(AuthHeader::Bearer(token))
            }
        }
    }
}

async fn fetch_az_cli_token() -> Result<CachedToken> {
    tracing::debug!("requesting access token from Azure CLI");
    let output = tokio::process::Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            COGNITIVE_SERVICES_RESOURCE,
            "-o",
            "json",
        ])
        .output()
        .await
        .context("failed to run `az account get-access-token`; install the Azure CLI and run `az login`")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "Azure CLI could not issue an access token (status {}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let parsed: AzCliToken = serde_json::from_slice(&output.stdout)
        .context("Azure CLI returned an unreadable access token payload")?;
    Ok(CachedToken {
        token: parsed.access_token,
        expires_on: parsed
            .expires_on
            .unwrap_or_else(|| chrono::Utc::now().timestamp() + TOKEN_REFRESH_MARGIN_SECS * 2),
    })
}

pub fn chat_completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

pub fn build_chat_request_body(
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    max_tokens: u32,
    temperature: Option<f32>,
) -> Value {
    let mut body = json!({
        "messages": messages,
        "max_completion_tokens": max_tokens,
    });
    if let Some(temperature) = temperature {
        body["temperature"] = json!(temperature);
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Pulls `choices[0].message` out of a chat-completions payload.
pub fn parse_chat_completion(payload: &Value) -> Result<ChatMessage> {
    let message = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| {
            anyhow::anyhow!("Azure OpenAI response did not include a message: {payload}")
        })?;
    serde_json::from_value::<ChatMessage>(message.clone())
        .context("Azure OpenAI response message has an unexpected shape")
}

/// Chat-completions client bound to one deployment.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    credential: Arc<AzureCredential>,
    url: String,
    deployment: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl AzureOpenAiClient {
    pub fn new(
        http: reqwest::Client,
        credential: Arc<AzureCredential>,
        endpoint: &str,
        settings: &AzureOpenAiSettings,
        deployment: &str,
    ) -> Self {
        Self {
            http,
            credential,
            url: chat_completions_url(endpoint, deployment, &settings.api_version),
            deployment: deployment.to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build Azure OpenAI HTTP client")
}

#[async_trait]
impl ChatModel for AzureOpenAiClient {
    fn name(&self) -> &str {
        &self.deployment
    }

    async fn generate(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let body = build_chat_request_body(messages, tools, self.max_tokens, self.temperature);
        let request = match self.credential.auth_header().await? {
            AuthHeader::ApiKey(key) => self.http.post(&self.url).header("api-key", key),
            AuthHeader::Bearer(token) => self.http.post(&self.url).bearer_auth(token),
        };

        let response = request.json(&body).send().await.with_context(|| {
            format!(
                "failed to call Azure OpenAI deployment '{}'",
                self.deployment
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Azure OpenAI deployment '{}' returned status {}: {}",
                self.deployment,
                status,
                text.trim()
            ));
        }

        let payload: Value = response
            .json()
            .await
            .context("invalid Azure OpenAI response payload")?;
        tracing::debug!(deployment = %self.deployment, "chat completion received");
        parse_chat_completion(&payload)
    }
}
