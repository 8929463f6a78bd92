//! Agent abstraction shared by the reasoning pipeline and the voice session.
//!
//! Every stage and the voice assistant implement [`Agent`]: a named object
//! that turns one prompt into one text reply. Production agents are
//! [`llm::LlmAgent`]s built by [`AzureAgentFactory`]; tests substitute their
//! own [`AgentFactory`].

pub mod llm;
pub mod prompts;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AzureOpenAiSettings, RuntimeConfig, validate_pipeline_config};
use crate::provider::{AzureCredential, AzureOpenAiClient, build_http_client};
use crate::tools::{self, FunctionTool};

use llm::LlmAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Coordinator,
    Researcher,
    Analyzer,
    Summarizer,
    VoiceAssistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentTier {
    Primary,
    Mini,
}

impl AgentRole {
    pub const PIPELINE: [AgentRole; 4] = [
        AgentRole::Coordinator,
        AgentRole::Researcher,
        AgentRole::Analyzer,
        AgentRole::Summarizer,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            AgentRole::Coordinator => "Coordinator",
            AgentRole::Researcher => "Researcher",
            AgentRole::Analyzer => "Analyzer",
            AgentRole::Summarizer => "Summarizer",
            AgentRole::VoiceAssistant => "VoiceAssistant",
        }
    }

    /// Key used in `WorkflowResult::agent_outputs` and saved reports.
    pub fn key(self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Researcher => "researcher",
            AgentRole::Analyzer => "analyzer",
            AgentRole::Summarizer => "summarizer",
            AgentRole::VoiceAssistant => "voice_assistant",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            AgentRole::Coordinator => prompts::COORDINATOR_INSTRUCTION,
            AgentRole::Researcher => prompts::RESEARCHER_INSTRUCTION,
            AgentRole::Analyzer => prompts::ANALYZER_INSTRUCTION,
            AgentRole::Summarizer => prompts::SUMMARIZER_INSTRUCTION,
            AgentRole::VoiceAssistant => prompts::VOICE_ASSISTANT_INSTRUCTION,
        }
    }

    pub fn tier(self) -> DeploymentTier {
        match self {
            AgentRole::Researcher => DeploymentTier::Mini,
            _ => DeploymentTier::Primary,
        }
    }

    pub fn tools(self) -> Vec<FunctionTool> {
        match self {
            AgentRole::Researcher => tools::web::tools(),
            AgentRole::Analyzer => tools::analysis::tools(),
            AgentRole::Summarizer => tools::formatting::tools(),
            AgentRole::Coordinator | AgentRole::VoiceAssistant => Vec::new(),
        }
    }
}

pub fn deployment_for(settings: &AzureOpenAiSettings, tier: DeploymentTier) -> &str {
    match tier {
        DeploymentTier::Primary => &settings.deployment,
        DeploymentTier::Mini => &settings.deployment_mini,
    }
}

#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, role: AgentRole) -> Result<Arc<dyn Agent>>;
}

/// Builds [`LlmAgent`]s over Azure OpenAI. All agents share one HTTP client and credential.
pub struct AzureAgentFactory {
    endpoint: String,
    settings: AzureOpenAiSettings,
    http: reqwest::Client,
    credential: Arc<AzureCredential>,
    voice_agent_name: String,
}

impl AzureAgentFactory {
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let endpoint = validate_pipeline_config(cfg)?;
        Ok(Self {
            endpoint,
            settings: cfg.azure.clone(),
            http: build_http_client(cfg.azure.request_timeout_secs)?,
            credential: Arc::new(AzureCredential::new(cfg.azure.credential.clone())),
            voice_agent_name: cfg.voice_agent_name.clone(),
        })
    }
}

#[async_trait]
impl AgentFactory for AzureAgentFactory {
    async fn create(&self, role: AgentRole) -> Result<Arc<dyn Agent>> {
        let deployment = deployment_for(&self.settings, role.tier());
        let model = AzureOpenAiClient::new(
            self.http.clone(),
            self.credential.clone(),
            &self.endpoint,
            &self.settings,
            deployment,
        );
        let name = match role {
            AgentRole::VoiceAssistant => self.voice_agent_name.clone(),
            other => other.display_name().to_string(),
        };
        let agent = LlmAgent::new(name, role.instruction(), Arc::new(model), role.tools());
        tracing::info!(
            agent = agent.name(),
            deployment = %deployment,
            tools = agent.tool_names().len(),
            "agent created"
        );
        Ok(Arc::new(agent))
    }
}
