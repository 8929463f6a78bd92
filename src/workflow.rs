use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;

use crate::agents::{Agent, AgentFactory, AgentRole};
use crate::telemetry::TelemetrySink;

const RESEARCHER_SUFFIX: &str = "\
上記の調査指示に基づいて、必要な情報を収集してください。
情報整理ツールを活用し、出典や根拠を明確にしてください。";

const ANALYZER_SUFFIX: &str = "\
上記の情報を分析し、深い洞察を導き出してください。
パターン、傾向、因果関係を特定し、データに基づいた論理的な推論を行ってください。
必要に応じて統計・分析ツールを活用してください。";

const SUMMARIZER_SUFFIX: &str = "\
上記の全ての情報を統合し、ユーザーの質問に対する最終的な回答を作成してください。
わかりやすく構造化され、読みやすい形式で出力してください。
整形ツールを活用して、Markdown形式で整形してください。";

fn section(label: &str, body: &str) -> String {
    format!("【{label}】\n{}\n\n", body.trim())
}

pub fn researcher_prompt(query: &str, coordinator_output: &str) -> String {
    let mut prompt = section("元の質問", query);
    prompt.push_str(&section("Coordinatorからの調査指示", coordinator_output));
    prompt.push_str(RESEARCHER_SUFFIX);
    prompt
}

pub fn analyzer_prompt(query: &str, coordinator_output: &str, researcher_output: &str) -> String {
    let mut prompt = section("元の質問", query);
    prompt.push_str(&section("調査計画（Coordinator）", coordinator_output));
    prompt.push_str(&section("収集された情報（Researcher）", researcher_output));
    prompt.push_str(ANALYZER_SUFFIX);
    prompt
}

pub fn summarizer_prompt(
    query: &str,
    coordinator_output: &str,
    researcher_output: &str,
    analyzer_output: &str,
) -> String {
    let mut prompt = section("元の質問", query);
    prompt.push_str(&section("調査計画（Coordinator）", coordinator_output));
    prompt.push_str(&section("収集された情報（Researcher）", researcher_output));
    prompt.push_str(&section("分析結果（Analyzer）", analyzer_output));
    prompt.push_str(SUMMARIZER_SUFFIX);
    prompt
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionHistoryEntry {
    pub agent: String,
    pub timestamp: DateTime<Local>,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub query: String,
    pub final_answer: String,
    /// Wall-clock seconds from just before the first stage to just after the last.
    pub execution_time: f64,
    pub agent_outputs: BTreeMap<String, String>,
    pub execution_history: Vec<ExecutionHistoryEntry>,
}

impl WorkflowResult {
    pub fn output_for(&self, role: AgentRole) -> Option<&str> {
        self.agent_outputs.get(role.key()).map(String::as_str)
    }
}

#[derive(Clone)]
struct PipelineAgents {
    coordinator: Arc<dyn Agent>,
    researcher: Arc<dyn Agent>,
    analyzer: Arc<dyn Agent>,
    summarizer: Arc<dyn Agent>,
}

/// Runs Coordinator → Researcher → Analyzer → Summarizer, threading each output
/// into the next prompt. Any stage failure aborts the run.
pub struct WorkflowOrchestrator {
    factory: Arc<dyn AgentFactory>,
    agents: Option<PipelineAgents>,
    telemetry: TelemetrySink,
}

impl WorkflowOrchestrator {
    pub fn new(factory: Arc<dyn AgentFactory>, telemetry: TelemetrySink) -> Self {
        Self {
            factory,
            agents: None,
            telemetry,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.agents.is_some()
    }

    /// Creates the four stage agents once. Creation is independent per stage and runs concurrently.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.agents.is_some() {
            return Ok(());
        }

        let factory = self.factory.clone();
        let (coordinator, researcher, analyzer, summarizer) = tokio::try_join!(
            factory.create(AgentRole::Coordinator),
            factory.create(AgentRole::Researcher),
            factory.create(AgentRole::Analyzer),
            factory.create(AgentRole::Summarizer),
        )?;
        tracing::info!("pipeline agents initialized");

        self.agents = Some(PipelineAgents {
            coordinator,
            researcher,
            analyzer,
            summarizer,
        });
        Ok(())
    }

    pub async fn run(&mut self, query: &str) -> Result<WorkflowResult> {
        self.initialize().await?;
        let agents = match self.agents.clone() {
            Some(agents) => agents,
            None => return Err(anyhow::anyhow!("pipeline agents are not initialized")),
        };

        let mut history = Vec::with_capacity(4);
        let started = Instant::now();

        let coordinator_output = self
            .run_stage(AgentRole::Coordinator, agents.coordinator.as_ref(), query.to_string(), &mut history)
            .await?;

        let researcher_output = self
            .run_stage(
                AgentRole::Researcher,
                agents.researcher.as_ref(),
                researcher_prompt(query, &coordinator_output),
                &mut history,
            )
            .await?;

        let analyzer_output = self
            .run_stage(
                AgentRole::Analyzer,
                agents.analyzer.as_ref(),
                analyzer_prompt(query, &coordinator_output, &researcher_output),
                &mut history,
            )
            .await?;

        let final_answer = self
            .run_stage(
                AgentRole::Summarizer,
                agents.summarizer.as_ref(),
                summarizer_prompt(query, &coordinator_output, &researcher_output, &analyzer_output),
                &mut history,
            )
            .await?;

        let execution_time = started.elapsed().as_secs_f64();
        tracing::info!(execution_time, "pipeline completed");
        self.telemetry.emit(
            "pipeline.completed",
            json!({ "execution_time_secs": execution_time, "answer_chars": final_answer.chars().count() }),
        );

        let agent_outputs = BTreeMap::from([
            (AgentRole::Coordinator.key().to_string(), coordinator_output),
            (AgentRole::Researcher.key().to_string(), researcher_output),
            (AgentRole::Analyzer.key().to_string(), analyzer_output),
            (AgentRole::Summarizer.key().to_string(), final_answer.clone()),
        ]);

        Ok(WorkflowResult {
            query: query.to_string(),
            final_answer,
            execution_time,
            agent_outputs,
            execution_history: history,
        })
    }

    async fn run_stage(
        &self,
        role: AgentRole,
        agent: &dyn Agent,
        prompt: String,
        history: &mut Vec<ExecutionHistoryEntry>,
    ) -> Result<String> {
        tracing::info!(stage = role.key(), agent = agent.name(), "stage started");
        let started = Instant::now();

        match agent.invoke(&prompt).await {
            Ok(output) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(stage = role.key(), chars = output.chars().count(), elapsed_ms, "stage completed");
                self.telemetry.emit(
                    "pipeline.stage.completed",
                    json!({ "stage": role.key(), "elapsed_ms": elapsed_ms, "output_chars": output.chars().count() }),
                );
                history.push(ExecutionHistoryEntry {
                    agent: role.display_name().to_string(),
                    timestamp: Local::now(),
                    input: prompt,
                    output: output.clone(),
                });
                Ok(output)
            }
            Err(err) => {
                tracing::error!(stage = role.key(), error = %err, "stage failed");
                self.telemetry.emit(
                    "pipeline.stage.failed",
                    json!({ "stage": role.key(), "error": err.to_string() }),
                );
                Err(err.context(format!("pipeline stage '{}' failed", role.display_name())))
            }
        }
    }
}
