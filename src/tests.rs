use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use clap::Parser;
use serde_json::{Value, json};
use tempfile::tempdir;

use crate::agents::llm::LlmAgent;
use crate::agents::*;
use crate::cli::*;
use crate::config::*;
use crate::error::*;
use crate::provider::*;
use crate::report::*;
use crate::telemetry::*;
use crate::tools::analysis::*;
use crate::tools::formatting::*;
use crate::tools::web::*;
use crate::voice::chat::*;
use crate::voice::commands::*;
use crate::voice::context::*;
use crate::voice::profiles::*;
use crate::voice::session::*;
use crate::voice::speech::*;
use crate::voice::summarizer::*;
use crate::workflow::*;

    fn test_cli(config_path: &str, profile: &str) -> Cli {
        Cli {
            profile: profile.to_string(),
            config_path: config_path.to_string(),
            azure_endpoint: None,
            azure_api_key: None,
            azure_api_version: None,
            deployment: None,
            deployment_mini: None,
            max_tokens: None,
            temperature: None,
            request_timeout_secs: None,
            speech_key: None,
            speech_region: None,
            speech_language: None,
            speech_voice: None,
            recognition_timeout_secs: None,
            capture_command: None,
            playback_command: None,
            voice_agent_name: None,
            max_turns: None,
            max_consecutive_errors: None,
            max_session_duration_secs: None,
            exit_keywords: Vec::new(),
            show_sensitive_config: false,
            telemetry_enabled: None,
            telemetry_path: None,
            log_filter: "warn".to_string(),
            command: Commands::Doctor,
        }
    }

    fn base_cfg() -> RuntimeConfig {
        resolve_runtime_config(
            &test_cli(".reasonvox/missing.toml", "default"),
            &ProfilesFile::default(),
        )
        .expect("default runtime config should resolve")
    }

    type PromptLog = Arc<Mutex<Vec<(String, String)>>>;

    struct ScriptedAgent {
        name: String,
        reply: Option<String>,
        prompts: PromptLog,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .expect("prompt log should lock")
                .push((self.name.clone(), prompt.to_string()));
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(anyhow::anyhow!("deployment is unavailable")),
            }
        }
    }

    fn scripted_agent(name: &str, reply: Option<&str>) -> (Arc<dyn Agent>, PromptLog) {
        let prompts = PromptLog::default();
        let agent = ScriptedAgent {
            name: name.to_string(),
            reply: reply.map(str::to_string),
            prompts: prompts.clone(),
        };
        (Arc::new(agent), prompts)
    }

    struct ScriptedFactory {
        failing: Option<AgentRole>,
        prompts: PromptLog,
    }

    #[async_trait]
    impl AgentFactory for ScriptedFactory {
        async fn create(&self, role: AgentRole) -> Result<Arc<dyn Agent>> {
            let reply = (Some(role) != self.failing).then(|| format!("{} output", role.key()));
            Ok(Arc::new(ScriptedAgent {
                name: role.display_name().to_string(),
                reply,
                prompts: self.prompts.clone(),
            }))
        }
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pipeline_runs_stages_in_order_and_threads_outputs() {
        let prompts = PromptLog::default();
        let factory = Arc::new(ScriptedFactory {
            failing: None,
            prompts: prompts.clone(),
        });
        let mut orchestrator = WorkflowOrchestrator::new(factory, TelemetrySink::disabled());
        assert!(!orchestrator.is_initialized());

        let result = orchestrator
            .run("Rustの利点は？")
            .await
            .expect("pipeline should complete");

        assert!(orchestrator.is_initialized());
        assert_eq!(result.final_answer, "summarizer output");
        assert_eq!(result.agent_outputs.len(), 4);
        assert_eq!(result.output_for(AgentRole::Researcher), Some("researcher output"));
        assert!(result.execution_time >= 0.0);

        let agents = result
            .execution_history
            .iter()
            .map(|entry| entry.agent.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(agents, vec!["Coordinator", "Researcher", "Analyzer", "Summarizer"]);

        let history = &result.execution_history;
        assert_eq!(history[0].input, "Rustの利点は？");
        assert!(history[1].input.contains("coordinator output"));
        assert!(history[2].input.contains("researcher output"));
        let final_prompt = &history[3].input;
        assert!(final_prompt.contains("Rustの利点は？"));
        assert!(final_prompt.contains("coordinator output"));
        assert!(final_prompt.contains("researcher output"));
        assert!(final_prompt.contains("analyzer output"));
        assert_eq!(history[3].output, "summarizer output");
        assert!(history.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));

        assert_eq!(prompts.lock().expect("prompt log should lock").len(), 4);
    }

    #[tokio::test]
    async fn pipeline_stage_failure_aborts_the_run() {
        let prompts = PromptLog::default();
        let factory = Arc::new(ScriptedFactory {
            failing: Some(AgentRole::Analyzer),
            prompts: prompts.clone(),
        });
        let mut orchestrator = WorkflowOrchestrator::new(factory, TelemetrySink::disabled());

        let err = orchestrator
            .run("question")
            .await
            .expect_err("analyzer failure should abort the pipeline");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("pipeline stage 'Analyzer' failed"));
        assert_eq!(categorize_error(&err), ErrorCategory::Provider);

        let called = prompts
            .lock()
            .expect("prompt log should lock")
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<Vec<String>>();
        assert_eq!(called, vec!["Coordinator", "Researcher", "Analyzer"]);
    }

    #[test]
    fn stage_prompts_carry_query_and_prior_outputs() {
        let researcher = researcher_prompt("Q", "plan");
        assert!(researcher.starts_with("【元の質問】\nQ\n\n"));
        assert!(researcher.contains("【Coordinatorからの調査指示】\nplan"));

        let analyzer = analyzer_prompt("Q", "plan", "facts");
        assert!(analyzer.contains("【調査計画（Coordinator）】\nplan"));
        assert!(analyzer.contains("【収集された情報（Researcher）】\nfacts"));

        let summarizer = summarizer_prompt("Q", "plan", "facts", "insight");
        let plan_at = summarizer.find("plan").expect("plan should be present");
        let facts_at = summarizer.find("facts").expect("facts should be present");
        let insight_at = summarizer.find("insight").expect("insight should be present");
        assert!(plan_at < facts_at && facts_at < insight_at);
    }

    #[test]
    fn agent_roles_map_to_tiers_and_tools() {
        let cfg = base_cfg();
        assert_eq!(AgentRole::Researcher.tier(), DeploymentTier::Mini);
        assert_eq!(AgentRole::Summarizer.tier(), DeploymentTier::Primary);
        assert_eq!(deployment_for(&cfg.azure, DeploymentTier::Mini), "gpt-5-mini");
        assert_eq!(deployment_for(&cfg.azure, DeploymentTier::Primary), "gpt-5");

        assert!(AgentRole::Coordinator.tools().is_empty());
        let analyzer_tools = AgentRole::Analyzer
            .tools()
            .iter()
            .map(|tool| tool.name().to_string())
            .collect::<Vec<String>>();
        assert!(analyzer_tools.contains(&"calculate_statistics".to_string()));
        assert!(
            AgentRole::Researcher
                .tools()
                .iter()
                .any(|tool| tool.name() == "validate_sources")
        );
        assert!(
            AgentRole::Summarizer
                .tools()
                .iter()
                .any(|tool| tool.name() == "format_conclusion")
        );
    }

    // -----------------------------------------------------------------------
    // LLM agent tool loop
    // -----------------------------------------------------------------------

    struct ScriptedModel {
        replies: Mutex<VecDeque<ChatMessage>>,
        calls: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ChatMessage>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, messages: &[ChatMessage], offered: &[ToolSpec]) -> Result<ChatMessage> {
            self.calls
                .lock()
                .expect("call log should lock")
                .push((messages.to_vec(), offered.len()));
            self.replies
                .lock()
                .expect("reply queue should lock")
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
        }
    }

    #[tokio::test]
    async fn llm_agent_runs_requested_tools_and_returns_final_text() {
        let tool_turn = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "calculate_statistics".to_string(),
                    arguments: r#"{"numbers":[1,2,3]}"#.to_string(),
                },
            }],
            tool_call_id: None,
        };
        let model = Arc::new(ScriptedModel::new(vec![
            tool_turn,
            ChatMessage::assistant("平均は2です。"),
        ]));
        let agent = LlmAgent::new(
            "Analyzer",
            "analyze",
            model.clone(),
            crate::tools::analysis::tools(),
        );

        let answer = agent.invoke("1,2,3の平均は？").await.expect("agent should answer");
        assert_eq!(answer, "平均は2です。");

        let calls = model.calls.lock().expect("call log should lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, 5);
        assert_eq!(calls[0].0[0].role, "system");
        let tool_message = calls[1]
            .0
            .iter()
            .find(|message| message.role == "tool")
            .expect("tool result should be sent back");
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        let payload: Value =
            serde_json::from_str(tool_message.text()).expect("tool result should be JSON");
        assert_eq!(payload["mean"], json!(2.0));
    }

    #[tokio::test]
    async fn llm_agent_rejects_empty_answers_and_unknown_tools() {
        let model = Arc::new(ScriptedModel::new(vec![ChatMessage::assistant("  ")]));
        let agent = LlmAgent::new("Coordinator", "plan", model, Vec::new());
        let err = agent.invoke("hi").await.expect_err("empty answer should fail");
        assert!(err.to_string().contains("empty response"));

        let unknown = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_x".to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "delete_everything".to_string(),
                    arguments: "{}".to_string(),
                },
            }],
            tool_call_id: None,
        };
        let model = Arc::new(ScriptedModel::new(vec![unknown, ChatMessage::assistant("ok")]));
        let agent = LlmAgent::new("Researcher", "research", model.clone(), Vec::new());
        assert_eq!(agent.invoke("hi").await.expect("agent should recover"), "ok");
        let calls = model.calls.lock().expect("call log should lock");
        let tool_message = calls[1]
            .0
            .iter()
            .find(|message| message.role == "tool")
            .expect("tool error should be sent back");
        assert!(tool_message.text().contains("unknown_tool"));
    }

    // -----------------------------------------------------------------------
    // Provider wire format
    // -----------------------------------------------------------------------

    #[test]
    fn chat_request_body_and_url_follow_azure_shape() {
        assert_eq!(
            chat_completions_url("https://res.openai.azure.com/", "gpt-5", "2024-08-01-preview"),
            "https://res.openai.azure.com/openai/deployments/gpt-5/chat/completions?api-version=2024-08-01-preview"
        );

        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        let plain = build_chat_request_body(&messages, &[], 4096, None);
        assert_eq!(plain["max_completion_tokens"], json!(4096));
        assert!(plain.get("tools").is_none());
        assert!(plain.get("temperature").is_none());
        assert_eq!(plain["messages"][1]["content"], json!("hello"));

        let spec = ToolSpec {
            name: "clean_text".to_string(),
            description: "clean".to_string(),
            parameters: json!({"type": "object"}),
        };
        let with_tools = build_chat_request_body(&messages, &[spec], 100, Some(0.2));
        assert_eq!(with_tools["tool_choice"], json!("auto"));
        assert_eq!(with_tools["tools"][0]["type"], json!("function"));
        assert_eq!(with_tools["tools"][0]["function"]["name"], json!("clean_text"));
        assert!(with_tools.get("temperature").is_some());
    }

    #[test]
    fn chat_completion_parsing_reads_text_and_tool_calls() {
        let payload = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "analyze_trend", "arguments": "{\"numbers\":[1,2]}"}
                    }]
                }
            }]
        });
        let message = parse_chat_completion(&payload).expect("payload should parse");
        assert_eq!(message.text(), "");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].function.name, "analyze_trend");

        let err = parse_chat_completion(&json!({"choices": []}))
            .expect_err("missing message should fail");
        assert!(err.to_string().contains("did not include a message"));
    }

    // -----------------------------------------------------------------------
    // Local tools
    // -----------------------------------------------------------------------

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn statistics_cover_center_spread_and_empty_input() {
        let stats = calculate_statistics(&[1.0, 2.0, 3.0, 4.0]).expect("stats should compute");
        assert_eq!(stats.count, 4);
        assert!(approx(stats.mean, 2.5));
        assert!(approx(stats.median, 2.5));
        assert!(approx(stats.range, 3.0));
        assert!(approx(stats.variance.expect("variance for n>=2"), 5.0 / 3.0));

        let single = calculate_statistics(&[7.0]).expect("single value should compute");
        assert!(single.stdev.is_none());

        assert!(calculate_statistics(&[]).is_err());
    }

    #[test]
    fn number_extraction_trend_and_categorization() {
        let numbers = extract_numbers_from_text("売上は1,234.5円、前年比-3.2%、社員10人");
        assert_eq!(numbers, vec![1234.5, -3.2, 10.0]);

        let trend = analyze_trend(&[1.0, 2.0, 3.0, 2.0]).expect("trend should compute");
        assert_eq!(trend.trend, TrendDirection::Rising);
        assert_eq!(trend.increases, 2);
        assert_eq!(trend.decreases, 1);
        assert!(approx(trend.total_change, 1.0));
        assert!(approx(trend.percent_change, 100.0));
        assert!(analyze_trend(&[5.0]).is_err());

        let data = BTreeMap::from([
            ("a".to_string(), json!(10)),
            ("b".to_string(), json!(3)),
            ("c".to_string(), json!("n/a")),
        ]);
        let categorized = categorize_data(&data, 5.0);
        assert_eq!(categorized.high.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(categorized.low.keys().collect::<Vec<_>>(), vec!["b"]);

        let comparison = compare_data(&[1.0, 2.0], &[3.0, 5.0], "before", "after")
            .expect("comparison should compute");
        assert!(approx(comparison.mean_difference, 2.5));
        assert!(comparison.mean_trend.starts_with("after"));
    }

    #[test]
    fn function_tools_decode_arguments_and_report_errors() {
        let analysis_tools = crate::tools::analysis::tools();
        let stats = analysis_tools
            .iter()
            .find(|tool| tool.name() == "calculate_statistics")
            .expect("statistics tool should exist");
        assert_eq!(stats.call(&json!({"numbers": [2.0, 4.0]}))["mean"], json!(3.0));

        let invalid = stats.call(&json!({"values": "x"}));
        assert_eq!(invalid["status"], json!("error"));
        assert_eq!(invalid["code"], json!("invalid_args"));

        let failed = stats.call(&json!({"numbers": []}));
        assert_eq!(failed["code"], json!("failed"));

        let spec = stats.spec();
        assert!(spec.parameters.get("$schema").is_none());
        assert!(spec.parameters["properties"].get("numbers").is_some());
    }

    #[test]
    fn formatting_helpers_render_markdown() {
        let headers = vec!["A".to_string(), "B".to_string()];
        let rows = vec![vec![json!(1)], vec![json!(2), json!(3), json!(4)]];
        assert_eq!(
            create_summary_table(&headers, &rows),
            "| A | B |\n| --- | --- |\n| 1 |  |\n| 2 | 3 |"
        );
        assert_eq!(create_summary_table(&headers, &[]), "");

        assert_eq!(
            highlight_key_points("Rust is fast. rust is safe.", &["Rust".to_string()]),
            "**Rust** is fast. **Rust** is safe."
        );
        assert_eq!(clean_text("a   b\n\n\n\nc  "), "a b\n\nc");
        assert_eq!(
            create_bullet_list(&["x".to_string(), "y".to_string()], true),
            "1. x\n2. y"
        );

        let conclusion = format_conclusion("short", &["one".to_string()], &[]);
        assert!(conclusion.starts_with("# Conclusion"));
        assert!(conclusion.contains("1. one"));
        assert!(!conclusion.contains("## Recommendations"));

        let meta = BTreeMap::from([("author".to_string(), "bot".to_string())]);
        assert_eq!(add_metadata("body", &meta), "---\nauthor: bot\n---\nbody");

        let content = BTreeMap::from([("Points".to_string(), json!(["a", "b"]))]);
        let markdown = format_as_markdown(&content, "Report");
        assert!(markdown.starts_with("# Report\n\n## Points\n\n- a\n- b"));
    }

    #[test]
    fn information_tools_group_and_validate_sources() {
        let matches = extract_key_information(
            "Rust is fast. Rust is safe. Go is simple.",
            &["rust".to_string(), "python".to_string()],
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matches, vec!["Rust is fast", "Rust is safe"]);

        let organized = organize_information(
            "Rust is fast. Go is simple. Weather is nice.",
            &["rust".to_string(), "go".to_string()],
        );
        assert_eq!(organized["rust"], vec!["Rust is fast"]);
        assert_eq!(organized["go"], vec!["Go is simple"]);
        assert_eq!(organized[OTHER_CATEGORY], vec!["Weather is nice"]);

        let report = validate_sources("See https://example.com/a and 「引用文」.");
        assert_eq!(report.found_urls, 1);
        assert_eq!(report.urls, vec!["https://example.com/a"]);
        assert_eq!(report.quotes, vec!["引用文"]);
        assert!(report.has_sources);
        assert!(!validate_sources("no sources here").has_sources);

        let summary = summarize_search_results("一文目です。二文目です。三文目です。", 10);
        assert_eq!(summary, "一文目です。二文目です。");
    }

    // -----------------------------------------------------------------------
    // Report
    // -----------------------------------------------------------------------

    fn sample_result() -> WorkflowResult {
        WorkflowResult {
            query: "What is Rust?".to_string(),
            final_answer: "A systems language.".to_string(),
            execution_time: 1.5,
            agent_outputs: BTreeMap::from([
                ("coordinator".to_string(), "plan".to_string()),
                ("researcher".to_string(), "facts".to_string()),
                ("analyzer".to_string(), "insight".to_string()),
                ("summarizer".to_string(), "A systems language.".to_string()),
            ]),
            execution_history: Vec::new(),
        }
    }

    #[test]
    fn markdown_report_lists_stages_in_pipeline_order() {
        let at = Local
            .with_ymd_and_hms(2025, 1, 2, 3, 4, 5)
            .single()
            .expect("timestamp should be unambiguous");
        assert_eq!(report_file_name(at), "result_20250102_030405.md");

        let markdown = render_markdown(&sample_result(), at);
        assert!(markdown.starts_with("# Multi-stage reasoning result"));
        assert!(markdown.contains("**Run at**: 2025-01-02 03:04:05"));
        assert!(markdown.contains("**Execution time**: 1.50s"));
        assert!(markdown.contains("## Final answer\n\nA systems language."));
        let coordinator = markdown.find("### Coordinator").expect("coordinator section");
        let summarizer = markdown.find("### Summarizer").expect("summarizer section");
        assert!(coordinator < summarizer);
    }

    #[test]
    fn save_result_writes_a_timestamped_file() {
        let dir = tempdir().expect("temp dir should be created");
        let output = dir.path().join("reports");
        let path = save_result(&sample_result(), &output).expect("report should be saved");

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name should be utf-8");
        assert!(name.starts_with("result_") && name.ends_with(".md"));
        let content = std::fs::read_to_string(&path).expect("report should be readable");
        assert!(content.contains("A systems language."));
        assert!(content.contains("### Analyzer\n\ninsight"));
    }

    // -----------------------------------------------------------------------
    // Configuration and errors
    // -----------------------------------------------------------------------

    #[test]
    fn runtime_config_defaults_without_profile_file() {
        let cfg = base_cfg();
        assert_eq!(cfg.azure.endpoint, None);
        assert_eq!(cfg.azure.credential, CredentialMode::AzureCli);
        assert_eq!(cfg.azure.api_version, DEFAULT_API_VERSION);
        assert_eq!(cfg.speech.region, "japaneast");
        assert_eq!(cfg.limits, SafetyLimits::default());
        assert_eq!(cfg.exit_keywords, vec!["exit", "quit", "終了", "さようなら", "バイバイ"]);
        assert_eq!(cfg.voice_agent_name, "VoiceAssistant");
    }

    #[test]
    fn runtime_config_prefers_cli_over_profile_values() {
        let dir = tempdir().expect("temp dir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[profiles.staging]
azure_endpoint = "https://profile.openai.azure.com/"
deployment = "profile-deployment"
max_turns = 10
exit_keywords = ["Bye", " stop "]
"#,
        )
        .expect("config should be written");
        let config_path = path.to_string_lossy().to_string();
        let profiles = load_profiles(&config_path).expect("profiles should load");

        let mut cli = test_cli(&config_path, "staging");
        cli.deployment = Some("cli-deployment".to_string());
        cli.azure_api_key = Some("secret-key-value".to_string());
        cli.exit_keywords = vec!["BYE".to_string(), "quit".to_string()];

        let cfg = resolve_runtime_config(&cli, &profiles).expect("config should resolve");
        assert_eq!(cfg.azure.endpoint.as_deref(), Some("https://profile.openai.azure.com"));
        assert_eq!(cfg.azure.deployment, "cli-deployment");
        assert_eq!(cfg.azure.credential, CredentialMode::ApiKey("secret-key-value".to_string()));
        assert_eq!(cfg.limits.max_turns, 10);
        assert_eq!(cfg.exit_keywords, vec!["bye", "stop", "quit"]);

        let missing = resolve_runtime_config(&test_cli(&config_path, "prod"), &profiles)
            .expect_err("unknown profile should fail");
        assert!(missing.to_string().contains("Available profiles: staging"));
    }

    #[test]
    fn invalid_profile_fields_are_rejected() {
        let dir = tempdir().expect("temp dir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[profiles.default]\nazure_api_key = \"nope\"\n")
            .expect("config should be written");
        let err = load_profiles(&path.to_string_lossy()).expect_err("unknown field should fail");
        assert!(format!("{err:#}").contains("invalid profile configuration"));
    }

    #[test]
    fn validation_requires_endpoint_and_speech_key() {
        let mut cfg = base_cfg();
        let err = validate_pipeline_config(&cfg).expect_err("missing endpoint should fail");
        assert!(err.to_string().contains("not configured"));
        assert_eq!(categorize_error(&err), ErrorCategory::Config);

        cfg.azure.endpoint = Some("res.openai.azure.com".to_string());
        assert!(validate_pipeline_config(&cfg).is_err());

        cfg.azure.endpoint = Some("https://res.openai.azure.com".to_string());
        assert_eq!(
            validate_pipeline_config(&cfg).expect("endpoint should validate"),
            "https://res.openai.azure.com"
        );
        assert!(validate_voice_config(&cfg, true).is_ok());
        let speech = validate_voice_config(&cfg, false).expect_err("speech key is required");
        assert!(speech.to_string().contains("AZURE_SPEECH_KEY"));

        cfg.speech.key = Some("speech-key".to_string());
        assert!(validate_voice_config(&cfg, false).is_ok());
    }

    #[test]
    fn zero_limits_produce_warnings_and_secrets_are_masked() {
        let limits = SafetyLimits {
            max_turns: 0,
            max_consecutive_errors: 3,
            max_session_duration_secs: 0,
        };
        assert_eq!(safety_limit_warnings(&limits).len(), 2);
        assert!(safety_limit_warnings(&SafetyLimits::default()).is_empty());

        assert_eq!(mask_secret("abcdefghijkl", false), "abcdefgh...");
        assert_eq!(mask_secret("abcdefghijkl", true), "abcdefghijkl");
    }

    #[test]
    fn errors_are_categorized_and_redacted() {
        let config = anyhow::anyhow!("AZURE_OPENAI_ENDPOINT is not configured");
        let rendered = format_cli_error(&config, false);
        assert!(rendered.starts_with("[CONFIG] "));
        assert!(rendered.contains("\nHint: "));

        let speech = anyhow::anyhow!("speech recognition failed with status 'Error'");
        assert_eq!(categorize_error(&speech), ErrorCategory::Speech);

        let input = anyhow::anyhow!("unknown voice profile 'robot'. Available: default");
        assert_eq!(categorize_error(&input), ErrorCategory::Input);

        let other = anyhow::anyhow!("something odd happened");
        assert_eq!(categorize_error(&other), ErrorCategory::Internal);

        let leaky = anyhow::anyhow!("request failed: api-key: abc123 rejected; Authorization: Bearer eyJtoken");
        let redacted = render_error_message(&leaky, false);
        assert!(redacted.contains("api-key: [REDACTED] rejected"));
        assert!(redacted.contains("Bearer [REDACTED]"));
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("eyJtoken"));
        assert!(render_error_message(&leaky, true).contains("abc123"));
    }

    #[test]
    fn cli_parses_commands_and_labels_them() {
        let cli = Cli::try_parse_from(["reasonvox", "reason", "what", "is", "rust", "--save-output"])
            .expect("reason command should parse");
        match &cli.command {
            Commands::Reason {
                query,
                save_output,
                output_dir,
                ..
            } => {
                assert_eq!(query.join(" "), "what is rust");
                assert!(*save_output);
                assert_eq!(output_dir, "output");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(command_label(&cli.command), "reason");

        let voice = Cli::try_parse_from(["reasonvox", "voice", "--text-only", "--yes"])
            .expect("voice command should parse");
        assert_eq!(command_label(&voice.command), "voice.text");

        let voices = Cli::try_parse_from(["reasonvox", "voices", "show", "gentle"])
            .expect("voices command should parse");
        assert_eq!(command_label(&voices.command), "voices.show");
    }

    // -----------------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------------

    #[test]
    fn telemetry_summary_counts_pipeline_and_voice_events() {
        let event = |ts: u64, event: &str, run: &str, command: &str| {
            json!({"ts_unix_ms": ts, "event": event, "run_id": run, "command": command}).to_string()
        };
        let lines = vec![
            event(1000, "command.started", "run-a", "reason"),
            event(1100, "pipeline.stage.completed", "run-a", "reason"),
            event(1200, "pipeline.stage.failed", "run-a", "reason"),
            event(1300, "command.failed", "run-a", "reason"),
            event(2000, "voice.turn.completed", "run-b", "voice"),
            event(2100, "voice.command.handled", "run-b", "voice"),
            event(2200, "voice.session.ended", "run-b", "voice"),
            event(2300, "command.completed", "run-b", "voice"),
            "not-json".to_string(),
        ];

        let summary = summarize_telemetry_lines(lines, 100);
        assert_eq!(summary.total_lines, 9);
        assert_eq!(summary.parsed_events, 8);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.unique_runs.len(), 2);
        assert_eq!(summary.stage_completed, 1);
        assert_eq!(summary.stage_failed, 1);
        assert_eq!(summary.voice_turns, 1);
        assert_eq!(summary.voice_commands, 1);
        assert_eq!(summary.voice_sessions, 1);
        assert_eq!(summary.command_completed, 1);
        assert_eq!(summary.command_failed, 1);
        assert_eq!(summary.command_counts.get("reason"), Some(&4));
        assert_eq!(summary.last_event_ts_unix_ms, Some(2300));
    }

    #[test]
    fn telemetry_sink_appends_json_lines() {
        let dir = tempdir().expect("temp dir should be created");
        let mut cfg = base_cfg();
        cfg.telemetry_enabled = true;
        cfg.telemetry_path = dir
            .path()
            .join("nested/telemetry.jsonl")
            .to_string_lossy()
            .to_string();

        let sink = TelemetrySink::new(&cfg, "reason".to_string());
        sink.emit("command.started", json!({}));
        sink.emit("pipeline.completed", json!({"execution_time_secs": 1.0}));

        let content = std::fs::read_to_string(&cfg.telemetry_path).expect("telemetry should exist");
        let events = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("line should be JSON"))
            .collect::<Vec<Value>>();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["event"], json!("pipeline.completed"));
        assert_eq!(events[1]["command"], json!("reason"));
        assert_eq!(events[0]["run_id"], events[1]["run_id"]);

        let disabled = TelemetrySink::disabled();
        disabled.emit("command.started", json!({}));
    }

    // -----------------------------------------------------------------------
    // Context manager
    // -----------------------------------------------------------------------

    #[test]
    fn context_keys_are_deduplicated_with_latest_value() {
        let mut context = ContextManager::default();
        context.add("topic", "天気", Importance::Normal);
        context.add("topic", "料理", Importance::Normal);
        assert_eq!(context.len(), 1);
        assert_eq!(context.get("topic"), Some("料理"));
        assert_eq!(context.get("missing"), None);
    }

    #[test]
    fn context_eviction_keeps_important_items() {
        let mut context = ContextManager::new(5);
        context.add("h1", "v", Importance::High);
        context.add("l1", "v", Importance::Low);
        context.add("n1", "v", Importance::Normal);
        context.add("h2", "v", Importance::High);
        context.add("l2", "v", Importance::Low);
        context.add("n2", "v", Importance::Normal);
        context.add("l3", "v", Importance::Low);

        assert_eq!(context.len(), 5);
        let important = context.important();
        assert_eq!(important.len(), 2);
        assert!(context.get("h1").is_some() && context.get("h2").is_some());
        let lower = context
            .all()
            .iter()
            .filter(|item| item.importance != Importance::High)
            .count();
        assert_eq!(lower, 3);
        // Normal outranks low, so both normal items survive.
        assert!(context.get("n1").is_some() && context.get("n2").is_some());
    }

    #[test]
    fn name_extraction_reads_self_introductions() {
        let mut context = ContextManager::default();
        context.extract_from_history(&[ConversationTurn::user("私の名前は太郎です。")]);
        assert_eq!(context.get(USER_NAME_KEY), Some("太郎"));
        assert_eq!(context.important().len(), 1);

        let mut none = ContextManager::default();
        none.extract_from_history(&[ConversationTurn::user("こんにちは、元気ですか")]);
        assert_eq!(none.get(USER_NAME_KEY), None);

        assert_eq!(extract_name("My name is Alice."), Some("Alice".to_string()));
        assert_eq!(extract_name("名前はとてもとてもながいなまえです"), None);
    }

    #[test]
    fn topic_extraction_prefers_the_most_recent_match() {
        let history = vec![
            ConversationTurn::user("Pythonのコードを書きたい"),
            ConversationTurn::assistant("いいですね"),
            ConversationTurn::user("今日の天気は？"),
            ConversationTurn::assistant("晴れです"),
            ConversationTurn::user("ありがとう"),
        ];
        let mut context = ContextManager::default();
        context.extract_from_history(&history);
        assert_eq!(context.get(LAST_TOPIC_KEY), Some("天気"));

        assert_eq!(detect_topic("GPTについて"), Some("AI"));
        assert_eq!(detect_topic("特に何も"), None);
    }

    #[test]
    fn context_summary_groups_by_importance_and_clears() {
        let mut context = ContextManager::default();
        assert!(context.format_summary().contains("ありません"));

        context.add("user_name", "花子", Importance::High);
        context.add("mood", "元気", Importance::Low);
        context.set_preference("preferred_voice", "gentle");
        assert_eq!(context.preference("preferred_voice"), Some("gentle"));

        let summary = context.format_summary();
        assert!(summary.contains("【重要】\n  user_name: 花子"));
        assert!(summary.contains("【補足】\n  mood: 元気"));
        assert!(summary.contains("【ユーザー設定】\n  preferred_voice: gentle"));
        assert!(!summary.contains("【通常】"));

        context.clear();
        assert!(context.is_empty());
        assert_eq!(context.preference("preferred_voice"), None);
    }

    // -----------------------------------------------------------------------
    // Conversation summarizer
    // -----------------------------------------------------------------------

    #[test]
    fn summarizer_handles_empty_history() {
        let summarizer = ConversationSummarizer::default();
        assert_eq!(summarizer.summarize(&[], true), "まだ会話履歴がありません。");

        let stats = summarizer.stats(&[]);
        assert_eq!(stats.total_turns, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.avg_user_chars, 0.0);
        assert_eq!(stats.avg_assistant_chars, 0.0);
    }

    #[test]
    fn summarizer_counts_turns_and_topics() {
        let history = vec![
            ConversationTurn::user("今日の天気"),
            ConversationTurn::assistant("晴れ"),
            ConversationTurn::user("なぜ"),
            ConversationTurn::assistant("高気圧です"),
        ];
        let summarizer = ConversationSummarizer::default();
        let stats = summarizer.stats(&history);
        assert_eq!(stats.total_turns, 2);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 2);
        assert!(approx(stats.avg_user_chars, 3.5));
        assert!(approx(stats.avg_assistant_chars, 3.5));

        let summary = summarizer.summarize(&history, true);
        assert!(summary.contains("会話ターン数: 2"));
        assert!(summary.contains("最近の話題: なぜ"));
        assert!(summary.contains("主な話題: 天気, 理由"));
        assert!(!summarizer.summarize(&history, false).contains("最近の話題"));

        assert!(summarizer.format_stats(&stats).contains("総ターン数: 2"));
    }

    #[test]
    fn summarizer_truncates_excerpts_and_output() {
        let long = "あ".repeat(60);
        let history = vec![ConversationTurn::user(long)];
        let summary = ConversationSummarizer::default().summarize(&history, true);
        assert!(summary.contains(&format!("{}...", "あ".repeat(50))));

        let short = ConversationSummarizer::new(10).summarize(&history, true);
        assert_eq!(short.chars().count(), 13);
        assert!(short.ends_with("..."));

        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("abcd", 3), "abc...");
    }

    // -----------------------------------------------------------------------
    // Voice commands, limits and profiles
    // -----------------------------------------------------------------------

    #[test]
    fn voice_commands_are_classified_by_ordered_rules() {
        assert_eq!(classify_command("もっと速く話して"), Some(VoiceCommand::SpeedUp));
        assert_eq!(classify_command("ゆっくり話して"), Some(VoiceCommand::SpeedDown));
        assert_eq!(classify_command("声を変えて"), Some(VoiceCommand::VoiceChange));
        assert_eq!(classify_command("会話を要約して"), Some(VoiceCommand::Summary));
        assert_eq!(classify_command("音声をリセットして"), Some(VoiceCommand::ResetVoice));
        assert_eq!(
            classify_command("Please SUMMARIZE our conversation"),
            Some(VoiceCommand::Summary)
        );
        assert_eq!(classify_command("Speak Faster"), Some(VoiceCommand::SpeedUp));
        assert_eq!(classify_command("今日の天気は？"), None);
        assert_eq!(classify_command("   "), None);

        for question in [
            "パスワードをリセットする方法を教えて",
            "ゆっくり眠れるコツは？",
            "昨日は遅くまで働いた",
            "この記事のまとめを教えて",
            "速く走るにはどうすればいい？",
            "how do I speed up my laptop",
        ] {
            assert_eq!(classify_command(question), None, "{question} should reach the model");
        }
    }

    #[test]
    fn exit_keywords_match_exactly_ignoring_case() {
        let keywords = vec!["exit".to_string(), "終了".to_string()];
        assert!(is_exit_keyword(" EXIT ", &keywords));
        assert!(is_exit_keyword("終了", &keywords));
        assert!(!is_exit_keyword("終了します", &keywords));
        assert!(!is_exit_keyword("", &keywords));
    }

    #[test]
    fn speaking_rate_steps_and_saturates() {
        assert_eq!(step_speaking_rate(1.0, true), 1.25);
        assert_eq!(step_speaking_rate(1.5, true), 1.5);
        assert_eq!(step_speaking_rate(0.5, false), 0.5);
        assert_eq!(step_speaking_rate(0.9, true), 1.15);
        assert_eq!(step_speaking_rate(1.4, true), 1.5);

        let mut state = VoiceState::default();
        assert!(state.step_rate(true));
        assert!(state.step_rate(true));
        assert!(!state.step_rate(true));
        assert_eq!(state.rate, MAX_SPEAKING_RATE);

        assert_eq!(state.cycle_profile(), "gentle");
        state.reset();
        assert_eq!(state, VoiceState::default());
    }

    #[test]
    fn safety_limits_terminate_in_priority_order() {
        let limits = SafetyLimits {
            max_turns: 2,
            max_consecutive_errors: 3,
            max_session_duration_secs: 60,
        };
        let fresh = SafetyCounters::default();
        assert_eq!(check_safety_limits(&limits, &fresh, Duration::from_secs(1)), None);

        let both = SafetyCounters {
            turn_count: 2,
            consecutive_errors: 3,
        };
        assert_eq!(
            check_safety_limits(&limits, &both, Duration::ZERO),
            Some(TerminationReason::MaxTurns)
        );

        let errors = SafetyCounters {
            turn_count: 0,
            consecutive_errors: 3,
        };
        assert_eq!(
            check_safety_limits(&limits, &errors, Duration::ZERO),
            Some(TerminationReason::TooManyErrors)
        );

        assert_eq!(check_safety_limits(&limits, &fresh, Duration::from_secs(60)), None);
        assert_eq!(
            check_safety_limits(&limits, &fresh, Duration::from_secs(61)),
            Some(TerminationReason::DurationExceeded)
        );

        let unlimited = SafetyLimits {
            max_turns: 0,
            max_consecutive_errors: 3,
            max_session_duration_secs: 0,
        };
        let busy = SafetyCounters {
            turn_count: 10_000,
            consecutive_errors: 0,
        };
        assert_eq!(
            check_safety_limits(&unlimited, &busy, Duration::from_secs(86_400)),
            None
        );
    }

    #[test]
    fn voice_profiles_resolve_and_cycle() {
        let default = get_voice_profile("default").expect("default profile should exist");
        assert_eq!(default.voice_id, "ja-JP-NanamiNeural");
        assert_eq!(
            get_voice_profile("keita").expect("raw voice should exist").gender,
            Gender::Male
        );
        assert!(get_voice_profile("robot").is_none());
        assert_eq!(list_available_profiles().len(), 11);

        let err = require_voice_profile("robot").expect_err("unknown key should fail");
        assert!(err.to_string().contains("unknown voice profile"));

        let custom = create_custom_profile("Mine", "unknown", 1.2, "+5%", "custom");
        assert_eq!(custom.voice_id, "ja-JP-NanamiNeural");
        assert_eq!(custom.display_name, "Mine");

        assert_eq!(next_named_profile("default"), "gentle");
        assert_eq!(next_named_profile("friendly_male"), "default");
        assert_eq!(next_named_profile("nanami"), "default");
        assert!(profile_description("robot").contains("does not exist"));
    }

    // -----------------------------------------------------------------------
    // Speech helpers
    // -----------------------------------------------------------------------

    #[test]
    fn recognition_responses_map_to_text_or_errors() {
        let success: RecognitionResponse = serde_json::from_value(json!({
            "RecognitionStatus": "Success",
            "DisplayText": "こんにちは。",
            "Offset": 0,
            "Duration": 100
        }))
        .expect("response should deserialize");
        assert_eq!(
            parse_recognition_response(&success).expect("success should yield text"),
            "こんにちは。"
        );

        let no_match = RecognitionResponse {
            recognition_status: "NoMatch".to_string(),
            display_text: None,
        };
        let err = parse_recognition_response(&no_match).expect_err("no match should fail");
        assert!(err.to_string().contains("no speech could be recognized"));
    }

    #[test]
    fn ssml_escapes_text_and_sets_prosody() {
        let ssml = build_ssml("a < b & 'c'", "ja-JP", "ja-JP-NanamiNeural", 1.25, "+0%");
        assert!(ssml.contains("a &lt; b &amp; &apos;c&apos;"));
        assert!(ssml.contains("<voice name='ja-JP-NanamiNeural'>"));
        assert!(ssml.contains("rate='1.25'"));
        assert!(ssml.contains("xml:lang='ja-JP'"));

        assert_eq!(
            command_argv("arecord -d {secs} 'a b'", 7).expect("command should split"),
            vec!["arecord", "-d", "7", "a b"]
        );
        assert!(command_argv("   ", 1).is_err());
        assert!(tts_url("japaneast").starts_with("https://japaneast.tts.speech.microsoft.com"));
        assert!(stt_url("japaneast", "ja-JP").contains("language=ja-JP"));
    }

    #[tokio::test]
    async fn console_synthesizer_reports_settings_without_echoing() {
        let default = require_voice_profile(DEFAULT_PROFILE_KEY).expect("default profile should exist");
        let mut synthesizer = ConsoleSynthesizer::new(&default);
        let status = synthesizer.speak(" こんにちは ").await.expect("console speak should succeed");
        assert_eq!(status, "text only (5 chars, ja-JP-NanamiNeural @ 1.00x)");

        let gentle = require_voice_profile("gentle").expect("gentle profile should exist");
        synthesizer.set_voice(&gentle);
        synthesizer.set_speaking_rate(step_speaking_rate(gentle.speaking_rate, true));
        let status = synthesizer.speak("はい").await.expect("console speak should succeed");
        assert!(status.contains("ja-JP-ShioriNeural @ 1.15x"));
    }

    // -----------------------------------------------------------------------
    // Voice session and chat loop
    // -----------------------------------------------------------------------

    struct ScriptedRecognizer {
        utterances: VecDeque<String>,
        attempts: Arc<Mutex<usize>>,
    }

    impl ScriptedRecognizer {
        fn new(utterances: &[&str]) -> (Self, Arc<Mutex<usize>>) {
            let attempts = Arc::new(Mutex::new(0));
            let recognizer = Self {
                utterances: utterances.iter().map(|u| u.to_string()).collect(),
                attempts: attempts.clone(),
            };
            (recognizer, attempts)
        }
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn recognize_once(&mut self) -> Result<String> {
            *self.attempts.lock().expect("attempt counter should lock") += 1;
            self.utterances
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no speech could be recognized (NoMatch)"))
        }
    }

    #[derive(Default, Clone)]
    struct SpokenLog {
        texts: Arc<Mutex<Vec<String>>>,
        rates: Arc<Mutex<Vec<f32>>>,
        voices: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingSynthesizer {
        log: SpokenLog,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn speak(&mut self, text: &str) -> Result<String> {
            if self.fail {
                return Err(anyhow::anyhow!("speech synthesis endpoint returned status 401"));
            }
            self.log
                .texts
                .lock()
                .expect("spoken log should lock")
                .push(text.to_string());
            Ok("ok".to_string())
        }

        fn set_voice(&mut self, profile: &VoiceProfile) {
            self.log
                .voices
                .lock()
                .expect("voice log should lock")
                .push(profile.voice_id.to_string());
        }

        fn set_speaking_rate(&mut self, rate: f32) {
            self.log.rates.lock().expect("rate log should lock").push(rate);
        }
    }

    fn chat_loop(
        utterances: &[&str],
        reply: Option<&str>,
        limits: SafetyLimits,
        fail_synthesis: bool,
    ) -> (VoiceChatLoop, SpokenLog, Arc<Mutex<usize>>, PromptLog) {
        let (agent, prompts) = scripted_agent("VoiceAssistant", reply);
        let (recognizer, attempts) = ScriptedRecognizer::new(utterances);
        let log = SpokenLog::default();
        let synthesizer = RecordingSynthesizer {
            log: log.clone(),
            fail: fail_synthesis,
        };
        let chat = VoiceChatLoop::new(
            VoiceAgentSession::new(agent),
            Box::new(recognizer),
            Box::new(synthesizer),
            limits,
            vec!["exit".to_string(), "終了".to_string()],
            Arc::new(AtomicBool::new(false)),
        );
        (chat, log, attempts, prompts)
    }

    #[tokio::test]
    async fn voice_loop_handles_message_command_and_exit() {
        let (mut chat, log, _, prompts) = chat_loop(
            &["こんにちは", "もう少し速く話して", "exit"],
            Some("こんにちは！"),
            SafetyLimits::default(),
            false,
        );

        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::ExitKeyword);
        assert_eq!(report.turns, 1);
        assert_eq!(report.llm_calls, 1);
        assert_eq!(report.commands_handled, 1);
        assert_eq!(report.messages, 2);

        let spoken = log.texts.lock().expect("spoken log should lock").clone();
        assert_eq!(spoken.len(), 4);
        assert_eq!(spoken[0], WELCOME_MESSAGE);
        assert_eq!(spoken[1], "こんにちは！");
        assert!(spoken[2].contains("1.25"));
        assert_eq!(spoken[3], FAREWELL_MESSAGE);
        assert_eq!(*log.rates.lock().expect("rate log should lock"), vec![1.25]);

        // Commands never reach the model.
        assert_eq!(prompts.lock().expect("prompt log should lock").len(), 1);
        assert_eq!(chat.voice_state().rate, 1.25);
    }

    #[tokio::test]
    async fn voice_loop_stops_after_repeated_recognition_failures() {
        let limits = SafetyLimits {
            max_turns: 50,
            max_consecutive_errors: 2,
            max_session_duration_secs: 1800,
        };
        let (mut chat, _, attempts, prompts) = chat_loop(&[], Some("unused"), limits, false);

        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::TooManyErrors);
        assert_eq!(report.turns, 0);
        assert_eq!(report.llm_calls, 0);
        assert_eq!(
            *attempts.lock().expect("attempt counter should lock"),
            2 * RECOGNITION_ATTEMPTS
        );
        assert!(prompts.lock().expect("prompt log should lock").is_empty());
    }

    #[tokio::test]
    async fn voice_loop_stops_at_max_turns() {
        let limits = SafetyLimits {
            max_turns: 2,
            max_consecutive_errors: 3,
            max_session_duration_secs: 1800,
        };
        let (mut chat, _, _, prompts) = chat_loop(&["一", "二", "三"], Some("はい"), limits, false);

        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::MaxTurns);
        assert_eq!(report.turns, 2);
        assert_eq!(prompts.lock().expect("prompt log should lock").len(), 2);
        assert_eq!(chat.session().turn_count(), 2);
    }

    #[tokio::test]
    async fn voice_loop_counts_model_failures_as_errors() {
        let limits = SafetyLimits {
            max_turns: 50,
            max_consecutive_errors: 2,
            max_session_duration_secs: 1800,
        };
        let (mut chat, _, _, _) = chat_loop(&["一", "二", "三"], None, limits, false);

        // A successful recognition clears the streak, so each model failure
        // only counts once. The limit is reached by the recognition miss
        // after the script runs out.
        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::TooManyErrors);
        assert_eq!(report.turns, 0);
        assert_eq!(report.llm_calls, 3);
        assert!(chat.session().history().is_empty());

        let strict = SafetyLimits {
            max_consecutive_errors: 1,
            ..limits
        };
        let (mut chat, _, _, _) = chat_loop(&["一", "二", "三"], None, strict, false);
        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::TooManyErrors);
        assert_eq!(report.llm_calls, 1);
    }

    #[tokio::test]
    async fn voice_loop_survives_synthesis_failures() {
        let (mut chat, _, _, _) = chat_loop(
            &["私の名前は花子です。", "終了"],
            Some("花子さん、こんにちは。"),
            SafetyLimits::default(),
            true,
        );

        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::ExitKeyword);
        assert_eq!(report.turns, 1);
        assert_eq!(chat.context().get(USER_NAME_KEY), Some("花子"));
    }

    #[tokio::test]
    async fn voice_loop_honors_interrupt_flag() {
        let (agent, _) = scripted_agent("VoiceAssistant", Some("unused"));
        let (recognizer, attempts) = ScriptedRecognizer::new(&["こんにちは"]);
        let interrupted = Arc::new(AtomicBool::new(false));
        interrupted.store(true, Ordering::SeqCst);
        let mut chat = VoiceChatLoop::new(
            VoiceAgentSession::new(agent),
            Box::new(recognizer),
            Box::new(RecordingSynthesizer {
                log: SpokenLog::default(),
                fail: false,
            }),
            SafetyLimits::default(),
            vec!["exit".to_string()],
            interrupted,
        );

        let report = chat.run().await;
        assert_eq!(report.termination, TerminationReason::Interrupted);
        assert_eq!(report.termination.reason(), "interrupted by user");
        assert_eq!(*attempts.lock().expect("attempt counter should lock"), 0);
    }

    #[tokio::test]
    async fn voice_commands_change_voice_and_summarize_locally() {
        let (mut chat, log, _, _) = chat_loop(&[], Some("unused"), SafetyLimits::default(), false);

        let summary = chat.apply_command(VoiceCommand::Summary);
        assert!(summary.contains("まだ会話履歴がありません。"));

        let changed = chat.apply_command(VoiceCommand::VoiceChange);
        assert!(changed.contains("優しい"));
        assert_eq!(chat.voice_state().profile_key, "gentle");
        assert_eq!(chat.context().preference("preferred_voice"), Some("gentle"));

        assert!(chat.apply_command(VoiceCommand::SpeedDown).contains("0.75"));
        chat.apply_command(VoiceCommand::SpeedDown);
        assert!(chat.apply_command(VoiceCommand::SpeedDown).contains("これ以上"));

        chat.apply_command(VoiceCommand::ResetVoice);
        assert_eq!(*chat.voice_state(), VoiceState::default());
        let voices = log.voices.lock().expect("voice log should lock").clone();
        assert_eq!(voices, vec!["ja-JP-ShioriNeural", "ja-JP-NanamiNeural"]);
    }

    #[tokio::test]
    async fn voice_session_records_turns_and_replays_transcript() {
        let (agent, prompts) = scripted_agent("VoiceAssistant", Some("はい"));
        let session = VoiceAgentSession::new(agent);
        assert_eq!(session.name(), "VoiceAssistant");

        session.send_message("一つ目").await.expect("first message should succeed");
        session.invoke("二つ目").await.expect("second message should succeed");
        assert_eq!(session.turn_count(), 2);
        assert_eq!(session.history().len(), 4);

        let logged = prompts.lock().expect("prompt log should lock").clone();
        assert_eq!(logged[0].1, "一つ目");
        assert!(logged[1].1.contains("ユーザー: 一つ目"));
        assert!(logged[1].1.contains("アシスタント: はい"));
        assert!(logged[1].1.ends_with("【ユーザーの新しい発話】\n二つ目"));

        session.clear();
        assert_eq!(session.turn_count(), 0);
        assert_eq!(build_session_prompt(&[], "hi"), "hi");
    }
