use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use reasonvox::agents::{AgentFactory, AgentRole, AzureAgentFactory};
use reasonvox::cli::{
    Cli, Commands, ProfileCommands, TelemetryCommands, VoiceProfileCommands, command_label,
};
use reasonvox::config::{
    RuntimeConfig, load_profiles, resolve_runtime_config, safety_limit_warnings,
    validate_voice_config,
};
use reasonvox::doctor::{print_environment_check, run_doctor};
use reasonvox::error::{categorize_error, format_cli_error};
use reasonvox::profiles::{run_profiles_list, run_profiles_show};
use reasonvox::provider::build_http_client;
use reasonvox::report::{print_result, save_result};
use reasonvox::telemetry::{TelemetrySink, run_telemetry_report};
use reasonvox::theme::*;
use reasonvox::voice::chat::{VoiceChatLoop, spawn_interrupt_listener};
use reasonvox::voice::commands::VoiceState;
use reasonvox::voice::profiles::{
    DEFAULT_PROFILE_KEY, list_available_profiles, require_voice_profile,
    run_voice_profile_show, run_voice_profiles_list,
};
use reasonvox::voice::session::VoiceAgentSession;
use reasonvox::voice::speech::{
    AzureSpeechRecognizer, AzureSpeechSynthesizer, ConsoleRecognizer, ConsoleSynthesizer,
    SpeechRecognizer, SpeechSynthesizer,
};
use reasonvox::workflow::WorkflowOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let show_sensitive = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive));
        tracing::error!(category = %categorize_error(&err).code(), "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let telemetry = TelemetrySink::new(&cfg, command_label(&cli.command));
    telemetry.emit("command.started", json!({}));
    let started = Instant::now();

    let result = match cli.command {
        Commands::Reason {
            query,
            verbose,
            save_output,
            output_dir,
            no_banner,
        } => {
            run_reason(
                &cfg,
                &telemetry,
                query.join(" "),
                verbose,
                save_output.then_some(output_dir.as_str()),
                no_banner,
            )
            .await
        }
        Commands::Voice {
            text_only,
            yes,
            voice_profile,
        } => run_voice(&cfg, &telemetry, text_only, yes, &voice_profile).await,
        Commands::Voices { command } => match command {
            VoiceProfileCommands::List => run_voice_profiles_list(),
            VoiceProfileCommands::Show { key } => run_voice_profile_show(&key),
        },
        Commands::Doctor => run_doctor(&cfg),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg),
            ProfileCommands::Show => run_profiles_show(&cfg),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(&cfg, path, limit),
        },
    };

    let elapsed_ms = started.elapsed().as_millis();
    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({ "elapsed_ms": elapsed_ms })),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "elapsed_ms": elapsed_ms,
                "category": categorize_error(err).code(),
            }),
        ),
    }
    result
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

async fn run_reason(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    query: String,
    verbose: bool,
    output_dir: Option<&str>,
    no_banner: bool,
) -> Result<()> {
    let factory = Arc::new(AzureAgentFactory::from_config(cfg)?);
    if !no_banner {
        print_pipeline_banner(&cfg.azure.deployment, &cfg.azure.deployment_mini);
    }

    let query = if query.trim().is_empty() {
        read_console_line("question> ")?.unwrap_or_default()
    } else {
        query
    };
    let query = query.trim();
    if query.is_empty() {
        println!("{YELLOW}No question given; nothing to do.{RESET}");
        return Ok(());
    }

    println!("{BOLD}Question:{RESET} {query}");
    println!("{DIM}Running Coordinator → Researcher → Analyzer → Summarizer ...{RESET}");

    let mut orchestrator = WorkflowOrchestrator::new(factory, telemetry.clone());
    let result = orchestrator.run(query).await?;
    print_result(&result, verbose);

    if let Some(dir) = output_dir {
        let path = save_result(&result, Path::new(dir))?;
        println!("{GREEN}Saved:{RESET} {}", path.display());
    }
    Ok(())
}

async fn run_voice(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    text_only: bool,
    skip_confirm: bool,
    profile_key: &str,
) -> Result<()> {
    let profile = require_voice_profile(profile_key)?;
    let voice_id = if profile_key == DEFAULT_PROFILE_KEY {
        cfg.speech.voice.clone()
    } else {
        profile.voice_id.to_string()
    };

    print_voice_banner(&cfg.voice_agent_name, &voice_id);
    print_environment_check(cfg, !text_only);
    validate_voice_config(cfg, text_only)?;

    print_usage_guide(cfg, text_only);
    if !skip_confirm && !confirm("Start the voice chat?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_interrupt_listener(interrupted.clone());

    let factory = AzureAgentFactory::from_config(cfg)?;
    let agent = factory
        .create(AgentRole::VoiceAssistant)
        .await
        .context("failed to create the voice assistant agent")?;
    let session = VoiceAgentSession::new(agent);

    let (recognizer, synthesizer): (Box<dyn SpeechRecognizer>, Box<dyn SpeechSynthesizer>) =
        if text_only {
            (
                Box::new(ConsoleRecognizer::new(interrupted.clone())),
                Box::new(ConsoleSynthesizer::new(&profile)),
            )
        } else {
            let http = build_http_client(cfg.azure.request_timeout_secs)?;
            (
                Box::new(AzureSpeechRecognizer::new(http.clone(), &cfg.speech)?),
                Box::new(AzureSpeechSynthesizer::new(
                    http,
                    &cfg.speech,
                    &profile,
                    voice_id,
                )?),
            )
        };

    let state_key = list_available_profiles()
        .into_iter()
        .find(|key| *key == profile_key)
        .unwrap_or(DEFAULT_PROFILE_KEY);
    let mut chat = VoiceChatLoop::new(
        session,
        recognizer,
        synthesizer,
        cfg.limits,
        cfg.exit_keywords.clone(),
        interrupted,
    )
    .with_telemetry(telemetry.clone())
    .with_voice_state(VoiceState::new(state_key, profile.speaking_rate));

    let report = chat.run().await;
    tracing::info!(
        turns = report.turns,
        reason = report.termination.reason(),
        "voice session finished"
    );
    println!("{DIM}Voice chat ended.{RESET}");
    Ok(())
}

fn print_usage_guide(cfg: &RuntimeConfig, text_only: bool) {
    let limit = |value: u64| {
        if value == 0 {
            "unlimited".to_string()
        } else {
            value.to_string()
        }
    };
    let mut lines = vec![
        if text_only {
            "Type a message and press Enter; replies are printed.".to_string()
        } else {
            "Speak after the prompt; replies are read aloud.".to_string()
        },
        format!("Exit words: {}", cfg.exit_keywords.join(", ")),
        "Voice commands: 会話を要約して / 声を変えて / 速く話して / ゆっくり話して / 声をリセットして".to_string(),
        "Ctrl+C stops the session between turns.".to_string(),
        String::new(),
        format!("Max turns: {}", limit(u64::from(cfg.limits.max_turns))),
        format!(
            "Max consecutive errors: {}",
            cfg.limits.max_consecutive_errors
        ),
        format!(
            "Max session duration (secs): {}",
            limit(cfg.limits.max_session_duration_secs)
        ),
    ];
    for warning in safety_limit_warnings(&cfg.limits) {
        lines.push(format!("{BOLD_YELLOW}warning:{RESET} {warning}"));
    }
    println!();
    draw_box("Voice chat", &lines);
}
