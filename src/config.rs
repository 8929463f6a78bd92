use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_API_VERSION: &str = "2024-08-01-preview";
pub const DEFAULT_DEPLOYMENT: &str = "gpt-5";
pub const DEFAULT_DEPLOYMENT_MINI: &str = "gpt-5-mini";
pub const DEFAULT_SPEECH_REGION: &str = "japaneast";
pub const DEFAULT_SPEECH_LANGUAGE: &str = "ja-JP";
pub const DEFAULT_SPEECH_VOICE: &str = "ja-JP-NanamiNeural";
pub const DEFAULT_CAPTURE_COMMAND: &str = "arecord -q -f S16_LE -r 16000 -c 1 -t wav -d {secs}";
pub const DEFAULT_PLAYBACK_COMMAND: &str = "aplay -q";
pub const DEFAULT_EXIT_KEYWORDS: &[&str] = &["exit", "quit", "終了", "さようなら", "バイバイ"];

/// How requests to Azure OpenAI are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialMode {
    ApiKey(String),
    /// Bearer token from `az account get-access-token` (requires `az login`).
    AzureCli,
}

impl CredentialMode {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialMode::ApiKey(_) => "api-key",
            CredentialMode::AzureCli => "azure-cli",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AzureOpenAiSettings {
    pub endpoint: Option<String>,
    pub api_version: String,
    pub credential: CredentialMode,
    pub deployment: String,
    pub deployment_mini: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub key: Option<String>,
    pub region: String,
    pub language: String,
    pub voice: String,
    pub recognition_timeout_secs: u64,
    pub capture_command: String,
    pub playback_command: String,
}

/// Hard caps for one voice chat session. Zero disables the turn and duration caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_turns: u32,
    pub max_consecutive_errors: u32,
    pub max_session_duration_secs: u64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_consecutive_errors: 3,
            max_session_duration_secs: 1800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub azure: AzureOpenAiSettings,
    pub speech: SpeechSettings,
    pub limits: SafetyLimits,
    pub exit_keywords: Vec<String>,
    pub voice_agent_name: String,
    pub show_sensitive_config: bool,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub azure_endpoint: Option<String>,
    pub azure_api_version: Option<String>,
    pub deployment: Option<String>,
    pub deployment_mini: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub request_timeout_secs: Option<u64>,
    pub speech_region: Option<String>,
    pub speech_language: Option<String>,
    pub speech_voice: Option<String>,
    pub recognition_timeout_secs: Option<u64>,
    pub capture_command: Option<String>,
    pub playback_command: Option<String>,
    pub voice_agent_name: Option<String>,
    pub max_turns: Option<u32>,
    pub max_consecutive_errors: Option<u32>,
    pub max_session_duration_secs: Option<u64>,
    #[serde(default)]
    pub exit_keywords: Vec<String>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check field names and value types.",
            path.display()
        )
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_keywords(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::<String>::new();
    let mut merged = Vec::<String>::new();

    for keyword in first.iter().chain(second.iter()) {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            merged.push(normalized);
        }
    }

    merged
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let credential = match non_empty(cli.azure_api_key.clone()) {
        Some(key) => CredentialMode::ApiKey(key),
        None => CredentialMode::AzureCli,
    };

    let azure = AzureOpenAiSettings {
        endpoint: non_empty(cli.azure_endpoint.clone())
            .or(non_empty(profile.azure_endpoint.clone()))
            .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
        api_version: non_empty(cli.azure_api_version.clone())
            .or(profile.azure_api_version.clone())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        credential,
        deployment: non_empty(cli.deployment.clone())
            .or(profile.deployment.clone())
            .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
        deployment_mini: non_empty(cli.deployment_mini.clone())
            .or(profile.deployment_mini.clone())
            .unwrap_or_else(|| DEFAULT_DEPLOYMENT_MINI.to_string()),
        max_tokens: cli
            .max_tokens
            .or(profile.max_tokens)
            .unwrap_or(4096)
            .max(1),
        temperature: cli.temperature.or(profile.temperature),
        request_timeout_secs: cli
            .request_timeout_secs
            .or(profile.request_timeout_secs)
            .unwrap_or(60)
            .max(1),
    };

    let speech = SpeechSettings {
        key: non_empty(cli.speech_key.clone()),
        region: non_empty(cli.speech_region.clone())
            .or(profile.speech_region.clone())
            .unwrap_or_else(|| DEFAULT_SPEECH_REGION.to_string()),
        language: non_empty(cli.speech_language.clone())
            .or(profile.speech_language.clone())
            .unwrap_or_else(|| DEFAULT_SPEECH_LANGUAGE.to_string()),
        voice: non_empty(cli.speech_voice.clone())
            .or(profile.speech_voice.clone())
            .unwrap_or_else(|| DEFAULT_SPEECH_VOICE.to_string()),
        recognition_timeout_secs: cli
            .recognition_timeout_secs
            .or(profile.recognition_timeout_secs)
            .unwrap_or(10)
            .max(1),
        capture_command: non_empty(cli.capture_command.clone())
            .or(profile.capture_command.clone())
            .unwrap_or_else(|| DEFAULT_CAPTURE_COMMAND.to_string()),
        playback_command: non_empty(cli.playback_command.clone())
            .or(profile.playback_command.clone())
            .unwrap_or_else(|| DEFAULT_PLAYBACK_COMMAND.to_string()),
    };

    let defaults = SafetyLimits::default();
    let limits = SafetyLimits {
        max_turns: cli
            .max_turns
            .or(profile.max_turns)
            .unwrap_or(defaults.max_turns),
        max_consecutive_errors: cli
            .max_consecutive_errors
            .or(profile.max_consecutive_errors)
            .unwrap_or(defaults.max_consecutive_errors)
            .max(1),
        max_session_duration_secs: cli
            .max_session_duration_secs
            .or(profile.max_session_duration_secs)
            .unwrap_or(defaults.max_session_duration_secs),
    };

    let exit_keywords = {
        let merged = normalize_keywords(&profile.exit_keywords, &cli.exit_keywords);
        if merged.is_empty() {
            DEFAULT_EXIT_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect()
        } else {
            merged
        }
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        azure,
        speech,
        limits,
        exit_keywords,
        voice_agent_name: non_empty(cli.voice_agent_name.clone())
            .or(profile.voice_agent_name)
            .unwrap_or_else(|| "VoiceAssistant".to_string()),
        show_sensitive_config: cli.show_sensitive_config,
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".reasonvox/telemetry.jsonl".to_string()),
    })
}

/// Checks required for any Azure OpenAI call. Returns the resolved endpoint.
pub fn validate_pipeline_config(cfg: &RuntimeConfig) -> Result<String> {
    let endpoint = cfg.azure.endpoint.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "AZURE_OPENAI_ENDPOINT is not configured. Set it in the environment, .env or the profile."
        )
    })?;

    if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
        return Err(anyhow::anyhow!(
            "AZURE_OPENAI_ENDPOINT must be an http(s) URL, got '{}'",
            endpoint
        ));
    }

    if cfg.azure.credential == CredentialMode::AzureCli {
        tracing::warn!(
            "AZURE_OPENAI_API_KEY is not set; falling back to Azure CLI credential (run `az login` first)"
        );
    }

    Ok(endpoint)
}

/// Pipeline checks plus speech settings. Text-only sessions skip the speech checks.
pub fn validate_voice_config(cfg: &RuntimeConfig, text_only: bool) -> Result<()> {
    validate_pipeline_config(cfg)?;

    if !text_only {
        if cfg.speech.key.is_none() {
            return Err(anyhow::anyhow!(
                "AZURE_SPEECH_KEY is not configured. Set it or run the voice command with --text-only."
            ));
        }
        if cfg.speech.region.trim().is_empty() {
            return Err(anyhow::anyhow!("AZURE_SPEECH_REGION is empty"));
        }
    }

    for warning in safety_limit_warnings(&cfg.limits) {
        tracing::warn!("{warning}");
    }

    Ok(())
}

pub fn safety_limit_warnings(limits: &SafetyLimits) -> Vec<String> {
    let mut warnings = Vec::new();
    if limits.max_turns == 0 {
        warnings.push("MAX_CONVERSATION_TURNS is 0: the turn limit is disabled".to_string());
    }
    if limits.max_session_duration_secs == 0 {
        warnings.push("MAX_SESSION_DURATION is 0: the session time limit is disabled".to_string());
    }
    warnings
}

/// Masks a secret down to its first 8 characters.
pub fn mask_secret(value: &str, show_sensitive: bool) -> String {
    if show_sensitive {
        return value.to_string();
    }
    let prefix = value.chars().take(8).collect::<String>();
    format!("{prefix}...")
}
