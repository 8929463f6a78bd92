use clap::{Parser, Subcommand};

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum VoiceProfileCommands {
    #[command(about = "List named voice profiles and raw neural voices")]
    List,
    #[command(about = "Show a single voice profile by key")]
    Show {
        #[arg(required = true)]
        key: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  reasonvox reason \"Rustの所有権モデルの利点を説明して\"\n\
  reasonvox reason --verbose --save-output --output-dir reports \"Compare HTTP/2 and HTTP/3\"\n\
  reasonvox voice\n\
  reasonvox voice --text-only --yes --voice-profile gentle\n\
  reasonvox voices list\n\
  reasonvox voices show calm_male\n\
  reasonvox doctor\n\
  reasonvox --profile staging profiles show\n\
  reasonvox telemetry report --limit 2000\n\
\n\
Configuration:\n\
  - Settings resolve as CLI flag / environment variable, then the selected profile in\n\
    .reasonvox/config.toml, then built-in defaults. A .env file is loaded first.\n\
  - Without AZURE_OPENAI_API_KEY the Azure CLI credential (az login) is used.\n\
  - In voice chat, say an exit keyword (exit, quit, 終了, さようなら, バイバイ) to stop.";

#[derive(Debug, Parser)]
#[command(name = "reasonvox")]
#[command(about = "Multi-stage reasoning pipeline and voice chat over Azure OpenAI")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "REASONVOX_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "REASONVOX_CONFIG", default_value = ".reasonvox/config.toml")]
    pub config_path: String,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub azure_api_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION")]
    pub azure_api_version: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT_NAME")]
    pub deployment: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT_NAME_MINI")]
    pub deployment_mini: Option<String>,

    #[arg(long, env = "REASONVOX_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    #[arg(long, env = "REASONVOX_TEMPERATURE")]
    pub temperature: Option<f32>,

    #[arg(long, env = "REASONVOX_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "AZURE_SPEECH_KEY", hide_env_values = true)]
    pub speech_key: Option<String>,

    #[arg(long, env = "AZURE_SPEECH_REGION")]
    pub speech_region: Option<String>,

    #[arg(long, env = "SPEECH_LANGUAGE")]
    pub speech_language: Option<String>,

    #[arg(long, env = "SPEECH_VOICE_NAME")]
    pub speech_voice: Option<String>,

    #[arg(long, env = "SPEECH_RECOGNITION_TIMEOUT")]
    pub recognition_timeout_secs: Option<u64>,

    #[arg(long, env = "REASONVOX_CAPTURE_COMMAND")]
    pub capture_command: Option<String>,

    #[arg(long, env = "REASONVOX_PLAYBACK_COMMAND")]
    pub playback_command: Option<String>,

    #[arg(long, env = "VOICE_AGENT_NAME")]
    pub voice_agent_name: Option<String>,

    #[arg(long, env = "MAX_CONVERSATION_TURNS")]
    pub max_turns: Option<u32>,

    #[arg(long, env = "MAX_CONSECUTIVE_ERRORS")]
    pub max_consecutive_errors: Option<u32>,

    #[arg(long, env = "MAX_SESSION_DURATION")]
    pub max_session_duration_secs: Option<u64>,

    #[arg(long, env = "EXIT_KEYWORDS", value_delimiter = ',')]
    pub exit_keywords: Vec<String>,

    #[arg(long, env = "REASONVOX_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "REASONVOX_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "REASONVOX_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run the Coordinator → Researcher → Analyzer → Summarizer pipeline")]
    Reason {
        /// Question to answer; prompts interactively when omitted
        query: Vec<String>,
        /// Print each stage's raw output
        #[arg(long, short, default_value_t = false)]
        verbose: bool,
        /// Write a timestamped Markdown report
        #[arg(long, default_value_t = false)]
        save_output: bool,
        #[arg(long, default_value = "output")]
        output_dir: String,
        #[arg(long, default_value_t = false)]
        no_banner: bool,
    },
    #[command(about = "Start a voice chat session with safety limits")]
    Voice {
        /// Type instead of speaking; replies are printed instead of synthesized
        #[arg(long, default_value_t = false)]
        text_only: bool,
        /// Skip the start confirmation prompt
        #[arg(long, short, default_value_t = false)]
        yes: bool,
        #[arg(long, default_value = "default")]
        voice_profile: String,
    },
    #[command(about = "Inspect built-in voice profiles")]
    Voices {
        #[command(subcommand)]
        command: VoiceProfileCommands,
    },
    #[command(about = "Validate Azure OpenAI, speech and safety configuration")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Reason { .. } => "reason".to_string(),
        Commands::Voice { text_only, .. } => {
            if *text_only {
                "voice.text".to_string()
            } else {
                "voice".to_string()
            }
        }
        Commands::Voices { command } => match command {
            VoiceProfileCommands::List => "voices.list".to_string(),
            VoiceProfileCommands::Show { .. } => "voices.show".to_string(),
        },
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}
