#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Provider,
    Speech,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Speech => "SPEECH",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Set AZURE_OPENAI_ENDPOINT (and AZURE_SPEECH_KEY for voice) in the environment, \
                 a .env file, or .reasonvox/config.toml, then run reasonvox doctor."
            }
            ErrorCategory::Provider => {
                "Check the deployment names and credentials. Without AZURE_OPENAI_API_KEY run \
                 `az login` so the Azure CLI credential can issue a token."
            }
            ErrorCategory::Speech => {
                "Check AZURE_SPEECH_KEY/AZURE_SPEECH_REGION and the audio capture/playback \
                 commands, or retry with --text-only."
            }
            ErrorCategory::Input => "Run reasonvox --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
        || msg.contains("unknown voice profile")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("not configured")
        || msg.contains("profile")
        || msg.contains("azure_openai_endpoint")
        || msg.contains("azure_speech_region")
    {
        return ErrorCategory::Config;
    }

    if msg.contains("speech")
        || msg.contains("recogni")
        || msg.contains("synthes")
        || msg.contains("audio")
    {
        return ErrorCategory::Speech;
    }

    if msg.contains("azure openai")
        || msg.contains("deployment")
        || msg.contains("access token")
        || msg.contains("stage")
    {
        return ErrorCategory::Provider;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let message = format!("{err:#}");
    if show_sensitive_config {
        message
    } else {
        redact_sensitive_text(&message)
    }
}

const SECRET_MARKERS: &[&str] = &[
    "api-key:",
    "api-key=",
    "api_key=",
    "bearer ",
    "ocp-apim-subscription-key:",
    "ocp-apim-subscription-key=",
    "\"accesstoken\":",
];

/// Replaces the token following any known credential marker with `[REDACTED]`.
pub fn redact_sensitive_text(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some((start, marker_len)) = next_marker(&lower, cursor) {
        let value_start = start + marker_len;
        out.push_str(&text[cursor..value_start]);

        let remainder = &text[value_start..];
        let skipped = remainder.len() - remainder.trim_start().len();
        let token_start = value_start + skipped;
        let token = &text[token_start..];
        let end = token
            .find(|ch: char| {
                ch.is_whitespace() || matches!(ch, '\'' | ',' | ';' | '}' | ')' | ']')
            })
            .unwrap_or(token.len());

        out.push_str(&text[value_start..token_start]);
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        cursor = token_start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

fn next_marker(lower: &str, from: usize) -> Option<(usize, usize)> {
    SECRET_MARKERS
        .iter()
        .filter_map(|marker| {
            lower[from..]
                .find(marker)
                .map(|offset| (from + offset, marker.len()))
        })
        .min_by_key(|(start, _)| *start)
}
