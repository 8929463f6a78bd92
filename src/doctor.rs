use anyhow::Result;

use crate::config::{CredentialMode, RuntimeConfig, mask_secret, safety_limit_warnings};

/// One required setting and its display value (`None` when missing).
pub struct SettingCheck {
    pub name: &'static str,
    pub value: Option<String>,
}

pub fn required_settings(cfg: &RuntimeConfig, include_speech: bool) -> Vec<SettingCheck> {
    let mut checks = vec![SettingCheck {
        name: "AZURE_OPENAI_ENDPOINT",
        value: cfg.azure.endpoint.clone(),
    }];
    if include_speech {
        checks.push(SettingCheck {
            name: "AZURE_SPEECH_KEY",
            value: cfg
                .speech
                .key
                .as_deref()
                .map(|key| mask_secret(key, cfg.show_sensitive_config)),
        });
        checks.push(SettingCheck {
            name: "AZURE_SPEECH_REGION",
            value: Some(cfg.speech.region.clone()).filter(|region| !region.trim().is_empty()),
        });
    }
    checks
}

/// Prints required settings; returns false when any is missing.
pub fn print_environment_check(cfg: &RuntimeConfig, include_speech: bool) -> bool {
    println!("Required settings:");
    let mut ok = true;
    for check in required_settings(cfg, include_speech) {
        match check.value {
            Some(value) => println!("- {}: {}", check.name, value),
            None => {
                ok = false;
                println!("- {}: missing", check.name);
            }
        }
    }
    ok
}

pub fn credential_display(cfg: &RuntimeConfig) -> String {
    match &cfg.azure.credential {
        CredentialMode::ApiKey(key) => {
            format!("api-key ({})", mask_secret(key, cfg.show_sensitive_config))
        }
        CredentialMode::AzureCli => "azure-cli (az account get-access-token)".to_string(),
    }
}

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    let complete = print_environment_check(cfg, true);

    println!("Azure OpenAI:");
    println!("- credential: {}", credential_display(cfg));
    println!("- api version: {}", cfg.azure.api_version);
    println!(
        "- deployments: primary={} mini={}",
        cfg.azure.deployment, cfg.azure.deployment_mini
    );
    println!(
        "- max tokens={} temperature={} timeout_secs={}",
        cfg.azure.max_tokens,
        cfg.azure
            .temperature
            .map(|value| value.to_string())
            .unwrap_or_else(|| "<model-default>".to_string()),
        cfg.azure.request_timeout_secs
    );

    println!("Speech:");
    println!(
        "- language={} voice={} recognition_timeout_secs={}",
        cfg.speech.language, cfg.speech.voice, cfg.speech.recognition_timeout_secs
    );
    println!("- capture: {}", cfg.speech.capture_command);
    println!("- playback: {}", cfg.speech.playback_command);

    println!(
        "Safety limits: max_turns={} max_consecutive_errors={} max_session_duration_secs={}",
        cfg.limits.max_turns,
        cfg.limits.max_consecutive_errors,
        cfg.limits.max_session_duration_secs
    );
    for warning in safety_limit_warnings(&cfg.limits) {
        println!("Warning: {warning}");
    }
    println!("Exit keywords: {}", cfg.exit_keywords.join(", "));
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    if !complete {
        println!("Tip: set the missing values in the environment or in .env");
    }
    Ok(())
}
