use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig};
use crate::doctor::credential_display;

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!(
        "Endpoint: {}",
        cfg.azure.endpoint.as_deref().unwrap_or("<not configured>")
    );
    println!("API version: {}", cfg.azure.api_version);
    println!("Credential: {}", credential_display(cfg));
    println!("Deployment: {}", cfg.azure.deployment);
    println!("Deployment (mini): {}", cfg.azure.deployment_mini);
    println!("Max tokens: {}", cfg.azure.max_tokens);
    println!(
        "Temperature: {}",
        cfg.azure
            .temperature
            .map(|value| value.to_string())
            .unwrap_or_else(|| "<model-default>".to_string())
    );
    println!("Request timeout (secs): {}", cfg.azure.request_timeout_secs);
    println!("Speech region: {}", cfg.speech.region);
    println!("Speech language: {}", cfg.speech.language);
    println!("Speech voice: {}", cfg.speech.voice);
    println!(
        "Recognition timeout (secs): {}",
        cfg.speech.recognition_timeout_secs
    );
    println!("Voice agent: {}", cfg.voice_agent_name);
    println!("Max turns: {}", cfg.limits.max_turns);
    println!(
        "Max consecutive errors: {}",
        cfg.limits.max_consecutive_errors
    );
    println!(
        "Max session duration (secs): {}",
        cfg.limits.max_session_duration_secs
    );
    println!("Exit keywords: {}", cfg.exit_keywords.join(", "));
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    Ok(())
}
