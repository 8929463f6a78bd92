use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::profiles::VoiceProfile;
use crate::config::SpeechSettings;
use crate::theme::read_console_line;

const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(120);
/// Maximum characters sent in one synthesis request.
const MAX_SYNTHESIS_CHARS: usize = 5000;

#[async_trait]
pub trait SpeechRecognizer: Send {
    /// One utterance as text. Fails on silence, no match or transport errors.
    async fn recognize_once(&mut self) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send {
    /// Speaks `text` and returns a short status message.
    async fn speak(&mut self, text: &str) -> Result<String>;

    fn set_voice(&mut self, profile: &VoiceProfile);

    fn set_speaking_rate(&mut self, rate: f32);
}

pub fn stt_url(region: &str, language: &str) -> String {
    format!(
        "https://{region}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={language}&format=simple"
    )
}

pub fn tts_url(region: &str) -> String {
    format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecognitionResponse {
    pub recognition_status: String,
    #[serde(default)]
    pub display_text: Option<String>,
}

pub fn parse_recognition_response(response: &RecognitionResponse) -> Result<String> {
    match response.recognition_status.as_str() {
        "Success" => response
            .display_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("speech recognized but no text was returned")),
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Err(anyhow::anyhow!(
            "no speech could be recognized ({})",
            response.recognition_status
        )),
        other => Err(anyhow::anyhow!("speech recognition failed with status '{other}'")),
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

pub fn build_ssml(text: &str, language: &str, voice_id: &str, rate: f32, pitch: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{language}'>\
<voice name='{voice_id}'><prosody rate='{rate:.2}' pitch='{pitch}'>{}</prosody></voice></speak>",
        escape_xml(text)
    )
}

/// Splits a configured command line; `{secs}` is replaced first.
pub fn command_argv(template: &str, secs: u64) -> Result<Vec<String>> {
    let expanded = template.replace("{secs}", &secs.to_string());
    let argv = shlex::split(&expanded)
        .ok_or_else(|| anyhow::anyhow!("audio command '{template}' has unbalanced quotes"))?;
    if argv.is_empty() {
        return Err(anyhow::anyhow!("audio command is empty"));
    }
    Ok(argv)
}

fn speech_key(settings: &SpeechSettings) -> Result<String> {
    settings
        .key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("AZURE_SPEECH_KEY is not configured"))
}

/// Records one utterance with the capture command and sends it to the short-audio REST endpoint.
pub struct AzureSpeechRecognizer {
    http: reqwest::Client,
    key: String,
    url: String,
    capture_argv: Vec<String>,
    capture_timeout: Duration,
}

impl AzureSpeechRecognizer {
    pub fn new(http: reqwest::Client, settings: &SpeechSettings) -> Result<Self> {
        Ok(Self {
            http,
            key: speech_key(settings)?,
            url: stt_url(&settings.region, &settings.language),
            capture_argv: command_argv(&settings.capture_command, settings.recognition_timeout_secs)?,
            capture_timeout: Duration::from_secs(settings.recognition_timeout_secs + 5),
        })
    }

    async fn capture_audio(&self) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.capture_argv[0]);
        command
            .args(&self.capture_argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("failed to start audio capture '{}'", self.capture_argv[0]))?;
        let output = tokio::time::timeout(self.capture_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "audio capture timed out after {} seconds",
                    self.capture_timeout.as_secs()
                )
            })?
            .context("failed to wait for audio capture")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "audio capture exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout.is_empty() {
            return Err(anyhow::anyhow!("audio capture produced no data"));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SpeechRecognizer for AzureSpeechRecognizer {
    async fn recognize_once(&mut self) -> Result<String> {
        let audio = self.capture_audio().await?;
        tracing::debug!(bytes = audio.len(), "audio captured");

        let response = self
            .http
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "audio/wav; codecs=audio/pcm; samplerate=16000")
            .header("Accept", "application/json")
            .body(audio)
            .send()
            .await
            .context("failed to call the speech recognition endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "speech recognition endpoint returned status {}: {}",
                status,
                body.trim()
            ));
        }

        let parsed: RecognitionResponse = response
            .json()
            .await
            .context("invalid speech recognition response payload")?;
        parse_recognition_response(&parsed)
    }
}

/// Sends SSML to the synthesis REST endpoint and pipes the RIFF audio to the playback command.
pub struct AzureSpeechSynthesizer {
    http: reqwest::Client,
    key: String,
    url: String,
    language: String,
    voice_id: String,
    pitch: String,
    rate: f32,
    playback_argv: Vec<String>,
}

impl AzureSpeechSynthesizer {
    /// `voice_id` may differ from the profile's voice when the configured default voice applies.
    pub fn new(
        http: reqwest::Client,
        settings: &SpeechSettings,
        profile: &VoiceProfile,
        voice_id: String,
    ) -> Result<Self> {
        Ok(Self {
            http,
            key: speech_key(settings)?,
            url: tts_url(&settings.region),
            language: settings.language.clone(),
            voice_id,
            pitch: profile.pitch.to_string(),
            rate: profile.speaking_rate,
            playback_argv: command_argv(&settings.playback_command, 0)?,
        })
    }

    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        let mut child = Command::new(&self.playback_argv[0])
            .args(&self.playback_argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start audio playback '{}'", self.playback_argv[0]))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open audio playback stdin"))?;
        let write_task = tokio::spawn(async move {
            stdin.write_all(&audio).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(PLAYBACK_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("audio playback timed out"))?
            .context("failed to wait for audio playback")?;

        write_task
            .await
            .context("audio playback writer task failed")?
            .context("failed to stream audio to playback")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "audio playback exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeechSynthesizer {
    async fn speak(&mut self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow::anyhow!("cannot synthesize empty text"));
        }
        let text = text.chars().take(MAX_SYNTHESIS_CHARS).collect::<String>();
        let ssml = build_ssml(&text, &self.language, &self.voice_id, self.rate, &self.pitch);

        let response = self
            .http
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "reasonvox")
            .body(ssml)
            .send()
            .await
            .context("failed to call the speech synthesis endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "speech synthesis endpoint returned status {}: {}",
                status,
                body.trim()
            ));
        }

        let audio = response
            .bytes()
            .await
            .context("failed to read synthesized audio")?
            .to_vec();
        let bytes = audio.len();
        self.play(audio).await?;
        Ok(format!("synthesized {bytes} bytes with {}", self.voice_id))
    }

    fn set_voice(&mut self, profile: &VoiceProfile) {
        self.voice_id = profile.voice_id.to_string();
        self.pitch = profile.pitch.to_string();
        tracing::info!(voice = %self.voice_id, "voice changed");
    }

    fn set_speaking_rate(&mut self, rate: f32) {
        self.rate = rate;
        tracing::info!(rate, "speaking rate changed");
    }
}

/// Reads typed lines in place of speech. Ctrl+C or EOF raises the interrupt flag.
pub struct ConsoleRecognizer {
    interrupted: Arc<AtomicBool>,
}

impl ConsoleRecognizer {
    pub fn new(interrupted: Arc<AtomicBool>) -> Self {
        Self { interrupted }
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    async fn recognize_once(&mut self) -> Result<String> {
        let line = tokio::task::spawn_blocking(|| read_console_line("you> "))
            .await
            .context("console input task failed")??;

        match line {
            Some(line) if !line.trim().is_empty() => Ok(line.trim().to_string()),
            Some(_) => Err(anyhow::anyhow!("no speech could be recognized (empty input)")),
            None => {
                self.interrupted.store(true, Ordering::SeqCst);
                Err(anyhow::anyhow!("console input closed"))
            }
        }
    }
}

/// Text-only stand-in for audio output. The chat loop already prints every
/// reply, so speaking only reports what would have been used.
#[derive(Debug, Clone)]
pub struct ConsoleSynthesizer {
    voice_id: String,
    rate: f32,
}

impl ConsoleSynthesizer {
    pub fn new(profile: &VoiceProfile) -> Self {
        Self {
            voice_id: profile.voice_id.to_string(),
            rate: profile.speaking_rate,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&mut self, text: &str) -> Result<String> {
        Ok(format!(
            "text only ({} chars, {} @ {:.2}x)",
            text.trim().chars().count(),
            self.voice_id,
            self.rate
        ))
    }

    fn set_voice(&mut self, profile: &VoiceProfile) {
        self.voice_id = profile.voice_id.to_string();
    }

    fn set_speaking_rate(&mut self, rate: f32) {
        self.rate = rate;
    }
}
