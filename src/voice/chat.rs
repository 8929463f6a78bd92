use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::config::SafetyLimits;
use crate::telemetry::TelemetrySink;
use crate::theme::*;
use crate::voice::commands::{VoiceCommand, VoiceState, classify_command, is_exit_keyword};
use crate::voice::context::ContextManager;
use crate::voice::profiles::get_voice_profile;
use crate::voice::session::VoiceAgentSession;
use crate::voice::speech::{SpeechRecognizer, SpeechSynthesizer};
use crate::voice::summarizer::ConversationSummarizer;

pub const RECOGNITION_ATTEMPTS: usize = 3;
pub const WELCOME_MESSAGE: &str =
    "こんにちは。音声アシスタントです。何かお手伝いできることはありますか？";
pub const FAREWELL_MESSAGE: &str = "ご利用ありがとうございました。さようなら。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxTurns,
    TooManyErrors,
    DurationExceeded,
    ExitKeyword,
    Interrupted,
}

impl TerminationReason {
    pub fn reason(self) -> &'static str {
        match self {
            TerminationReason::MaxTurns => "max turns reached",
            TerminationReason::TooManyErrors => "too many consecutive errors",
            TerminationReason::DurationExceeded => "session duration exceeded",
            TerminationReason::ExitKeyword => "exit keyword received",
            TerminationReason::Interrupted => "interrupted by user",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyCounters {
    pub turn_count: u32,
    pub consecutive_errors: u32,
}

/// Checked at the top of every iteration. Zero `max_turns` or zero duration disables that cap.
pub fn check_safety_limits(
    limits: &SafetyLimits,
    counters: &SafetyCounters,
    elapsed: Duration,
) -> Option<TerminationReason> {
    if limits.max_turns > 0 && counters.turn_count >= limits.max_turns {
        return Some(TerminationReason::MaxTurns);
    }
    if counters.consecutive_errors >= limits.max_consecutive_errors {
        return Some(TerminationReason::TooManyErrors);
    }
    if limits.max_session_duration_secs > 0
        && elapsed > Duration::from_secs(limits.max_session_duration_secs)
    {
        return Some(TerminationReason::DurationExceeded);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub turns: u32,
    pub commands_handled: u32,
    pub llm_calls: u32,
    pub termination: TerminationReason,
    pub elapsed_secs: f64,
    pub messages: usize,
}

/// Sets `flag` on Ctrl+C. The loop notices it between iterations.
pub fn spawn_interrupt_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
            tracing::info!("interrupt received");
        }
    });
}

pub struct VoiceChatLoop {
    session: VoiceAgentSession,
    recognizer: Box<dyn SpeechRecognizer>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    limits: SafetyLimits,
    exit_keywords: Vec<String>,
    interrupted: Arc<AtomicBool>,
    context: ContextManager,
    summarizer: ConversationSummarizer,
    voice: VoiceState,
    telemetry: TelemetrySink,
    counters: SafetyCounters,
    commands_handled: u32,
    llm_calls: u32,
}

impl VoiceChatLoop {
    pub fn new(
        session: VoiceAgentSession,
        recognizer: Box<dyn SpeechRecognizer>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        limits: SafetyLimits,
        exit_keywords: Vec<String>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            recognizer,
            synthesizer,
            limits,
            exit_keywords,
            interrupted,
            context: ContextManager::default(),
            summarizer: ConversationSummarizer::default(),
            voice: VoiceState::default(),
            telemetry: TelemetrySink::disabled(),
            counters: SafetyCounters::default(),
            commands_handled: 0,
            llm_calls: 0,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_voice_state(mut self, voice: VoiceState) -> Self {
        self.voice = voice;
        self
    }

    pub fn session(&self) -> &VoiceAgentSession {
        &self.session
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn voice_state(&self) -> &VoiceState {
        &self.voice
    }

    pub async fn run(&mut self) -> SessionReport {
        println!("{BOLD_GREEN}assistant:{RESET} {WELCOME_MESSAGE}");
        self.speak(WELCOME_MESSAGE).await;

        let started = Instant::now();
        let termination = loop {
            if self.interrupted.load(Ordering::SeqCst) {
                break TerminationReason::Interrupted;
            }
            if let Some(reason) = check_safety_limits(&self.limits, &self.counters, started.elapsed())
            {
                tracing::warn!(reason = reason.reason(), "voice session stopped by safety limit");
                break reason;
            }

            self.print_turn_header();

            let Some(text) = self.listen().await else {
                continue;
            };
            println!("{DIM}recognized:{RESET} {text}");

            if is_exit_keyword(&text, &self.exit_keywords) {
                println!("{BOLD_GREEN}assistant:{RESET} {FAREWELL_MESSAGE}");
                self.speak(FAREWELL_MESSAGE).await;
                break TerminationReason::ExitKeyword;
            }

            if let Some(command) = classify_command(&text) {
                self.handle_command(command).await;
                continue;
            }

            self.respond(&text).await;
        };

        let report = SessionReport {
            turns: self.counters.turn_count,
            commands_handled: self.commands_handled,
            llm_calls: self.llm_calls,
            termination,
            elapsed_secs: started.elapsed().as_secs_f64(),
            messages: self.session.history().len(),
        };
        self.telemetry.emit(
            "voice.session.ended",
            json!({
                "reason": termination,
                "turns": report.turns,
                "commands": report.commands_handled,
                "elapsed_secs": report.elapsed_secs,
            }),
        );
        self.print_statistics(&report);
        report
    }

    fn print_turn_header(&self) {
        let next = self.counters.turn_count + 1;
        if self.limits.max_turns > 0 {
            println!("\n{DIM}--- turn {next}/{} ---{RESET}", self.limits.max_turns);
        } else {
            println!("\n{DIM}--- turn {next} ---{RESET}");
        }
    }

    /// Up to three recognition attempts. A miss on all of them counts as one error.
    async fn listen(&mut self) -> Option<String> {
        for attempt in 1..=RECOGNITION_ATTEMPTS {
            if self.interrupted.load(Ordering::SeqCst) {
                return None;
            }
            match self.recognizer.recognize_once().await {
                Ok(text) => {
                    self.counters.consecutive_errors = 0;
                    return Some(text);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %format!("{err:#}"), "speech recognition failed");
                    if attempt < RECOGNITION_ATTEMPTS && !self.interrupted.load(Ordering::SeqCst) {
                        println!("{YELLOW}could not recognize speech, please try again{RESET}");
                    }
                }
            }
        }

        if !self.interrupted.load(Ordering::SeqCst) {
            self.counters.consecutive_errors += 1;
            println!("{YELLOW}speech recognition failed, moving to the next turn{RESET}");
        }
        None
    }

    async fn respond(&mut self, text: &str) {
        self.llm_calls += 1;
        let reply = match self.session.send_message(text).await {
            Ok(reply) => reply,
            Err(err) => {
                self.counters.consecutive_errors += 1;
                tracing::error!(
                    consecutive_errors = self.counters.consecutive_errors,
                    error = %format!("{err:#}"),
                    "voice assistant call failed"
                );
                println!("{BOLD_RED}error:{RESET} failed to get a response");
                return;
            }
        };

        self.counters.turn_count += 1;
        println!("{BOLD_GREEN}assistant:{RESET} {}", reply.trim());
        let spoken = self.speak(&reply).await;

        self.context.extract_from_history(&self.session.history());
        self.telemetry.emit(
            "voice.turn.completed",
            json!({
                "turn": self.counters.turn_count,
                "input_chars": text.chars().count(),
                "output_chars": reply.chars().count(),
                "synthesized": spoken,
            }),
        );
    }

    async fn handle_command(&mut self, command: VoiceCommand) {
        let message = self.apply_command(command);
        tracing::info!(command = command.label(), "voice command handled");
        self.commands_handled += 1;
        println!("{BOLD_GREEN}assistant:{RESET} {message}");
        self.speak(&message).await;
        self.telemetry.emit(
            "voice.command.handled",
            json!({ "command": command.label() }),
        );
    }

    /// Applies the command locally and returns the text to speak.
    pub fn apply_command(&mut self, command: VoiceCommand) -> String {
        match command {
            VoiceCommand::Summary => {
                let summary = self.summarizer.summarize(&self.session.history(), true);
                format!("これまでの会話を要約します。{summary}")
            }
            VoiceCommand::VoiceChange => {
                let key = self.voice.cycle_profile();
                self.apply_voice(key);
                self.context.set_preference("preferred_voice", key);
                let name = get_voice_profile(key)
                    .map(|profile| profile.display_name.to_string())
                    .unwrap_or_else(|| key.to_string());
                format!("声を「{name}」に変更しました。")
            }
            VoiceCommand::SpeedUp | VoiceCommand::SpeedDown => {
                let faster = command == VoiceCommand::SpeedUp;
                if !self.voice.step_rate(faster) {
                    return if faster {
                        "これ以上速くできません。".to_string()
                    } else {
                        "これ以上ゆっくりにできません。".to_string()
                    };
                }
                self.synthesizer.set_speaking_rate(self.voice.rate);
                self.context
                    .set_preference("speaking_rate", &format!("{:.2}", self.voice.rate));
                format!("話す速さを{:.2}倍にしました。", self.voice.rate)
            }
            VoiceCommand::ResetVoice => {
                self.voice.reset();
                let key = self.voice.profile_key;
                self.apply_voice(key);
                self.synthesizer.set_speaking_rate(self.voice.rate);
                "音声設定を初期状態に戻しました。".to_string()
            }
        }
    }

    fn apply_voice(&mut self, key: &str) {
        match get_voice_profile(key) {
            Some(profile) => self.synthesizer.set_voice(&profile),
            None => tracing::warn!(profile = key, "voice profile not found"),
        }
    }

    /// Synthesis failures degrade to text only.
    async fn speak(&mut self, text: &str) -> bool {
        match self.synthesizer.speak(text).await {
            Ok(status) => {
                tracing::debug!(%status, "speech synthesized");
                true
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "speech synthesis failed, continuing with text only");
                false
            }
        }
    }

    fn print_statistics(&self, report: &SessionReport) {
        let elapsed = report.elapsed_secs as u64;
        let stats = self.summarizer.stats(&self.session.history());
        let mut lines = vec![
            format!("Turns: {}", report.turns),
            format!("Session time: {}m {}s", elapsed / 60, elapsed % 60),
            format!("Transcript: {} messages", report.messages),
            format!("Voice commands: {}", report.commands_handled),
            format!("Ended: {}", report.termination.reason()),
        ];
        lines.push(String::new());
        lines.extend(self.summarizer.format_stats(&stats).lines().map(str::to_string));
        if !self.context.is_empty() {
            lines.push(String::new());
            lines.extend(self.context.format_summary().lines().map(str::to_string));
        }
        println!();
        draw_box("Session statistics", &lines);
    }
}
