use crate::voice::profiles::{DEFAULT_PROFILE_KEY, next_named_profile};

/// In-band voice commands handled without calling the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    Summary,
    VoiceChange,
    SpeedUp,
    SpeedDown,
    ResetVoice,
}

impl VoiceCommand {
    pub fn label(self) -> &'static str {
        match self {
            VoiceCommand::Summary => "summary",
            VoiceCommand::VoiceChange => "voice_change",
            VoiceCommand::SpeedUp => "speed_up",
            VoiceCommand::SpeedDown => "speed_down",
            VoiceCommand::ResetVoice => "reset_voice",
        }
    }
}

/// Ordered rule list, first match wins. Every pattern names the voice or the
/// conversation so ordinary questions ("パスワードをリセット", "速く走る") reach
/// the model. Reset precedes voice change so "音声をリセットして" is not read as
/// a change request.
const COMMAND_RULES: &[(&[&str], VoiceCommand)] = &[
    (
        &["声をリセット", "声を元に戻", "reset voice", "reset your voice"],
        VoiceCommand::ResetVoice,
    ),
    (
        &["速く話", "早く話", "速くしゃべ", "早くしゃべ", "speak faster", "talk faster"],
        VoiceCommand::SpeedUp,
    ),
    (
        &["ゆっくり話", "遅く話", "ゆっくりしゃべ", "speak slower", "talk slower", "speak more slowly"],
        VoiceCommand::SpeedDown,
    ),
    (
        &["声を変", "音声を変", "声を切り替", "音声を切り替", "change voice", "switch voice"],
        VoiceCommand::VoiceChange,
    ),
    (
        &["会話を要約", "会話の要約", "会話をまとめ", "会話のまとめ", "summarize our conversation", "conversation summary"],
        VoiceCommand::Summary,
    ),
];

/// Case-insensitive substring match against the rule list.
pub fn classify_command(text: &str) -> Option<VoiceCommand> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    COMMAND_RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|pattern| lower.contains(pattern)))
        .map(|(_, command)| *command)
}

/// Exact match after trimming and lowercasing. `keywords` are expected normalized.
pub fn is_exit_keyword(text: &str, keywords: &[String]) -> bool {
    let normalized = text.trim().to_lowercase();
    !normalized.is_empty() && keywords.iter().any(|keyword| *keyword == normalized)
}

pub const MIN_SPEAKING_RATE: f32 = 0.5;
pub const MAX_SPEAKING_RATE: f32 = 1.5;
pub const SPEAKING_RATE_STEP: f32 = 0.25;
pub const DEFAULT_SPEAKING_RATE: f32 = 1.0;

/// Steps the rate by ±0.25, saturating at [0.5, 1.5]. Rounding to two
/// decimals only strips float drift; a profile starting at 0.9 steps to 1.15.
pub fn step_speaking_rate(current: f32, faster: bool) -> f32 {
    let delta = if faster {
        SPEAKING_RATE_STEP
    } else {
        -SPEAKING_RATE_STEP
    };
    let next = (current + delta).clamp(MIN_SPEAKING_RATE, MAX_SPEAKING_RATE);
    (next * 100.0).round() / 100.0
}

/// Voice settings mutated by in-band commands.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceState {
    pub profile_key: &'static str,
    pub rate: f32,
}

impl VoiceState {
    pub fn new(profile_key: &'static str, rate: f32) -> Self {
        Self { profile_key, rate }
    }

    /// Advances to the next named profile and returns its key.
    pub fn cycle_profile(&mut self) -> &'static str {
        self.profile_key = next_named_profile(self.profile_key);
        self.profile_key
    }

    /// Returns false when the rate is already saturated in that direction.
    pub fn step_rate(&mut self, faster: bool) -> bool {
        let next = step_speaking_rate(self.rate, faster);
        let changed = (next - self.rate).abs() > f32::EPSILON;
        self.rate = next;
        changed
    }

    pub fn reset(&mut self) {
        self.profile_key = DEFAULT_PROFILE_KEY;
        self.rate = DEFAULT_SPEAKING_RATE;
    }
}

impl Default for VoiceState {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_KEY, DEFAULT_SPEAKING_RATE)
    }
}
