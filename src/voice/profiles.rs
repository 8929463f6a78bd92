use std::borrow::Cow;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn label(self) -> &'static str {
        match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
        }
    }
}

/// Read-only synthesis settings looked up by key.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub display_name: Cow<'static, str>,
    pub voice_id: &'static str,
    pub language: &'static str,
    pub gender: Gender,
    pub description: Cow<'static, str>,
    pub speaking_rate: f32,
    pub pitch: Cow<'static, str>,
}

const fn profile(
    display_name: &'static str,
    voice_id: &'static str,
    gender: Gender,
    description: &'static str,
    speaking_rate: f32,
    pitch: &'static str,
) -> VoiceProfile {
    VoiceProfile {
        display_name: Cow::Borrowed(display_name),
        voice_id,
        language: "ja-JP",
        gender,
        description: Cow::Borrowed(description),
        speaking_rate,
        pitch: Cow::Borrowed(pitch),
    }
}

/// Named profiles, in `voice_change` cycling order.
pub static NAMED_PROFILES: [(&str, VoiceProfile); 5] = [
    (
        "default",
        profile("デフォルト", "ja-JP-NanamiNeural", Gender::Female, "標準的な設定。明るく親しみやすい女性の声。", 1.0, "+0%"),
    ),
    (
        "gentle",
        profile("優しい", "ja-JP-ShioriNeural", Gender::Female, "落ち着いて優しい話し方。", 0.9, "-5%"),
    ),
    (
        "energetic",
        profile("元気", "ja-JP-MayuNeural", Gender::Female, "明るく元気な話し方。", 1.1, "+5%"),
    ),
    (
        "calm_male",
        profile("落ち着いた男性", "ja-JP-DaichiNeural", Gender::Male, "落ち着いて信頼感のある男性の声。", 0.95, "-10%"),
    ),
    (
        "friendly_male",
        profile("親しみやすい男性", "ja-JP-KeitaNeural", Gender::Male, "明るく親しみやすい男性の声。", 1.0, "+0%"),
    ),
];

pub static NEURAL_VOICES: [(&str, VoiceProfile); 6] = [
    (
        "nanami",
        profile("Nanami（ななみ）", "ja-JP-NanamiNeural", Gender::Female, "明るく親しみやすい女性の声。標準的な日本語。", 1.0, "+0%"),
    ),
    (
        "mayu",
        profile("Mayu（まゆ）", "ja-JP-MayuNeural", Gender::Female, "若々しく元気な女性の声。", 1.0, "+0%"),
    ),
    (
        "shiori",
        profile("Shiori（しおり）", "ja-JP-ShioriNeural", Gender::Female, "落ち着いた大人の女性の声。", 1.0, "+0%"),
    ),
    (
        "keita",
        profile("Keita（けいた）", "ja-JP-KeitaNeural", Gender::Male, "明るく親しみやすい男性の声。標準的な日本語。", 1.0, "+0%"),
    ),
    (
        "daichi",
        profile("Daichi（だいち）", "ja-JP-DaichiNeural", Gender::Male, "落ち着いた大人の男性の声。", 1.0, "+0%"),
    ),
    (
        "naoki",
        profile("Naoki（なおき）", "ja-JP-NaokiNeural", Gender::Male, "若々しく元気な男性の声。", 1.0, "+0%"),
    ),
];

pub const SPEAKING_RATES: [(&str, f32); 5] = [
    ("very_slow", 0.5),
    ("slow", 0.75),
    ("normal", 1.0),
    ("fast", 1.25),
    ("very_fast", 1.5),
];

pub const PITCH_PRESETS: [(&str, &str); 5] = [
    ("very_low", "-30%"),
    ("low", "-15%"),
    ("normal", "+0%"),
    ("high", "+15%"),
    ("very_high", "+30%"),
];

pub const DEFAULT_PROFILE_KEY: &str = "default";

/// Named profiles win over raw voices with the same key.
pub fn get_voice_profile(key: &str) -> Option<VoiceProfile> {
    NAMED_PROFILES
        .iter()
        .chain(NEURAL_VOICES.iter())
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, profile)| profile.clone())
}

pub fn list_available_profiles() -> Vec<&'static str> {
    NAMED_PROFILES
        .iter()
        .chain(NEURAL_VOICES.iter())
        .map(|(key, _)| *key)
        .collect()
}

pub fn profile_description(key: &str) -> String {
    match get_voice_profile(key) {
        Some(profile) => format!("{}: {}", profile.display_name, profile.description),
        None => format!("voice profile '{key}' does not exist"),
    }
}

pub fn require_voice_profile(key: &str) -> Result<VoiceProfile> {
    get_voice_profile(key).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown voice profile '{}'. Available: {}",
            key,
            list_available_profiles().join(", ")
        )
    })
}

/// Profile on top of a raw voice; unknown base voices fall back to `nanami`.
pub fn create_custom_profile(
    name: &str,
    base_voice: &str,
    speaking_rate: f32,
    pitch: &str,
    description: &str,
) -> VoiceProfile {
    let base = NEURAL_VOICES
        .iter()
        .find(|(key, _)| *key == base_voice)
        .unwrap_or(&NEURAL_VOICES[0])
        .1
        .clone();

    VoiceProfile {
        display_name: Cow::Owned(name.to_string()),
        description: Cow::Owned(description.to_string()),
        speaking_rate,
        pitch: Cow::Owned(pitch.to_string()),
        ..base
    }
}

/// Next named profile after `current`; unknown keys restart the cycle.
pub fn next_named_profile(current: &str) -> &'static str {
    let position = NAMED_PROFILES.iter().position(|(key, _)| *key == current);
    let next = match position {
        Some(index) => (index + 1) % NAMED_PROFILES.len(),
        None => 0,
    };
    NAMED_PROFILES[next].0
}

pub fn run_voice_profiles_list() -> Result<()> {
    println!("Named profiles:");
    for (key, profile) in &NAMED_PROFILES {
        println!(
            "- {key}: {} ({}, rate {:.2}x, pitch {})",
            profile.display_name, profile.voice_id, profile.speaking_rate, profile.pitch
        );
    }
    println!("Neural voices:");
    for (key, profile) in &NEURAL_VOICES {
        println!(
            "- {key}: {} ({}, {})",
            profile.display_name,
            profile.voice_id,
            profile.gender.label()
        );
    }
    println!(
        "Speaking rates: {}",
        SPEAKING_RATES
            .iter()
            .map(|(key, rate)| format!("{key}={rate}x"))
            .collect::<Vec<String>>()
            .join(", ")
    );
    println!(
        "Pitch presets: {}",
        PITCH_PRESETS
            .iter()
            .map(|(key, pitch)| format!("{key}={pitch}"))
            .collect::<Vec<String>>()
            .join(", ")
    );
    Ok(())
}

pub fn run_voice_profile_show(key: &str) -> Result<()> {
    let profile = require_voice_profile(key)?;
    println!("Key: {key}");
    println!("Name: {}", profile.display_name);
    println!("Voice: {}", profile.voice_id);
    println!("Language: {}", profile.language);
    println!("Gender: {}", profile.gender.label());
    println!("Description: {}", profile.description);
    println!("Speaking rate: {:.2}x", profile.speaking_rate);
    println!("Pitch: {}", profile.pitch);
    Ok(())
}
