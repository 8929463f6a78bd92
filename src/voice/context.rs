use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::voice::session::{ConversationTurn, Role};

pub const DEFAULT_MAX_CONTEXT_ITEMS: usize = 20;
const TOPIC_WINDOW: usize = 10;
const MAX_NAME_CHARS: usize = 10;

pub const LAST_TOPIC_KEY: &str = "last_topic";
pub const USER_NAME_KEY: &str = "user_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low = 1,
    Normal = 2,
    High = 3,
}

impl Importance {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Importance::High => "high",
            Importance::Normal => "normal",
            Importance::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    pub key: String,
    pub value: String,
    pub importance: Importance,
    pub timestamp: DateTime<Local>,
    /// Insertion order; breaks ties between items added in the same clock tick.
    #[serde(skip)]
    seq: u64,
}

/// Topic label → trigger words. Order matters: first table hit wins per utterance.
const TOPIC_RULES: &[(&str, &[&str])] = &[
    ("天気", &["天気", "気温", "雨", "晴れ"]),
    ("プログラミング", &["python", "コード", "プログラム", "関数", "変数"]),
    ("AI", &["ai", "機械学習", "llm", "gpt", "エージェント"]),
    ("音楽", &["音楽", "曲", "歌", "アーティスト"]),
    ("料理", &["料理", "レシピ", "食事", "食べ物"]),
];

const NAME_LEAD_INS: &[&str] = &["私の名前は", "名前は", "my name is"];
const NAME_TRAILING: &[char] = &['。', '、', 'で', 'す', '.', ',', '!', '?', '！', '？'];

/// Bounded, key-deduplicated store of facts inferred from a transcript.
#[derive(Debug, Clone)]
pub struct ContextManager {
    max_items: usize,
    items: Vec<ContextItem>,
    preferences: BTreeMap<String, String>,
    next_seq: u64,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_ITEMS)
    }
}

impl ContextManager {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
            items: Vec::new(),
            preferences: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn add(&mut self, key: &str, value: &str, importance: Importance) {
        self.items.retain(|item| item.key != key);
        self.items.push(ContextItem {
            key: key.to_string(),
            value: value.to_string(),
            importance,
            timestamp: Local::now(),
            seq: self.next_seq,
        });
        self.next_seq += 1;

        if self.items.len() > self.max_items {
            self.evict();
        }
    }

    fn evict(&mut self) {
        self.items.sort_by(|a, b| {
            b.importance
                .rank()
                .cmp(&a.importance.rank())
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| b.seq.cmp(&a.seq))
        });
        let dropped = self.items.len() - self.max_items;
        self.items.truncate(self.max_items);
        tracing::debug!(dropped, kept = self.items.len(), "context items evicted");
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn all(&self) -> Vec<ContextItem> {
        self.items.clone()
    }

    pub fn important(&self) -> Vec<ContextItem> {
        self.items
            .iter()
            .filter(|item| item.importance == Importance::High)
            .cloned()
            .collect()
    }

    pub fn set_preference(&mut self, key: &str, value: &str) {
        self.preferences.insert(key.to_string(), value.to_string());
    }

    pub fn preference(&self, key: &str) -> Option<&str> {
        self.preferences.get(key).map(String::as_str)
    }

    /// Stores the most recent topic among the last ten user turns and the last
    /// self-introduced name across the whole transcript.
    pub fn extract_from_history(&mut self, history: &[ConversationTurn]) {
        let topic = history
            .iter()
            .filter(|turn| turn.role == Role::User)
            .rev()
            .take(TOPIC_WINDOW)
            .find_map(|turn| detect_topic(&turn.content));
        if let Some(topic) = topic {
            self.add(LAST_TOPIC_KEY, topic, Importance::Normal);
        }

        let name = history
            .iter()
            .filter(|turn| turn.role == Role::User)
            .filter_map(|turn| extract_name(&turn.content))
            .last();
        if let Some(name) = name {
            self.add(USER_NAME_KEY, &name, Importance::High);
        }
    }

    pub fn format_summary(&self) -> String {
        if self.items.is_empty() && self.preferences.is_empty() {
            return "保存されているコンテキスト情報はありません。".to_string();
        }

        let mut lines = vec!["保存されているコンテキスト:".to_string()];
        for (importance, heading) in [
            (Importance::High, "【重要】"),
            (Importance::Normal, "【通常】"),
            (Importance::Low, "【補足】"),
        ] {
            let group = self
                .items
                .iter()
                .filter(|item| item.importance == importance)
                .collect::<Vec<&ContextItem>>();
            if group.is_empty() {
                continue;
            }
            lines.push(heading.to_string());
            lines.extend(
                group
                    .iter()
                    .map(|item| format!("  {}: {}", item.key, item.value)),
            );
        }

        if !self.preferences.is_empty() {
            lines.push("【ユーザー設定】".to_string());
            lines.extend(
                self.preferences
                    .iter()
                    .map(|(key, value)| format!("  {key}: {value}")),
            );
        }
        lines.join("\n")
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.preferences.clear();
    }
}

pub fn detect_topic(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    TOPIC_RULES
        .iter()
        .find(|(_, triggers)| triggers.iter().any(|trigger| lower.contains(trigger)))
        .map(|(label, _)| *label)
}

/// First whitespace-delimited token after a lead-in phrase, with trailing
/// punctuation and the copula stripped.
pub fn extract_name(text: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    NAME_LEAD_INS.iter().find_map(|lead_in| {
        let start = lower.find(lead_in)? + lead_in.len();
        let token = text[start..].split_whitespace().next()?;
        let name = token.trim_end_matches(NAME_TRAILING);
        let chars = name.chars().count();
        (chars > 0 && chars <= MAX_NAME_CHARS).then(|| name.to_string())
    })
}
