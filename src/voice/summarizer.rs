use serde::Serialize;

use crate::voice::session::{ConversationTurn, Role};

pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 500;
const EXCERPT_CHARS: usize = 50;
const MAX_TOPICS: usize = 5;
const RECENT_EXCHANGES: usize = 3;

const EMPTY_HISTORY_SUMMARY: &str = "まだ会話履歴がありません。";

const QUESTION_TOPICS: &[(&str, &[&str])] = &[
    ("天気", &["天気", "気温", "雨", "晴れ"]),
    ("時間", &["時間", "何時", "いつ"]),
    ("場所", &["どこ", "場所", "位置"]),
    ("方法", &["どうやって", "方法", "やり方"]),
    ("理由", &["なぜ", "理由", "どうして"]),
    ("プログラミング", &["python", "コード", "プログラム", "関数"]),
    ("AI", &["ai", "機械学習", "llm", "gpt"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub total_turns: usize,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub avg_user_chars: f64,
    pub avg_assistant_chars: f64,
}

/// Stateless digest of a transcript.
#[derive(Debug, Clone)]
pub struct ConversationSummarizer {
    max_chars: usize,
}

impl Default for ConversationSummarizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUMMARY_CHARS)
    }
}

impl ConversationSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn summarize(&self, history: &[ConversationTurn], focus_recent: bool) -> String {
        if history.is_empty() {
            return EMPTY_HISTORY_SUMMARY.to_string();
        }

        let user = contents(history, Role::User);
        let assistant = contents(history, Role::Assistant);
        let mut summary = format!(
            "会話ターン数: {}\nユーザー発話: {}文字\nアシスタント応答: {}文字",
            user.len(),
            char_total(&user),
            char_total(&assistant)
        );

        if focus_recent {
            if let Some(excerpt) = recent_excerpt(history) {
                summary.push_str(&format!("\n\n最近の話題: {excerpt}"));
            }
        }

        let topics = question_topics(&user);
        if !topics.is_empty() {
            summary.push_str(&format!("\n\n主な話題: {}", topics.join(", ")));
        }

        truncate_chars(&summary, self.max_chars)
    }

    pub fn stats(&self, history: &[ConversationTurn]) -> ConversationStats {
        let user = contents(history, Role::User);
        let assistant = contents(history, Role::Assistant);
        ConversationStats {
            total_turns: user.len(),
            total_messages: history.len(),
            user_messages: user.len(),
            assistant_messages: assistant.len(),
            avg_user_chars: average_chars(&user),
            avg_assistant_chars: average_chars(&assistant),
        }
    }

    pub fn format_stats(&self, stats: &ConversationStats) -> String {
        format!(
            "会話統計:\n  総ターン数: {}\n  総メッセージ数: {}\n  ユーザー発話数: {}\n  アシスタント応答数: {}\n  平均ユーザー発話長: {:.1}文字\n  平均アシスタント応答長: {:.1}文字",
            stats.total_turns,
            stats.total_messages,
            stats.user_messages,
            stats.assistant_messages,
            stats.avg_user_chars,
            stats.avg_assistant_chars
        )
    }
}

fn contents(history: &[ConversationTurn], role: Role) -> Vec<&str> {
    history
        .iter()
        .filter(|turn| turn.role == role)
        .map(|turn| turn.content.as_str())
        .collect()
}

fn char_total(messages: &[&str]) -> usize {
    messages.iter().map(|message| message.chars().count()).sum()
}

fn average_chars(messages: &[&str]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    char_total(messages) as f64 / messages.len() as f64
}

/// Latest user utterance within the last few exchanges, cut to 50 chars.
fn recent_excerpt(history: &[ConversationTurn]) -> Option<String> {
    let window = history.len().saturating_sub(RECENT_EXCHANGES * 2);
    let latest = history[window..]
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)?;
    Some(truncate_chars(&latest.content, EXCERPT_CHARS))
}

fn question_topics(messages: &[&str]) -> Vec<&'static str> {
    let mut topics = Vec::new();
    for message in messages {
        let lower = message.to_lowercase();
        for (label, triggers) in QUESTION_TOPICS {
            if triggers.iter().any(|trigger| lower.contains(trigger)) && !topics.contains(label) {
                topics.push(*label);
            }
        }
    }
    topics.truncate(MAX_TOPICS);
    topics
}

/// Cuts at `max` characters and appends "..." when anything was dropped.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((offset, _)) => format!("{}...", &text[..offset]),
        None => text.to_string(),
    }
}
