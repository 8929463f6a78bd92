use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{FunctionTool, run_with_args, split_sentences};

const MATCHES_PER_KEYWORD: usize = 3;
const SENTENCES_PER_CATEGORY: usize = 5;
const OTHER_SENTENCES: usize = 3;
const MAX_SOURCES: usize = 5;
pub const OTHER_CATEGORY: &str = "other";

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("url pattern should compile")
});
static QUOTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[「“"]([^」”"]+)[」”"]"#).expect("quote pattern should compile")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern should compile"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordMatches {
    pub keyword: String,
    pub matches: Vec<String>,
}

/// Up to three sentences per keyword; keywords without a match are omitted.
pub fn extract_key_information(text: &str, keywords: &[String]) -> Vec<KeywordMatches> {
    let sentences = split_sentences(text);
    keywords
        .iter()
        .filter_map(|keyword| {
            let needle = keyword.to_lowercase();
            let matches = sentences
                .iter()
                .filter(|sentence| sentence.to_lowercase().contains(&needle))
                .take(MATCHES_PER_KEYWORD)
                .map(|sentence| sentence.to_string())
                .collect::<Vec<String>>();
            (!matches.is_empty()).then(|| KeywordMatches {
                keyword: keyword.clone(),
                matches,
            })
        })
        .collect()
}

/// Whitespace-normalizes `results`; when longer than `max_chars`, keeps whole
/// sentences that fit and rejoins them with `。`.
pub fn summarize_search_results(results: &str, max_chars: usize) -> String {
    let cleaned = WHITESPACE.replace_all(results, " ").trim().to_string();
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }

    let mut kept = Vec::new();
    let mut length = 0usize;
    for sentence in cleaned
        .split(|ch: char| matches!(ch, '。' | '．' | '.' | '!' | '?' | '！' | '？'))
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
    {
        let sentence_len = sentence.chars().count();
        if length + sentence_len > max_chars {
            break;
        }
        kept.push(sentence);
        length += sentence_len;
    }

    let mut summary = kept.join("。");
    if !summary.is_empty() && !summary.ends_with('。') {
        summary.push('。');
    }
    summary
}

/// Groups sentences under each category that they mention. Unmatched sentences
/// land under [`OTHER_CATEGORY`].
pub fn organize_information(raw: &str, categories: &[String]) -> BTreeMap<String, Vec<String>> {
    let sentences = split_sentences(raw);
    let mut organized = BTreeMap::new();
    let mut matched = HashSet::<&str>::new();

    for category in categories {
        let needle = category.to_lowercase();
        let hits = sentences
            .iter()
            .copied()
            .filter(|sentence| sentence.to_lowercase().contains(&needle))
            .take(SENTENCES_PER_CATEGORY)
            .collect::<Vec<&str>>();
        if hits.is_empty() {
            continue;
        }
        matched.extend(hits.iter().copied());
        organized.insert(
            category.clone(),
            hits.into_iter().map(str::to_string).collect(),
        );
    }

    let other = sentences
        .iter()
        .filter(|sentence| !matched.contains(*sentence))
        .take(OTHER_SENTENCES)
        .map(|sentence| sentence.to_string())
        .collect::<Vec<String>>();
    if !other.is_empty() {
        organized.insert(OTHER_CATEGORY.to_string(), other);
    }

    organized
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub found_urls: usize,
    pub urls: Vec<String>,
    pub found_quotes: usize,
    pub quotes: Vec<String>,
    pub has_sources: bool,
}

pub fn validate_sources(text: &str) -> SourceReport {
    let urls = URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect::<Vec<String>>();
    let quotes = QUOTE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect::<Vec<String>>();

    SourceReport {
        found_urls: urls.len(),
        found_quotes: quotes.len(),
        has_sources: !urls.is_empty() || !quotes.is_empty(),
        urls: urls.into_iter().take(MAX_SOURCES).collect(),
        quotes: quotes.into_iter().take(MAX_SOURCES).collect(),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct KeywordArgs {
    text: String,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SummarizeArgs {
    results: String,
    /// Character budget, 500 when omitted
    #[serde(default)]
    max_length: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OrganizeArgs {
    raw_data: String,
    categories: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SourceArgs {
    text: String,
}

pub fn tools() -> Vec<FunctionTool> {
    vec![
        FunctionTool::new::<KeywordArgs>(
            "extract_key_information",
            "Finds sentences mentioning each keyword (up to 3 per keyword).",
            |args| {
                run_with_args(args, |a: KeywordArgs| {
                    Ok(extract_key_information(&a.text, &a.keywords))
                })
            },
        ),
        FunctionTool::new::<SummarizeArgs>(
            "summarize_search_results",
            "Condenses search result text to a character budget at sentence boundaries.",
            |args| {
                run_with_args(args, |a: SummarizeArgs| {
                    Ok(json!({
                        "summary": summarize_search_results(&a.results, a.max_length.unwrap_or(500))
                    }))
                })
            },
        ),
        FunctionTool::new::<OrganizeArgs>(
            "organize_information",
            "Groups sentences of raw text under the given categories.",
            |args| {
                run_with_args(args, |a: OrganizeArgs| {
                    Ok(organize_information(&a.raw_data, &a.categories))
                })
            },
        ),
        FunctionTool::new::<SourceArgs>(
            "validate_sources",
            "Lists URLs and quoted passages found in a text.",
            |args| run_with_args(args, |a: SourceArgs| Ok(validate_sources(&a.text))),
        ),
    ]
}
