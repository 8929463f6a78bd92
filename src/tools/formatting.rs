use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{FunctionTool, run_with_args};

static REPEATED_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +").expect("space pattern should compile"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern should compile"));

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// One `##` section per key: arrays become bullets, objects become `**key**: value` lines.
pub fn format_as_markdown(content: &BTreeMap<String, Value>, title: &str) -> String {
    let mut lines = vec![format!("# {title}"), String::new()];
    for (key, value) in content {
        lines.push(format!("## {key}"));
        lines.push(String::new());
        match value {
            Value::Array(items) => {
                lines.extend(items.iter().map(|item| format!("- {}", value_to_text(item))));
            }
            Value::Object(map) => {
                lines.extend(
                    map.iter()
                        .map(|(sub_key, sub_value)| format!("**{sub_key}**: {}", value_to_text(sub_value))),
                );
            }
            other => lines.push(value_to_text(other)),
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn create_bullet_list(items: &[String], ordered: bool) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if ordered {
                format!("{}. {item}", index + 1)
            } else {
                format!("- {item}")
            }
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn structure_as_json(data: &Value, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(data)
    } else {
        serde_json::to_string(data)
    };
    rendered.unwrap_or_else(|_| data.to_string())
}

/// Rows are padded or truncated to the header width. Empty headers or rows yield "".
pub fn create_summary_table(headers: &[String], rows: &[Vec<Value>]) -> String {
    if headers.is_empty() || rows.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        format!("| {} |", headers.join(" | ")),
        format!("| {} |", vec!["---"; headers.len()].join(" | ")),
    ];
    for row in rows {
        let cells = (0..headers.len())
            .map(|index| row.get(index).map(value_to_text).unwrap_or_default())
            .collect::<Vec<String>>();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    lines.join("\n")
}

/// Wraps each case-insensitive keyword occurrence in `**`.
pub fn highlight_key_points(text: &str, keywords: &[String]) -> String {
    let mut result = text.to_string();
    for keyword in keywords.iter().filter(|k| !k.is_empty()) {
        let Ok(pattern) = RegexBuilder::new(&regex::escape(keyword))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        let replacement = format!("**{keyword}**");
        result = pattern
            .replace_all(&result, regex::NoExpand(&replacement))
            .into_owned();
    }
    result
}

pub fn format_conclusion(summary: &str, key_findings: &[String], recommendations: &[String]) -> String {
    let mut sections = vec![
        "# Conclusion".to_string(),
        String::new(),
        "## Summary".to_string(),
        summary.to_string(),
        String::new(),
        "## Key findings".to_string(),
        String::new(),
        create_bullet_list(key_findings, true),
        String::new(),
    ];
    if !recommendations.is_empty() {
        sections.push("## Recommendations".to_string());
        sections.push(String::new());
        sections.push(create_bullet_list(recommendations, true));
        sections.push(String::new());
    }
    sections.join("\n")
}

pub fn clean_text(text: &str) -> String {
    let collapsed = REPEATED_SPACES.replace_all(text, " ");
    EXCESS_NEWLINES
        .replace_all(&collapsed, "\n\n")
        .trim()
        .to_string()
}

/// Prepends a `---` front-matter block.
pub fn add_metadata(content: &str, metadata: &BTreeMap<String, String>) -> String {
    let mut lines = vec!["---".to_string()];
    lines.extend(metadata.iter().map(|(key, value)| format!("{key}: {value}")));
    lines.push("---".to_string());
    lines.push(String::new());
    lines.join("\n") + content
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MarkdownArgs {
    content: BTreeMap<String, Value>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BulletArgs {
    items: Vec<String>,
    #[serde(default)]
    ordered: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct JsonArgs {
    data: Value,
    #[serde(default)]
    pretty: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TableArgs {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct HighlightArgs {
    text: String,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConclusionArgs {
    summary: String,
    key_findings: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CleanArgs {
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MetadataArgs {
    content: String,
    metadata: BTreeMap<String, String>,
}

fn markdown(text: String) -> anyhow::Result<Value> {
    Ok(json!({ "markdown": text }))
}

pub fn tools() -> Vec<FunctionTool> {
    vec![
        FunctionTool::new::<MarkdownArgs>(
            "format_as_markdown",
            "Renders a key/value object as Markdown with one section per key.",
            |args| {
                run_with_args(args, |a: MarkdownArgs| {
                    markdown(format_as_markdown(
                        &a.content,
                        a.title.as_deref().unwrap_or("Analysis"),
                    ))
                })
            },
        ),
        FunctionTool::new::<BulletArgs>(
            "create_bullet_list",
            "Renders items as an ordered or unordered Markdown list.",
            |args| {
                run_with_args(args, |a: BulletArgs| {
                    markdown(create_bullet_list(&a.items, a.ordered))
                })
            },
        ),
        FunctionTool::new::<JsonArgs>(
            "structure_as_json",
            "Serializes data as JSON text, pretty-printed by default.",
            |args| {
                run_with_args(args, |a: JsonArgs| {
                    Ok(json!({ "json": structure_as_json(&a.data, a.pretty.unwrap_or(true)) }))
                })
            },
        ),
        FunctionTool::new::<TableArgs>(
            "create_summary_table",
            "Builds a Markdown table from headers and rows.",
            |args| {
                run_with_args(args, |a: TableArgs| {
                    markdown(create_summary_table(&a.headers, &a.rows))
                })
            },
        ),
        FunctionTool::new::<HighlightArgs>(
            "highlight_key_points",
            "Bolds every occurrence of the given keywords.",
            |args| {
                run_with_args(args, |a: HighlightArgs| {
                    markdown(highlight_key_points(&a.text, &a.keywords))
                })
            },
        ),
        FunctionTool::new::<ConclusionArgs>(
            "format_conclusion",
            "Formats a conclusion with summary, numbered findings and optional recommendations.",
            |args| {
                run_with_args(args, |a: ConclusionArgs| {
                    markdown(format_conclusion(
                        &a.summary,
                        &a.key_findings,
                        &a.recommendations,
                    ))
                })
            },
        ),
        FunctionTool::new::<CleanArgs>(
            "clean_text",
            "Collapses repeated spaces and blank lines.",
            |args| run_with_args(args, |a: CleanArgs| markdown(clean_text(&a.text))),
        ),
        FunctionTool::new::<MetadataArgs>(
            "add_metadata",
            "Prepends a front-matter metadata block to content.",
            |args| {
                run_with_args(args, |a: MetadataArgs| {
                    markdown(add_metadata(&a.content, &a.metadata))
                })
            },
        ),
    ]
}
