use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RuntimeConfig;

/// One JSONL line. Event-specific fields are flattened next to the envelope.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    ts_unix_ms: i64,
    event: &'a str,
    run_id: &'a str,
    command: &'a str,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// Appends command, pipeline and voice events to a JSONL file. Write failures
/// are logged and never surface to the caller.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    target: Option<PathBuf>,
    run_id: String,
    command: String,
    write_lock: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            target: cfg
                .telemetry_enabled
                .then(|| PathBuf::from(&cfg.telemetry_path)),
            run_id: format!("run-{}-{}", Utc::now().timestamp_millis(), std::process::id()),
            command,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            target: None,
            run_id: String::new(),
            command: String::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        let Some(path) = &self.target else {
            return;
        };

        let record = EventRecord {
            ts_unix_ms: Utc::now().timestamp_millis(),
            event,
            run_id: &self.run_id,
            command: &self.command,
            fields: match payload {
                Value::Object(fields) => fields,
                _ => Map::new(),
            },
        };
        if let Err(err) = self.append(path, &record) {
            tracing::warn!(event, path = %path.display(), error = %format!("{err:#}"), "telemetry write failed");
        }
    }

    fn append(&self, path: &Path, record: &EventRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .with_context(|| format!("failed to encode telemetry event '{}'", record.event))?;
        line.push('\n');

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create telemetry directory '{}'", dir.display()))?;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to telemetry file '{}'", path.display()))
    }
}

/// Envelope fields the report reads back; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct RecordedEvent {
    #[serde(default)]
    ts_unix_ms: Option<u64>,
    #[serde(default)]
    event: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    command: String,
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub command_counts: HashMap<String, usize>,
    pub command_completed: usize,
    pub command_failed: usize,
    pub stage_completed: usize,
    pub stage_failed: usize,
    pub pipelines_completed: usize,
    pub voice_turns: usize,
    pub voice_commands: usize,
    pub voice_sessions: usize,
    pub last_event_ts_unix_ms: Option<u128>,
}

impl TelemetrySummary {
    fn record(&mut self, event: RecordedEvent) {
        self.parsed_events += 1;
        if !event.run_id.is_empty() {
            self.unique_runs.insert(event.run_id);
        }
        if !event.command.is_empty() {
            *self.command_counts.entry(event.command).or_default() += 1;
        }
        if let Some(ts) = event.ts_unix_ms.map(u128::from) {
            self.last_event_ts_unix_ms = Some(self.last_event_ts_unix_ms.map_or(ts, |seen| seen.max(ts)));
        }

        let counter = match event.event.as_str() {
            "command.completed" => &mut self.command_completed,
            "command.failed" => &mut self.command_failed,
            "pipeline.stage.completed" => &mut self.stage_completed,
            "pipeline.stage.failed" => &mut self.stage_failed,
            "pipeline.completed" => &mut self.pipelines_completed,
            "voice.turn.completed" => &mut self.voice_turns,
            "voice.command.handled" => &mut self.voice_commands,
            "voice.session.ended" => &mut self.voice_sessions,
            _ => return,
        };
        *counter += 1;
    }
}

/// Summarizes the newest `limit` lines (at least one). Blank lines are skipped.
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };

    let newest = lines.iter().rev().take(limit.max(1));
    for line in newest.map(|line| line.trim()).filter(|line| !line.is_empty()) {
        match serde_json::from_str::<RecordedEvent>(line) {
            Ok(event) => summary.record(event),
            Err(_) => summary.parse_errors += 1,
        }
    }
    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry recorded yet at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;
    let summary = summarize_telemetry_lines(lines, limit);

    println!("Telemetry: {}", path.display());
    println!(
        "- lines={} analyzed={} unreadable={} runs={}",
        summary.total_lines,
        summary.parsed_events,
        summary.parse_errors,
        summary.unique_runs.len()
    );
    println!(
        "- commands: completed={} failed={}",
        summary.command_completed, summary.command_failed
    );
    println!(
        "- pipeline: runs={} stages ok={} stages failed={}",
        summary.pipelines_completed, summary.stage_completed, summary.stage_failed
    );
    println!(
        "- voice: sessions={} turns={} commands={}",
        summary.voice_sessions, summary.voice_turns, summary.voice_commands
    );

    let mut busiest = summary.command_counts.into_iter().collect::<Vec<(String, usize)>>();
    busiest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if !busiest.is_empty() {
        println!("Events per command:");
        for (command, count) in busiest.iter().take(5) {
            println!("  {command:<16} {count}");
        }
    }

    if let Some(ts) = summary.last_event_ts_unix_ms {
        println!("Last event at (unix ms): {ts}");
    }
    Ok(())
}
