/// Terminal presentation: ANSI colors, banners and boxed notices.

// ---------------------------------------------------------------------------
// ANSI color helpers
// ---------------------------------------------------------------------------

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const CYAN: &str = "\x1b[36m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BOLD_CYAN: &str = "\x1b[1;36m";
pub const BOLD_GREEN: &str = "\x1b[1;32m";
pub const BOLD_YELLOW: &str = "\x1b[1;33m";
pub const BOLD_RED: &str = "\x1b[1;31m";

const RULE_WIDTH: usize = 68;

// ---------------------------------------------------------------------------
// Banners
// ---------------------------------------------------------------------------

pub fn print_pipeline_banner(deployment: &str, deployment_mini: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("  {BOLD_CYAN}reasonvox reason{RESET} {DIM}v{version}{RESET}");
    println!(
        "  {DIM}Coordinator → Researcher → Analyzer → Summarizer{RESET}  {DIM}·{RESET}  {GREEN}{deployment}{RESET} {DIM}/{RESET} {GREEN}{deployment_mini}{RESET}"
    );
    print_rule();
}

pub fn print_voice_banner(agent_name: &str, voice: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("  {BOLD_CYAN}reasonvox voice{RESET} {DIM}v{version}{RESET}  {DIM}·{RESET}  {GREEN}{agent_name}{RESET} {DIM}/{RESET} {GREEN}{voice}{RESET}");
    print_rule();
}

pub fn print_rule() {
    println!("  {DIM}{}{RESET}", "━".repeat(RULE_WIDTH));
}

pub fn print_section(title: &str) {
    println!();
    println!("{BOLD}{title}{RESET}");
    println!("{DIM}{}{RESET}", "─".repeat(RULE_WIDTH));
}

/// Bordered box with a title line; each entry of `lines` is printed on its own row.
pub fn draw_box(title: &str, lines: &[String]) {
    let inner = lines
        .iter()
        .map(|line| display_width(&strip_ansi(line)))
        .chain(std::iter::once(display_width(title) + 2))
        .max()
        .unwrap_or(0)
        .max(40);

    let title_width = display_width(title);
    let right = (inner + 2).saturating_sub(title_width + 3);
    println!("  {DIM}╭─ {RESET}{title}{DIM} {}╮{RESET}", "─".repeat(right));
    for line in lines {
        let pad = inner.saturating_sub(display_width(&strip_ansi(line)));
        println!("  {DIM}│{RESET} {line}{} {DIM}│{RESET}", " ".repeat(pad));
    }
    println!("  {DIM}╰{}╯{RESET}", "─".repeat(inner + 2));
}

/// Approximate terminal columns: CJK and other wide characters count as two.
pub fn display_width(text: &str) -> usize {
    text.chars()
        .map(|ch| if (ch as u32) >= 0x1100 { 2 } else { 1 })
        .sum()
}

/// Strip ANSI escape sequences for visible length calculation.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' {
            in_escape = true;
        } else if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Console input
// ---------------------------------------------------------------------------

/// Reads one line from the terminal. `None` on Ctrl+C or EOF.
pub fn read_console_line(prompt: &str) -> anyhow::Result<Option<String>> {
    use rustyline::error::ReadlineError;

    let mut editor = rustyline::DefaultEditor::new()
        .map_err(|err| anyhow::anyhow!("failed to read input: line editor unavailable ({err})"))?;
    match editor.readline(prompt) {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
        Err(err) => Err(anyhow::anyhow!("failed to read input: {err}")),
    }
}

/// `[Y/n]` prompt; empty input counts as yes.
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let answer = read_console_line(&format!("{prompt} [Y/n]: "))?;
    Ok(match answer {
        Some(answer) => {
            let answer = answer.trim().to_lowercase();
            answer.is_empty() || answer == "y" || answer == "yes"
        }
        None => false,
    })
}
