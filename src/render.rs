//! Terminal rendering: answers, review traces, registry listings, search
//! results and archived chats, plus the [`TerminalView`] that prints a live
//! session.
//!
//! Every `render_*` function returns a `String` so it can be tested without
//! a terminal; only `TerminalView` writes to stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use colored::*;

use crate::controller::SessionView;
use crate::dispatcher::ProgressNote;
use crate::history::ArchivedChat;
use crate::i18n::{t, tf, Lang};
use crate::protocol::{
    Critique, PromptTemplate, Provider, ReviewDetail, Role, SearchResponse, MAX_DIMENSION_SCORE,
    MAX_TOTAL_SCORE,
};
use crate::session::Affordance;
use crate::settings::PreferencesSnapshot;

// ---------------------------------------------------------------------------
// Markdown-lite
// ---------------------------------------------------------------------------

/// Bold, inline code and fenced code blocks; everything else passes through.
pub fn render_markdown(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            out.push(format!("    {}", line.bright_black()));
        } else {
            out.push(render_inline(line));
        }
    }
    out.join("\n")
}

fn render_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let bold = rest.find("**");
        let code = rest.find('`');
        match (bold, code) {
            (Some(b), c) if c.map_or(true, |c| b < c) => {
                let after = &rest[b + 2..];
                match after.find("**") {
                    Some(end) => {
                        out.push_str(&rest[..b]);
                        out.push_str(&after[..end].bold().to_string());
                        rest = &after[end + 2..];
                    }
                    None => {
                        out.push_str(rest);
                        break;
                    }
                }
            }
            (_, Some(c)) => {
                let after = &rest[c + 1..];
                match after.find('`') {
                    Some(end) => {
                        out.push_str(&rest[..c]);
                        out.push_str(&after[..end].cyan().to_string());
                        rest = &after[end + 1..];
                    }
                    None => {
                        out.push_str(rest);
                        break;
                    }
                }
            }
            _ => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Review details
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    High,
    Medium,
    Low,
}

/// Total-score colour bands: 10 and above is good, 7 and above is fair.
pub fn score_band(total: f64) -> ScoreBand {
    if total >= 10.0 {
        ScoreBand::High
    } else if total >= 7.0 {
        ScoreBand::Medium
    } else {
        ScoreBand::Low
    }
}

fn colored_total(total: f64) -> ColoredString {
    let text = format!("{total:.1}/{MAX_TOTAL_SCORE}");
    match score_band(total) {
        ScoreBand::High => text.bright_green(),
        ScoreBand::Medium => text.bright_yellow(),
        ScoreBand::Low => text.bright_red(),
    }
}

fn render_critique(c: &Critique, lang: Lang) -> String {
    let dims = [
        ("accuracy", c.accuracy),
        ("completeness", c.completeness),
        ("clarity", c.clarity),
        ("usefulness", c.usefulness),
    ]
    .iter()
    .map(|(key, v)| format!("{}: {v}/{MAX_DIMENSION_SCORE}", t(lang, key)))
    .collect::<Vec<_>>()
    .join("  ");
    format!(
        "    {}: {} | {}: {}/{}\n    {}\n    {}: {}",
        t(lang, "critic").bright_white(),
        c.critic_name,
        t(lang, "totalScore").bright_white(),
        c.score,
        MAX_TOTAL_SCORE,
        dims.dimmed(),
        t(lang, "comment"),
        c.comment.as_deref().unwrap_or("N/A"),
    )
}

/// The full review trace behind an answer.
pub fn render_details(details: &[ReviewDetail], lang: Lang) -> String {
    if details.is_empty() {
        return t(lang, "noDetails").dimmed().to_string();
    }
    let mut out = Vec::new();
    for d in details {
        out.push(format!(
            "{}  {} {}",
            d.model_name.bright_cyan().bold(),
            t(lang, "totalScore"),
            colored_total(d.total_score)
        ));
        out.push(format!("  1. {}", t(lang, "initialAnswer").bright_yellow()));
        out.push(indent(&render_markdown(&d.initial_answer), 4));
        out.push(format!("  2. {}", t(lang, "critiquesReceived").bright_yellow()));
        if d.critiques_received.is_empty() {
            out.push(format!("    {}", t(lang, "noCritiques").dimmed()));
        } else {
            for c in &d.critiques_received {
                out.push(render_critique(c, lang));
            }
        }
        out.push(format!("  3. {}", t(lang, "revisedAnswer").bright_yellow()));
        out.push(indent(&render_markdown(&d.revised_answer), 4));
        out.push(String::new());
    }
    out.join("\n")
}

fn indent(text: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    text.lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Registry listings
// ---------------------------------------------------------------------------

pub fn render_providers(providers: &[Provider], lang: Lang) -> String {
    if providers.is_empty() {
        return t(lang, "noProviders").dimmed().to_string();
    }
    let mut out = vec![t(lang, "manageProviders").bright_cyan().bold().to_string()];
    for p in providers {
        out.push(format!(
            "  {} [{}] {}",
            p.name.bright_white().bold(),
            p.kind,
            p.api_base.as_deref().unwrap_or("").dimmed()
        ));
        if let Some(key) = p.api_key.as_deref().filter(|k| !k.is_empty()) {
            out.push(format!("    key: {}", key.dimmed()));
        }
        out.push(format!("    {}: {}", t(lang, "models"), p.models().join(", ")));
    }
    out.join("\n")
}

/// Every selectable `provider::model`, vision-capable ones marked.
pub fn render_models(providers: &[Provider], lang: Lang) -> String {
    let ids: Vec<_> = providers.iter().flat_map(|p| p.model_ids()).collect();
    if ids.is_empty() {
        return t(lang, "noProviders").dimmed().to_string();
    }
    ids.iter()
        .map(|id| {
            if id.looks_like_vision() {
                format!("{id}  {}", format!("({})", t(lang, "vision")).bright_magenta())
            } else {
                id.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_prompts(prompts: &[PromptTemplate], lang: Lang) -> String {
    if prompts.is_empty() {
        return t(lang, "noPrompts").dimmed().to_string();
    }
    let mut out = vec![t(lang, "managePrompts").bright_cyan().bold().to_string()];
    for p in prompts {
        let marker = if p.is_active() {
            format!(" ({})", t(lang, "active")).bright_green().to_string()
        } else {
            String::new()
        };
        out.push(format!("  #{} {}{}", p.id, p.name(lang.code()).bright_white(), marker));
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub fn render_search(response: &SearchResponse, lang: Lang) -> String {
    if response.results.is_empty() {
        return t(lang, "noResults").dimmed().to_string();
    }
    let count = format!("{}", response.number_of_results.round() as u64);
    let mut out = vec![tf(lang, "searchResults", &[("count", count.as_str())]).dimmed().to_string()];
    for (i, hit) in response.results.iter().enumerate() {
        let engine = hit
            .engine
            .as_deref()
            .map(|e| format!(" [{e}]"))
            .unwrap_or_default();
        out.push(format!("{}. {}{}", i + 1, hit.title.bright_white().bold(), engine.dimmed()));
        out.push(format!("   {}", hit.url.bright_blue()));
        if !hit.content.is_empty() {
            out.push(format!("   {}", hit.content));
        }
    }
    if !response.suggestions.is_empty() {
        out.push(format!(
            "{}: {}",
            t(lang, "suggestions").bright_yellow(),
            response.suggestions.join(", ")
        ));
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Archive and settings
// ---------------------------------------------------------------------------

/// `MM-DD HH:MM` in UTC.
pub fn format_timestamp(ms: u64) -> String {
    let secs = ms / 1000;
    let days = (secs / 86_400) as i64;
    let (hour, minute) = ((secs % 86_400) / 3600, (secs % 3600) / 60);

    // days since 1970-01-01 to civil date
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };

    format!("{month:02}-{day:02} {hour:02}:{minute:02}")
}

pub fn render_archive_list(entries: &[ArchivedChat], lang: Lang) -> String {
    if entries.is_empty() {
        return t(lang, "noHistory").dimmed().to_string();
    }
    entries
        .iter()
        .map(|e| {
            format!(
                "{}  {}  {}",
                e.id.dimmed(),
                format_timestamp(e.created_at).bright_black(),
                e.title.bright_white()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_archived_chat(entry: &ArchivedChat, lang: Lang, timestamps: bool) -> String {
    let mut out = vec![entry.title.bright_cyan().bold().to_string()];
    for m in &entry.messages {
        let who = match m.role {
            Role::User => t(lang, "user").bright_green().bold(),
            Role::Assistant => t(lang, "aiAssistant").bright_magenta().bold(),
        };
        out.push(format!("{who}"));
        out.push(render_markdown(&m.content));
        if timestamps {
            if let Ok(ms) = m.timestamp.parse::<u64>() {
                out.push(format_timestamp(ms).dimmed().to_string());
            }
        }
        out.push(String::new());
    }
    out.join("\n")
}

pub fn render_settings(s: &PreferencesSnapshot, lang: Lang) -> String {
    let on_off = |b: bool| if b { "on" } else { "off" };
    let wallpaper = match s.wallpaper_bytes {
        Some(n) => format!("set ({n} chars)"),
        None => "none".to_string(),
    };
    [
        t(lang, "settings").bright_cyan().bold().to_string(),
        format!("  language     {}", s.language),
        format!("  theme        {}", s.theme.as_str()),
        format!("  wallpaper    {wallpaper}"),
        format!("  opacity      {}%", s.opacity),
        format!("  brightness   {}%", s.brightness),
        format!("  timestamps   {}", on_off(s.timestamps)),
        format!("  peer-review  {}", on_off(s.peer_review)),
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// Live session view
// ---------------------------------------------------------------------------

/// Prints a session as it happens. Status lines go to stdout dimmed; the
/// final answer is rendered as markdown.
pub struct TerminalView {
    lang: Lang,
    show_progress: bool,
    busy: AtomicBool,
}

impl TerminalView {
    pub fn new(lang: Lang) -> Self {
        Self {
            lang,
            show_progress: true,
            busy: AtomicBool::new(false),
        }
    }

    pub fn quiet_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn line(&self, text: impl std::fmt::Display) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
        let _ = stdout.flush();
    }
}

impl SessionView for TerminalView {
    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn show_pending(&self, text: &str) {
        self.line(text.italic().bright_black());
    }

    fn show_progress(&self, note: &ProgressNote) {
        if self.show_progress {
            self.line(format!("  · {note}").bright_black());
        }
    }

    fn show_answer(&self, answer: &str, affordances: &[Affordance]) {
        self.line(format!("\n{}", render_markdown(answer)));
        if !affordances.is_empty() {
            let hints = affordances
                .iter()
                .map(|a| match a {
                    Affordance::ViewDetails => format!("[/details {}]", t(self.lang, "viewDetails")),
                    Affordance::Regenerate => format!("[/regen {}]", t(self.lang, "regenerate")),
                })
                .collect::<Vec<_>>()
                .join(" ");
            self.line(hints.bright_blue());
        }
    }

    fn show_error(&self, message: &str) {
        self.line(message.bright_red());
    }

    fn show_stop_marker(&self, text: &str) {
        self.line(text.italic().bright_yellow());
    }
}
