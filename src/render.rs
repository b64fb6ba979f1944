//! Terminal rendering: syntax-highlighted JSON and polling progress dots.

use std::io::{IsTerminal, Write};

use colored::Colorize;
use serde_json::Value;

use crate::auth::PollProgress;

/// How payloads are written to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Color,
}

impl Style {
    /// Color when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        if std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
            Self::Color
        } else {
            Self::Plain
        }
    }
}

/// Destination for payloads the operator should see.
pub trait OutputSink: Send + Sync {
    fn emit(&self, payload: &[u8]);
}

/// Prints payloads to stdout.
#[derive(Debug, Clone, Copy)]
pub struct TerminalSink {
    style: Style,
}

impl TerminalSink {
    pub fn new(style: Style) -> Self {
        Self { style }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new(Style::detect())
    }
}

impl OutputSink for TerminalSink {
    fn emit(&self, payload: &[u8]) {
        println!("{}", render_payload(payload, self.style));
    }
}

/// Pretty-print a payload. Bodies that are not JSON come back unchanged.
pub fn render_payload(payload: &[u8], style: Style) -> String {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => render_value(&value, style),
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}

pub fn render_value(value: &Value, style: Style) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0, style);
    out
}

fn write_value(out: &mut String, value: &Value, depth: usize, style: Style) {
    match value {
        Value::Null => out.push_str(&paint("null", Part::Null, style)),
        Value::Bool(b) => out.push_str(&paint(&b.to_string(), Part::Bool, style)),
        Value::Number(n) => out.push_str(&paint(&n.to_string(), Part::Number, style)),
        Value::String(s) => out.push_str(&paint(&quote(s), Part::String, style)),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                indent(out, depth + 1);
                write_value(out, item, depth + 1, style);
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            indent(out, depth);
            out.push(']');
        }
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            for (i, (key, item)) in map.iter().enumerate() {
                indent(out, depth + 1);
                out.push_str(&paint(&quote(key), Part::Key, style));
                out.push_str(": ");
                write_value(out, item, depth + 1, style);
                if i + 1 < map.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

#[derive(Clone, Copy)]
enum Part {
    Key,
    String,
    Number,
    Bool,
    Null,
}

fn paint(text: &str, part: Part, style: Style) -> String {
    if style == Style::Plain {
        return text.to_string();
    }
    match part {
        Part::Key => text.bright_blue().to_string(),
        Part::String => text.bright_green().to_string(),
        Part::Number => text.bright_yellow().to_string(),
        Part::Bool => text.bright_cyan().to_string(),
        Part::Null => text.bright_red().to_string(),
    }
}

fn quote(s: &str) -> String {
    // Serializing a str cannot fail.
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

/// Prints one dot per waited second while a device code is pending.
#[derive(Debug, Clone, Copy)]
pub struct TerminalProgress {
    style: Style,
}

impl TerminalProgress {
    pub fn new(style: Style) -> Self {
        Self { style }
    }

    // Blue marks the first tick of each wait, yellow the rest.
    fn dot(&self, index: u64) -> String {
        match (self.style, index) {
            (Style::Plain, _) => ".".to_string(),
            (Style::Color, 0) => ".".blue().bold().to_string(),
            (Style::Color, _) => ".".yellow().bold().to_string(),
        }
    }
}

impl PollProgress for TerminalProgress {
    fn on_tick(&self, index: u64) {
        let dot = self.dot(index);
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{dot}");
        let _ = stdout.flush();
    }
}
