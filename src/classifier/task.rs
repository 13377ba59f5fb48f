//! Typed tasks and the fragment grammar the decision model answers in

use serde::{Deserialize, Serialize};

/// Kind prefixes, checked in this order. Multi-word prefixes come first so
/// `generate image` never falls through to a shorter label.
const PREFIXES: &[&str] = &[
    "generate image",
    "google search",
    "youtube search",
    "general",
    "realtime",
    "reminder",
    "content",
    "system",
    "open",
    "close",
    "play",
    "exit",
];

/// Template slots the model sometimes echoes back instead of filling in
const PLACEHOLDERS: &[&str] = &[
    "(query)",
    "( query )",
    "(app/site)",
    "(app)",
    "(song)",
    "(prompt)",
    "(task)",
    "(topic)",
    "(datetime message)",
];

/// Browser search target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEngine {
    Google,
    YouTube,
}

impl std::fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchEngine::Google => write!(f, "Google"),
            SearchEngine::YouTube => write!(f, "YouTube"),
        }
    }
}

/// System control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemOp {
    VolumeUp,
    VolumeDown,
    Mute,
    Unmute,
    Screenshot,
}

impl SystemOp {
    /// Parse the argument of a `system` fragment
    pub fn parse(argument: &str) -> Option<Self> {
        let lower = argument.to_lowercase();

        // `unmute` contains `mute`
        if lower.contains("volume up") || lower.contains("increase") {
            Some(SystemOp::VolumeUp)
        } else if lower.contains("volume down") || lower.contains("decrease") {
            Some(SystemOp::VolumeDown)
        } else if lower.contains("unmute") {
            Some(SystemOp::Unmute)
        } else if lower.contains("mute") {
            Some(SystemOp::Mute)
        } else if lower.contains("screenshot") || lower.contains("screen shot") {
            Some(SystemOp::Screenshot)
        } else {
            None
        }
    }
}

/// What a task asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskKind {
    Exit,
    General,
    Realtime,
    OpenTarget,
    CloseTarget,
    PlayMedia,
    SearchWeb(SearchEngine),
    GenerateImage,
    SystemControl(SystemOp),
    Unrecognized,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Exit => write!(f, "exit"),
            TaskKind::General => write!(f, "general"),
            TaskKind::Realtime => write!(f, "realtime"),
            TaskKind::OpenTarget => write!(f, "open"),
            TaskKind::CloseTarget => write!(f, "close"),
            TaskKind::PlayMedia => write!(f, "play"),
            TaskKind::SearchWeb(engine) => write!(f, "search:{engine}"),
            TaskKind::GenerateImage => write!(f, "generate_image"),
            TaskKind::SystemControl(op) => write!(f, "system:{op:?}"),
            TaskKind::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// One routable sub-intent of an utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub argument: String,
}

impl Task {
    pub fn new(kind: TaskKind, argument: impl Into<String>) -> Self {
        Self {
            kind,
            argument: argument.into(),
        }
    }

    /// The fallback task wrapping the whole utterance
    pub fn general(text: &str) -> Self {
        Self::new(TaskKind::General, text.trim())
    }

    /// Build a task from a retained fragment. `utterance` fills in empty
    /// conversational arguments.
    pub(crate) fn from_fragment(fragment: &str, utterance: &str) -> Option<Self> {
        let (prefix, rest) = split_prefix(fragment)?;
        let argument = clean_argument(rest);

        let kind = match prefix {
            "exit" => return Some(Self::new(TaskKind::Exit, "")),
            "general" | "realtime" => {
                let kind = if prefix == "general" {
                    TaskKind::General
                } else {
                    TaskKind::Realtime
                };
                let argument = if argument.is_empty() { utterance.trim() } else { argument };
                return Some(Self::new(kind, argument));
            }
            "system" => match SystemOp::parse(argument) {
                Some(op) => TaskKind::SystemControl(op),
                None => TaskKind::Unrecognized,
            },
            "open" => TaskKind::OpenTarget,
            "close" => TaskKind::CloseTarget,
            "play" => TaskKind::PlayMedia,
            "generate image" => TaskKind::GenerateImage,
            "google search" => TaskKind::SearchWeb(SearchEngine::Google),
            "youtube search" => TaskKind::SearchWeb(SearchEngine::YouTube),
            _ => TaskKind::Unrecognized,
        };

        // An action with nothing to act on has no handler
        let kind = if argument.is_empty() && !matches!(kind, TaskKind::SystemControl(_)) {
            TaskKind::Unrecognized
        } else {
            kind
        };

        Some(Self::new(kind, argument))
    }
}

/// Split a decision-model reply into trimmed fragments that start with a
/// known prefix, preserving order
pub(crate) fn retained_fragments(response: &str) -> Vec<&str> {
    response
        .split([',', '\n'])
        .map(str::trim)
        .filter(|f| split_prefix(f).is_some())
        .collect()
}

/// Whether a fragment still carries an unfilled template slot
pub(crate) fn has_placeholder(fragment: &str) -> bool {
    let lower = fragment.to_lowercase();
    PLACEHOLDERS.iter().any(|p| lower.contains(p))
}

/// Match the leading token(s) against the prefix table. The prefix must be
/// followed by the end of the fragment, whitespace, an opening parenthesis or
/// closing punctuation.
fn split_prefix(fragment: &str) -> Option<(&'static str, &str)> {
    PREFIXES.iter().find_map(|&prefix| {
        let head = fragment.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }

        let rest = &fragment[prefix.len()..];
        match rest.chars().next() {
            None => Some((prefix, rest)),
            Some(c) if c.is_whitespace() || matches!(c, '(' | '.' | '!' | '?') => {
                Some((prefix, rest))
            }
            Some(_) => None,
        }
    })
}

fn clean_argument(rest: &str) -> &str {
    let trimmed = rest.trim().trim_end_matches(['.', '!', '?']).trim();
    trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(trimmed)
}
