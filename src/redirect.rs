use regex::Regex;
use std::sync::OnceLock;

/// Output-capture mode for a single command invocation. Exactly one mode is
/// active per invocation; `None` means the handler writes straight to the
/// live transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectMode {
    None,
    File(String),
    ClipboardText,
    ClipboardJson,
    ClipboardCsv,
}

fn file_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*>\s*([\w.-]+)$").expect("redirect regex"))
}

fn pipe_rule(word: &str) -> Regex {
    Regex::new(&format!(r"(?i)^(.+?)\s*\|\s*{}$", word)).expect("pipe regex")
}

fn clipboard_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| pipe_rule("clipboard"))
}

fn json_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| pipe_rule("json"))
}

fn csv_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| pipe_rule("csv"))
}

/// Classify a trimmed input line into the base command and its capture mode.
/// The rules are tested in a fixed priority order and the first match wins:
/// `> filename`, then `| clipboard`, `| json`, `| csv`.
pub fn parse(trimmed: &str) -> (String, RedirectMode) {
    type Rule = (fn() -> &'static Regex, fn(&regex::Captures) -> RedirectMode);
    const RULES: &[Rule] = &[
        (file_rule, |caps| RedirectMode::File(caps[2].to_string())),
        (clipboard_rule, |_| RedirectMode::ClipboardText),
        (json_rule, |_| RedirectMode::ClipboardJson),
        (csv_rule, |_| RedirectMode::ClipboardCsv),
    ];

    for (rule, build) in RULES {
        if let Some(caps) = rule().captures(trimmed) {
            return (caps[1].trim().to_string(), build(&caps));
        }
    }
    (trimmed.to_string(), RedirectMode::None)
}
