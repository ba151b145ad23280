//! Post-processing of validated text and lenient JSON recovery
//!
//! A post-processor turns validated text into a typed value. Returning
//! `Ok(None)` or an error marks the attempt as failed, which the
//! orchestrator treats like any other retryable failure.
//!
//! JSON recovery strips Markdown fences first and uses that as the base
//! text. Each later repair starts again from the base, never from the output
//! of a previous repair, and the first one that parses wins.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```")
        .expect("fence pattern is valid")
});

static KEY_COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([{,]\s*)"([A-Za-z_][A-Za-z0-9_]*): ""#).expect("key pattern is valid")
});

static OUTER_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("object pattern is valid"));

static OUTER_ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("array pattern is valid"));

/// Converts validated text into a typed value for the caller
pub trait PostProcessor<T>: Send + Sync {
    /// `Ok(None)` means "no usable value"; both it and `Err` trigger a retry
    fn process(&self, text: &str, model: &str) -> anyhow::Result<Option<T>>;
}

impl<T, F> PostProcessor<T> for F
where
    F: Fn(&str, &str) -> anyhow::Result<Option<T>> + Send + Sync,
{
    fn process(&self, text: &str, model: &str) -> anyhow::Result<Option<T>> {
        self(text, model)
    }
}

/// Lenient JSON parse into an untyped value
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPostProcessor;

impl PostProcessor<Value> for JsonPostProcessor {
    fn process(&self, text: &str, model: &str) -> anyhow::Result<Option<Value>> {
        let value = parse_json_lenient(text);
        if value.is_none() {
            debug!("No parseable JSON in {} chars from {}", text.len(), model);
        }
        Ok(value)
    }
}

/// Lenient JSON parse followed by deserialization into `T`
pub struct JsonAs<T>(PhantomData<fn() -> T>);

impl<T> std::fmt::Debug for JsonAs<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(std::any::type_name::<Self>())
    }
}

impl<T: DeserializeOwned> PostProcessor<T> for JsonAs<T> {
    fn process(&self, text: &str, model: &str) -> anyhow::Result<Option<T>> {
        let Some(value) = parse_json_lenient(text) else {
            debug!("No parseable JSON in {} chars from {}", text.len(), model);
            return Ok(None);
        };
        let typed = serde_json::from_value(value)
            .with_context(|| format!("JSON from {} did not match the expected shape", model))?;
        Ok(Some(typed))
    }
}

/// Post-processor that parses JSON and deserializes it into `T`
pub fn json_as<T: DeserializeOwned>() -> JsonAs<T> {
    JsonAs(PhantomData)
}

type Repair = for<'a> fn(&'a str) -> Option<Cow<'a, str>>;

const REPAIRS: [(&str, Repair); 6] = [
    ("control_escape", |s| Some(Cow::Owned(escape_control_chars(s)))),
    ("key_colon", |s| Some(Cow::Owned(repair_key_colons(s)))),
    ("trailing_comma", |s| Some(Cow::Owned(strip_trailing_commas(s)))),
    ("brace_balance", |s| Some(Cow::Owned(balance_braces(s)))),
    ("outer_object", |s| extract_outer_object(s).map(Cow::Borrowed)),
    ("outer_array", |s| extract_outer_array(s).map(Cow::Borrowed)),
];

/// Parse JSON out of model output, repairing common defects
///
/// Order: direct parse, fence strip, control-character escaping, missing
/// key quote, trailing commas, unbalanced braces, outermost-object
/// extraction, outermost-array extraction. Returns `None` when nothing
/// parses.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let base = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str(base) {
        debug!("JSON recovered by fence_strip");
        return Some(value);
    }

    for (name, repair) in REPAIRS {
        let Some(candidate) = repair(base) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str(&candidate) {
            debug!("JSON recovered by {}", name);
            return Some(value);
        }
    }
    None
}

/// Contents of the first fenced block, or the trimmed input when unfenced
pub fn strip_code_fences(text: &str) -> &str {
    if let Some(inner) = FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    let trimmed = text.trim();
    // Opening fence with no closing one: output was cut off
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split_once('\n').map_or("", |(_, body)| body).trim();
    }
    trimmed
}

/// Escape raw control characters inside JSON string literals
///
/// Whitespace between tokens is left alone; only characters inside quotes
/// are rewritten.
pub fn escape_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            if !c.is_control() {
                out.push(c);
                continue;
            }
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// `{"title: "x"}` → `{"title": "x"}`
pub fn repair_key_colons(text: &str) -> String {
    KEY_COLON_RE.replace_all(text, r#"${1}"${2}": ""#).into_owned()
}

/// Drop commas directly before `}` or `]`, outside string literals
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    continue;
                }
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

/// Append closing braces for any left open outside string literals
pub fn balance_braces(text: &str) -> String {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if depth > 0 {
        out.push_str(&"}".repeat(depth as usize));
    }
    out
}

/// Slice from the first `{` to the last `}`
pub fn extract_outer_object(text: &str) -> Option<&str> {
    OUTER_OBJECT_RE.find(text).map(|m| m.as_str())
}

/// Slice from the first `[` to the last `]`
pub fn extract_outer_array(text: &str) -> Option<&str> {
    OUTER_ARRAY_RE.find(text).map(|m| m.as_str())
}
