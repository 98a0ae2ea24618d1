//! Cleanup applied to oracle responses before they are parsed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)\n?\s*```").expect("valid fence regex")
});

/// Map typographic Unicode punctuation to plain ASCII.
pub fn sanitise_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{201A}' => out.push(','),
            '\u{201E}' | '\u{00AB}' | '\u{00BB}' | '\u{201C}' | '\u{201D}' | '\u{2033}' => {
                out.push('"')
            }
            '\u{2039}' => out.push('<'),
            '\u{203A}' => out.push('>'),
            '\u{2010}' | '\u{2013}' => out.push('-'),
            '\u{2014}' => out.push_str("--"),
            '\u{2044}' => out.push('/'),
            '\u{2018}' | '\u{2019}' | '\u{2032}' | '\u{2034}' => out.push('\''),
            '\u{2057}' => out.push('?'),
            '\u{2053}' => out.push('~'),
            '\u{2026}' => out.push_str("..."),
            other => out.push(other),
        }
    }
    out
}

/// Strip a Markdown code fence around a JSON payload, if there is one.
/// Otherwise the text between the first `{` and the last `}` is returned.
pub fn unwrap_json(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    if let Some(inner) = JSON_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Unwrap and sanitise a raw oracle response.
///
/// A payload that already parses is sanitised value by value, so quotes
/// inside strings come out escaped. Only a payload that does not parse is
/// sanitised as raw text, which repairs typographic quotes used as JSON
/// delimiters.
pub fn clean_response(raw: &str) -> String {
    match serde_json::from_str::<Value>(unwrap_json(raw)) {
        Ok(mut value) => {
            sanitise_value(&mut value);
            value.to_string()
        }
        Err(_) => unwrap_json(&sanitise_text(raw)).to_string(),
    }
}

fn sanitise_value(value: &mut Value) {
    match value {
        Value::String(text) => *text = sanitise_text(text),
        Value::Array(items) => items.iter_mut().for_each(sanitise_value),
        Value::Object(map) => {
            *map = std::mem::take(map)
                .into_iter()
                .map(|(key, mut item)| {
                    sanitise_value(&mut item);
                    (sanitise_text(&key), item)
                })
                .collect();
        }
        _ => {}
    }
}
