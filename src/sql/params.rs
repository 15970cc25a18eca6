use std::sync::LazyLock;

use chrono::{Datelike, NaiveDateTime, Timelike};
use regex::{Captures, Regex};

use crate::protocol::{Params, Value};

/// Literals and bracketed identifiers are matched whole and left alone.
static PARAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|\[[^\]]*\]|:(\w+)"#).unwrap()
});

/// Substitute `:name` tokens with literals from `params`.
///
/// Unbound names are left as they are.
pub fn format(sql: &str, params: &Params) -> String {
    PARAM_PATTERN
        .replace_all(sql, |caps: &Captures| {
            let Some(name) = caps.get(1) else {
                return caps[0].to_string();
            };
            match params.get(name.as_str()) {
                Some(value) => {
                    let literal = literal(value);
                    tracing::trace!(param = name.as_str(), %literal, "substituted parameter");
                    literal
                }
                None => {
                    tracing::debug!(param = name.as_str(), "unbound parameter left in sql");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Render a value as a SQL literal for the worker's engine.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Float(v) if v.is_nan() => "NULL".to_string(),
        Value::Float(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::Bool(v) => v.to_string(),
        Value::DateTime(v) => date_literal(v),
        Value::Text(v) => quote(v),
    }
}

fn date_literal(v: &NaiveDateTime) -> String {
    format!(
        "#{}-{}-{} {}:{}:{}#",
        v.year(),
        v.month(),
        v.day(),
        v.hour(),
        v.minute(),
        v.second()
    )
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
