//! Locale-aware decoding of raw record tokens into typed values.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::types::{Field, FieldKind, Record, SessionLocale, Value};

/// Date the worker uses for time-only values.
const TIME_ONLY_DATE: (i32, u32, u32) = (1899, 12, 30);

/// Two-digit years below this are in the 2000s.
const TWO_DIGIT_YEAR_PIVOT: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePart {
    Day { width: usize },
    Month { width: usize },
    Year { width: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimePart {
    Hour { width: usize },
    Minute { width: usize },
    Second { width: usize },
}

/// A short-date pattern (`dd.MM.yyyy`) and a time pattern (`H:mm:ss`),
/// compiled once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeFormat {
    date: Option<(Vec<DatePart>, char)>,
    time: Vec<TimePart>,
    twelve_hour: bool,
}

impl DateTimeFormat {
    pub fn new(short_date: &str, time_format: &str) -> Self {
        let (time, twelve_hour) = compile_time(time_format);
        Self {
            date: compile_date(short_date),
            time,
            twelve_hour,
        }
    }

    /// Parse `"<date> <time>"`, a date alone (midnight) or a time alone.
    ///
    /// Returns `None` when the text does not match the patterns.
    pub fn parse(&self, text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        let (head, rest) = match text.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        if head.contains(':') {
            let (y, m, d) = TIME_ONLY_DATE;
            let date = NaiveDate::from_ymd_opt(y, m, d)?;
            return Some(date.and_time(self.parse_time(text)?));
        }

        let date = self.parse_date(head)?;
        let time = if rest.is_empty() {
            NaiveTime::MIN
        } else {
            self.parse_time(rest)?
        };
        Some(date.and_time(time))
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let (parts, separator) = self.date.as_ref()?;
        let tokens: Vec<&str> = text.split(*separator).collect();
        if tokens.len() != parts.len() {
            return None;
        }

        let (mut year, mut month, mut day) = (None, None, None);
        for (part, token) in parts.iter().zip(tokens) {
            if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            match part {
                DatePart::Day { .. } => day = token.parse::<u32>().ok(),
                DatePart::Month { .. } => month = token.parse::<u32>().ok(),
                DatePart::Year { .. } => {
                    let value = token.parse::<i32>().ok()?;
                    year = Some(if token.len() <= 2 {
                        expand_two_digit_year(value)
                    } else {
                        value
                    });
                }
            }
        }
        NaiveDate::from_ymd_opt(year?, month?, day?)
    }

    fn parse_time(&self, text: &str) -> Option<NaiveTime> {
        let digits_end = text
            .find(|c: char| !(c.is_ascii_digit() || c == ':'))
            .unwrap_or(text.len());
        let (clock, designator) = text.split_at(digits_end);
        let designator = designator.trim();

        let tokens: Vec<&str> = clock.split(':').collect();
        if tokens.len() < 2 || tokens.len() > 3 {
            return None;
        }

        let order: Vec<TimePart> = if self.time.is_empty() {
            vec![
                TimePart::Hour { width: 1 },
                TimePart::Minute { width: 2 },
                TimePart::Second { width: 2 },
            ]
        } else {
            self.time.clone()
        };
        if self.time.is_empty() {
            if tokens.len() < 2 {
                return None;
            }
        } else if tokens.len() != order.len() {
            return None;
        }

        let (mut hour, mut minute, mut second) = (0u32, 0u32, 0u32);
        for (part, token) in order.iter().zip(tokens) {
            let value = token.parse::<u32>().ok()?;
            match part {
                TimePart::Hour { .. } => hour = value,
                TimePart::Minute { .. } => minute = value,
                TimePart::Second { .. } => second = value,
            }
        }

        match designator.chars().next() {
            Some('P' | 'p') if hour < 12 => hour += 12,
            Some('A' | 'a') if hour == 12 => hour = 0,
            _ => {}
        }
        NaiveTime::from_hms_opt(hour, minute, second)
    }

    /// Render a datetime the way the worker would.
    ///
    /// Falls back to ISO form when the date pattern is unsupported.
    pub fn format(&self, value: &NaiveDateTime) -> String {
        let Some((parts, separator)) = &self.date else {
            return value.format("%Y-%m-%d %H:%M:%S").to_string();
        };

        let date = parts
            .iter()
            .map(|part| match *part {
                DatePart::Day { width } => pad(value.day() as i64, width),
                DatePart::Month { width } => pad(value.month() as i64, width),
                DatePart::Year { width } if width <= 2 => {
                    pad(value.year().rem_euclid(100) as i64, 2)
                }
                DatePart::Year { width } => pad(value.year() as i64, width),
            })
            .collect::<Vec<_>>()
            .join(&separator.to_string());

        let order = if self.time.is_empty() {
            vec![
                TimePart::Hour { width: 1 },
                TimePart::Minute { width: 2 },
                TimePart::Second { width: 2 },
            ]
        } else {
            self.time.clone()
        };
        let hour = if self.twelve_hour {
            match value.hour() % 12 {
                0 => 12,
                h => h,
            }
        } else {
            value.hour()
        };
        let mut time = order
            .iter()
            .map(|part| match *part {
                TimePart::Hour { width } => pad(hour as i64, width),
                TimePart::Minute { width } => pad(value.minute() as i64, width),
                TimePart::Second { width } => pad(value.second() as i64, width),
            })
            .collect::<Vec<_>>()
            .join(":");
        if self.twelve_hour {
            time.push_str(if value.hour() < 12 { " AM" } else { " PM" });
        }

        format!("{date} {time}")
    }
}

fn pad(value: i64, width: usize) -> String {
    format!("{value:0width$}")
}

fn expand_two_digit_year(value: i32) -> i32 {
    if value < TWO_DIGIT_YEAR_PIVOT {
        2000 + value
    } else {
        1900 + value
    }
}

/// Split a pattern into runs of identical characters.
fn runs(pattern: &str) -> Vec<(char, usize)> {
    let mut out: Vec<(char, usize)> = Vec::new();
    for c in pattern.chars() {
        match out.last_mut() {
            Some((last, count)) if *last == c => *count += 1,
            _ => out.push((c, 1)),
        }
    }
    out
}

fn compile_date(pattern: &str) -> Option<(Vec<DatePart>, char)> {
    let mut parts = Vec::new();
    let mut separator = None;

    for (c, count) in runs(pattern) {
        match c {
            'd' if count <= 2 => parts.push(DatePart::Day { width: count }),
            'M' if count <= 2 => parts.push(DatePart::Month { width: count }),
            'y' => parts.push(DatePart::Year { width: count }),
            '-' | '.' | '/' if count == 1 => match separator {
                None => separator = Some(c),
                Some(s) if s == c => {}
                Some(_) => return None,
            },
            // Day/month names, quoted literals and exotic separators.
            _ => return None,
        }
    }

    if parts.len() != 3 {
        return None;
    }
    Some((parts, separator?))
}

fn compile_time(pattern: &str) -> (Vec<TimePart>, bool) {
    let mut parts = Vec::new();
    let mut twelve_hour = false;

    for (c, count) in runs(pattern) {
        match c {
            'H' => parts.push(TimePart::Hour { width: count }),
            'h' => {
                twelve_hour = true;
                parts.push(TimePart::Hour { width: count });
            }
            'm' => parts.push(TimePart::Minute { width: count }),
            's' => parts.push(TimePart::Second { width: count }),
            _ => {}
        }
    }
    (parts, twelve_hour)
}

/// Decodes raw tokens into values using one connection's session locale.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    decimal_separator: String,
    datetime: DateTimeFormat,
}

impl ValueCodec {
    pub fn new(locale: &SessionLocale) -> Self {
        Self {
            decimal_separator: locale.decimal_separator.clone(),
            datetime: DateTimeFormat::new(&locale.short_date_format, &locale.time_format),
        }
    }

    fn normalize_number(&self, raw: &str) -> String {
        let raw = raw.trim();
        if self.decimal_separator.is_empty() || self.decimal_separator == "." {
            raw.to_string()
        } else {
            raw.replace(self.decimal_separator.as_str(), ".")
        }
    }

    pub fn decode(&self, kind: FieldKind, raw: &str) -> Value {
        if raw.is_empty() {
            return match kind {
                FieldKind::Text => Value::Text(String::new()),
                _ => Value::Null,
            };
        }

        match kind {
            FieldKind::Text => Value::Text(raw.to_string()),
            FieldKind::Integer => {
                let text = raw.trim();
                match text.parse::<i64>() {
                    Ok(v) => Value::Int(v),
                    Err(_) if is_decimal_literal(text) => Value::Decimal(text.to_string()),
                    Err(_) => Value::Text(raw.to_string()),
                }
            }
            FieldKind::Float => match self.normalize_number(raw).parse::<f64>() {
                Ok(v) => Value::Float(v),
                Err(_) => Value::Text(raw.to_string()),
            },
            FieldKind::Decimal => {
                let text = self.normalize_number(raw);
                if is_decimal_literal(&text) {
                    Value::Decimal(text)
                } else {
                    Value::Text(raw.to_string())
                }
            }
            FieldKind::Boolean => decode_bool(raw).map_or_else(|| Value::Text(raw.to_string()), Value::Bool),
            FieldKind::DateTime => self
                .datetime
                .parse(raw)
                .map_or_else(|| Value::Text(raw.to_string()), Value::DateTime),
        }
    }

    /// Inverse of [`decode`](Self::decode): render a value as the worker would.
    pub fn encode(&self, value: &Value) -> String {
        let with_separator = |s: String| {
            if self.decimal_separator.is_empty() || self.decimal_separator == "." {
                s
            } else {
                s.replace('.', &self.decimal_separator)
            }
        };

        match value {
            Value::Null => String::new(),
            Value::Bool(true) => "-1".to_string(),
            Value::Bool(false) => "0".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => with_separator(v.to_string()),
            Value::Decimal(v) => with_separator(v.clone()),
            Value::Text(v) => v.clone(),
            Value::DateTime(v) => self.datetime.format(v),
        }
    }
}

fn decode_bool(raw: &str) -> Option<bool> {
    let text = raw.trim();
    if text.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    text.parse::<i64>().ok().map(|v| v != 0)
}

fn is_decimal_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let mut seen_point = false;
    let mut seen_digit = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_point => seen_point = true,
            _ => return false,
        }
    }
    seen_digit
}

/// Split a `RECORDS` payload into records.
///
/// The payload is a flat tab-separated token list with a trailing separator.
/// Returns an error message when the token count is not a multiple of the
/// field count.
pub fn decode_records(
    payload: &str,
    fields: &Arc<[Field]>,
    codec: &ValueCodec,
) -> Result<Vec<Record>, String> {
    let mut tokens: Vec<&str> = payload.split('\t').collect();
    if tokens.last() == Some(&"") {
        tokens.pop();
    }

    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    if fields.is_empty() {
        return Err(format!("{} values received with no fields", tokens.len()));
    }
    if tokens.len() % fields.len() != 0 {
        return Err(format!(
            "{} values is not a multiple of {} fields",
            tokens.len(),
            fields.len()
        ));
    }

    let kinds: Vec<FieldKind> = fields.iter().map(Field::kind).collect();
    let records = tokens
        .chunks(fields.len())
        .map(|row| {
            let values = row
                .iter()
                .zip(&kinds)
                .map(|(raw, kind)| codec.decode(*kind, raw))
                .collect();
            Record::new(Arc::clone(fields), values)
        })
        .collect();
    Ok(records)
}
