//! Request input sanitization.
//!
//! Produces a cleaned copy of body, query and path parameters:
//! - object keys starting with `$` are dropped at every depth
//! - string leaves lose all markup, then have NoSQL operator tokens replaced
//!   with [`REDACTION_MARKER`]
//! - arrays keep their order and length
//!
//! Markup is removed before operator redaction so that stripping a tag can
//! never splice a fresh operator token together (`$<b>where`).
//!
//! If the walk fails the original payload is passed through unchanged and an
//! alert is recorded: a request is never dropped because sanitization broke.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::observability::events::{ClientContext, EventType, SecurityEventLog};
use crate::security::patterns::{NOSQL_OPERATOR_REGEX, OPERATOR_PREFIX};

/// Replaces every NoSQL operator token found in a string value.
pub const REDACTION_MARKER: &str = "_BLOCKED_";

/// Deepest nesting the walker accepts.
pub const MAX_DEPTH: usize = 128;

lazy_static! {
    static ref SCRIPT_BLOCK: Option<Regex> =
        Regex::new(r"(?is)<\s*(script|style)\b[^>]*>.*?<\s*/\s*(script|style)\s*>").ok();
    static ref MARKUP_TAG: Option<Regex> = Regex::new(r"(?s)<\s*[/!?]?\s*[a-zA-Z][^>]*>|<!--.*?-->").ok();
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("payload nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("sanitizer pattern failed to compile")]
    PatternUnavailable,
}

/// What a sanitization pass changed, by location path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub dropped_keys: Vec<String>,
    pub redacted: Vec<String>,
}

/// Cleaned request input handed to the business handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SanitizedInput {
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub params: BTreeMap<String, String>,
}

impl SanitizedInput {
    /// First query value for `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Strip markup and redact operators in one string. The flag reports whether
/// an operator token was replaced.
pub fn sanitize_str(input: &str) -> Result<(String, bool), SanitizeError> {
    let (Some(script), Some(tag), Some(operator)) = (
        SCRIPT_BLOCK.as_ref(),
        MARKUP_TAG.as_ref(),
        NOSQL_OPERATOR_REGEX.as_ref(),
    ) else {
        return Err(SanitizeError::PatternUnavailable);
    };

    if !input.contains('<') && !input.contains('>') && !input.contains(OPERATOR_PREFIX) {
        return Ok((input.to_string(), false));
    }

    let without_scripts = script.replace_all(input, "");
    let without_tags = tag.replace_all(&without_scripts, "");
    let escaped = without_tags.replace('<', "&lt;").replace('>', "&gt;");

    let redacted = operator.is_match(&escaped);
    let cleaned = if redacted {
        operator.replace_all(&escaped, REDACTION_MARKER).into_owned()
    } else {
        escaped
    };
    Ok((cleaned, redacted))
}

/// Sanitize a JSON value without side effects.
pub fn try_sanitize(value: &Value, root: &str) -> Result<(Value, SanitizeReport), SanitizeError> {
    let mut report = SanitizeReport::default();
    let cleaned = walk(value, root, 0, &mut report)?;
    Ok((cleaned, report))
}

fn walk(
    value: &Value,
    path: &str,
    depth: usize,
    report: &mut SanitizeReport,
) -> Result<Value, SanitizeError> {
    if depth > MAX_DEPTH {
        return Err(SanitizeError::TooDeep(MAX_DEPTH));
    }
    match value {
        Value::String(s) => {
            let (cleaned, redacted) = sanitize_str(s)?;
            if redacted {
                report.redacted.push(path.to_string());
            }
            Ok(Value::String(cleaned))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| walk(item, &format!("{path}[{i}]"), depth + 1, report))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut cleaned = Map::with_capacity(map.len());
            for (key, item) in map {
                let child = format!("{path}.{key}");
                if key.starts_with(OPERATOR_PREFIX) {
                    report.dropped_keys.push(child);
                    continue;
                }
                cleaned.insert(key.clone(), walk(item, &child, depth + 1, report)?);
            }
            Ok(Value::Object(cleaned))
        }
        other => Ok(other.clone()),
    }
}

/// Query keys carrying an operator, either bare (`$ne`) or in bracket
/// notation (`price[$gt]`).
fn is_operator_key(key: &str) -> bool {
    key.starts_with(OPERATOR_PREFIX) || key.contains("[$")
}

/// Sanitizer that reports what it changed to the event log.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    events: Arc<SecurityEventLog>,
}

impl Sanitizer {
    pub fn new(events: Arc<SecurityEventLog>) -> Self {
        Self { events }
    }

    /// Sanitize every part of a request.
    pub fn sanitize(
        &self,
        body: Option<&Value>,
        query: &[(String, String)],
        params: &BTreeMap<String, String>,
        client: &ClientContext,
    ) -> SanitizedInput {
        SanitizedInput {
            body: body.map(|value| self.sanitize_value(value, "body", client)),
            query: self.sanitize_query(query, client),
            params: self.sanitize_params(params, client),
        }
    }

    /// Sanitize a structured value, falling back to the original on failure.
    pub fn sanitize_value(&self, value: &Value, location: &str, client: &ClientContext) -> Value {
        match try_sanitize(value, location) {
            Ok((cleaned, report)) => {
                self.report(location, &report, client);
                cleaned
            }
            Err(e) => {
                self.events.alert(
                    EventType::SanitizationFailure,
                    json!({ "location": location, "error": e.to_string() }),
                    client,
                );
                value.clone()
            }
        }
    }

    /// Drop operator keys, then sanitize the remaining values.
    pub fn sanitize_query(
        &self,
        query: &[(String, String)],
        client: &ClientContext,
    ) -> Vec<(String, String)> {
        let mut report = SanitizeReport::default();
        let mut cleaned = Vec::with_capacity(query.len());

        for (key, value) in query {
            let path = format!("query.{key}");
            if is_operator_key(key) {
                report.dropped_keys.push(path);
                continue;
            }
            match sanitize_str(value) {
                Ok((value, redacted)) => {
                    if redacted {
                        report.redacted.push(path);
                    }
                    cleaned.push((key.clone(), value));
                }
                Err(e) => {
                    self.events.alert(
                        EventType::SanitizationFailure,
                        json!({ "location": path, "error": e.to_string() }),
                        client,
                    );
                    cleaned.push((key.clone(), value.clone()));
                }
            }
        }

        self.report("query", &report, client);
        cleaned
    }

    pub fn sanitize_params(
        &self,
        params: &BTreeMap<String, String>,
        client: &ClientContext,
    ) -> BTreeMap<String, String> {
        let mut report = SanitizeReport::default();
        let cleaned = params
            .iter()
            .map(|(key, value)| {
                let cleaned = match sanitize_str(value) {
                    Ok((cleaned, redacted)) => {
                        if redacted {
                            report.redacted.push(format!("params.{key}"));
                        }
                        cleaned
                    }
                    Err(_) => value.clone(),
                };
                (key.clone(), cleaned)
            })
            .collect();
        self.report("params", &report, client);
        cleaned
    }

    fn report(&self, location: &str, report: &SanitizeReport, client: &ClientContext) {
        if !report.dropped_keys.is_empty() {
            self.events.alert(
                EventType::OperatorKeyDropped,
                json!({ "location": location, "keys": report.dropped_keys }),
                client,
            );
        }
        if !report.redacted.is_empty() {
            self.events.threat(
                EventType::OperatorRedacted,
                json!({ "location": location, "fields": report.redacted }),
                client,
            );
        }
    }
}
