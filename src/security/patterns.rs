//! Attack signature tables for rule-based detection.
//!
//! Two tables with different consequences:
//! - [`VALIDATION_PATTERNS`] are matched against the request line and reject
//!   the request on a hit.
//! - [`MONITORING_PATTERNS`] are matched against the serialized request and
//!   only produce an advisory alert.
//!
//! NoSQL operator tokens (`$where`, `$ne`, ...) have their own regex since
//! the sanitizer needs to replace them, not just classify.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// An attack signature.
#[derive(Debug, Clone)]
pub struct AttackPattern {
    /// Pattern name
    pub name: &'static str,
    /// Regex pattern
    pub pattern: &'static str,
    /// Attack category
    pub category: PatternCategory,
    /// Description
    pub description: &'static str,
}

/// Attack categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternCategory {
    /// `../` style path traversal
    Traversal,
    /// Script or HTML injection
    Xss,
    /// SQL union/select injection
    Sql,
    /// NoSQL operator injection
    NoSql,
    /// Code or command evaluation
    CodeEval,
    /// `javascript:` and friends
    ProtocolHandler,
    /// Inline base64 data URIs
    DataUri,
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternCategory::Traversal => write!(f, "traversal"),
            PatternCategory::Xss => write!(f, "xss"),
            PatternCategory::Sql => write!(f, "sql"),
            PatternCategory::NoSql => write!(f, "nosql"),
            PatternCategory::CodeEval => write!(f, "code_eval"),
            PatternCategory::ProtocolHandler => write!(f, "protocol_handler"),
            PatternCategory::DataUri => write!(f, "data_uri"),
        }
    }
}

/// Reserved prefix of NoSQL query operators.
pub const OPERATOR_PREFIX: char = '$';

/// Operators recognized inside string values.
pub const NOSQL_OPERATORS: &[&str] = &[
    "ne", "gt", "gte", "lt", "lte", "in", "nin", "and", "or", "not", "nor", "exists", "type",
    "mod", "regex", "text", "where", "expr", "jsonSchema", "all", "elemMatch", "size", "slice",
    "meta", "comment",
];

/// Signatures that reject a request when found in its URL.
pub static VALIDATION_PATTERNS: &[AttackPattern] = &[
    AttackPattern {
        name: "path_traversal",
        pattern: r"\.\.[/\\]",
        category: PatternCategory::Traversal,
        description: "Directory traversal",
    },
    AttackPattern {
        name: "script_tag",
        pattern: r"(?i)<script",
        category: PatternCategory::Xss,
        description: "Script tag injection",
    },
    AttackPattern {
        name: "union_select",
        pattern: r"(?i)union.*select",
        category: PatternCategory::Sql,
        description: "SQL union injection",
    },
    AttackPattern {
        name: "javascript_uri",
        pattern: r"(?i)javascript:",
        category: PatternCategory::ProtocolHandler,
        description: "JavaScript protocol handler",
    },
    AttackPattern {
        name: "vbscript_uri",
        pattern: r"(?i)vbscript:",
        category: PatternCategory::ProtocolHandler,
        description: "VBScript protocol handler",
    },
    AttackPattern {
        name: "onload_handler",
        pattern: r"(?i)onload=",
        category: PatternCategory::Xss,
        description: "Event handler injection",
    },
    AttackPattern {
        name: "eval_call",
        pattern: r"(?i)eval\(",
        category: PatternCategory::CodeEval,
        description: "Code evaluation",
    },
    AttackPattern {
        name: "exec_call",
        pattern: r"(?i)exec\(",
        category: PatternCategory::CodeEval,
        description: "Command execution",
    },
    AttackPattern {
        name: "system_call",
        pattern: r"(?i)system\(",
        category: PatternCategory::CodeEval,
        description: "System command execution",
    },
];

/// Signatures that are logged but never block.
pub static MONITORING_PATTERNS: &[AttackPattern] = &[
    AttackPattern {
        name: "path_traversal",
        pattern: r"\.\./",
        category: PatternCategory::Traversal,
        description: "Directory traversal",
    },
    AttackPattern {
        name: "script_tag",
        pattern: r"(?i)<script",
        category: PatternCategory::Xss,
        description: "XSS attempt",
    },
    AttackPattern {
        name: "union_select",
        pattern: r"(?i)union.*select",
        category: PatternCategory::Sql,
        description: "SQL injection",
    },
    AttackPattern {
        name: "where_operator",
        pattern: r"(?i)\$where",
        category: PatternCategory::NoSql,
        description: "NoSQL injection",
    },
    AttackPattern {
        name: "eval_call",
        pattern: r"(?i)eval\(",
        category: PatternCategory::CodeEval,
        description: "Code injection",
    },
    AttackPattern {
        name: "javascript_uri",
        pattern: r"(?i)javascript:",
        category: PatternCategory::ProtocolHandler,
        description: "JavaScript injection",
    },
    AttackPattern {
        name: "base64_data_uri",
        pattern: r"(?i)data:.*base64",
        category: PatternCategory::DataUri,
        description: "Base64 data URI",
    },
];

fn compile(patterns: &'static [AttackPattern]) -> Vec<(Regex, &'static AttackPattern)> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p.pattern).ok().map(|r| (r, p)))
        .collect()
}

fn operator_regex() -> Option<Regex> {
    // Longest first so `$gte` is not consumed as `$gt` + `e`.
    let mut operators = NOSQL_OPERATORS.to_vec();
    operators.sort_by_key(|op| std::cmp::Reverse(op.len()));
    let alternation = operators
        .iter()
        .map(|op| regex::escape(op))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\$(?:{alternation})")).ok()
}

lazy_static! {
    /// Compiled validation patterns
    pub static ref VALIDATION_REGEX: Vec<(Regex, &'static AttackPattern)> =
        compile(VALIDATION_PATTERNS);

    /// Compiled monitoring patterns
    pub static ref MONITORING_REGEX: Vec<(Regex, &'static AttackPattern)> =
        compile(MONITORING_PATTERNS);

    /// NoSQL operator tokens
    pub static ref NOSQL_OPERATOR_REGEX: Option<Regex> = operator_regex();
}

/// A pattern hit with the text it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub name: &'static str,
    pub category: PatternCategory,
    pub matched: String,
}

fn to_match(regex: &Regex, pattern: &'static AttackPattern, content: &str) -> Option<PatternMatch> {
    regex.find(content).map(|m| PatternMatch {
        name: pattern.name,
        category: pattern.category,
        matched: m.as_str().to_string(),
    })
}

/// First hit in table order.
pub fn first_match(
    table: &[(Regex, &'static AttackPattern)],
    content: &str,
) -> Option<PatternMatch> {
    table
        .iter()
        .find_map(|(regex, pattern)| to_match(regex, pattern, content))
}

/// Every pattern in the table that matches, in table order.
pub fn find_all(table: &[(Regex, &'static AttackPattern)], content: &str) -> Vec<PatternMatch> {
    table
        .iter()
        .filter_map(|(regex, pattern)| to_match(regex, pattern, content))
        .collect()
}

/// Whether the string contains a NoSQL operator token.
pub fn contains_operator(content: &str) -> bool {
    NOSQL_OPERATOR_REGEX
        .as_ref()
        .is_some_and(|regex| regex.is_match(content))
}

/// Walk a JSON value and return the first hit in any string leaf or object
/// key. Numbers, booleans and null never match.
pub fn scan_value(table: &[(Regex, &'static AttackPattern)], value: &Value) -> Option<PatternMatch> {
    match value {
        Value::String(s) => first_match(table, s),
        Value::Array(items) => items.iter().find_map(|item| scan_value(table, item)),
        Value::Object(map) => map.iter().find_map(|(key, item)| {
            first_match(table, key).or_else(|| scan_value(table, item))
        }),
        _ => None,
    }
}
