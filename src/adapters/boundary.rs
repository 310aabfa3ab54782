//! Boundary scanning: detect payloads that ask an adapter to think.
//!
//! Adapters carry out literal instructions. A payload that references lead
//! state, embeds conditions, or describes routing is a sign that decision
//! logic leaked downstream, and the command is refused.
//!
//! The shipped [`KeywordBoundaryScanner`] is a best-effort heuristic over
//! object keys and string values. It will miss cleverly encoded logic and
//! can flag unusual but innocent text; swap in another [`BoundaryScanner`]
//! where that matters.

use std::fmt;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Kind of overreach a finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundaryCategory {
    /// Reading or referencing lead/deal state.
    StateReading,
    /// Conditional logic (`if`/`then`, rules).
    Conditional,
    /// Choosing between alternative next steps.
    Branching,
}

impl fmt::Display for BoundaryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StateReading => "state reading",
            Self::Conditional => "conditional logic",
            Self::Branching => "branching",
        })
    }
}

/// One suspicious location in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryFinding {
    /// Kind of overreach.
    pub category: BoundaryCategory,
    /// JSON path of the offending key or value (`$.options.branch`).
    pub path: String,
    /// The key or text fragment that matched.
    pub matched: String,
}

/// Every finding for one payload. Empty means clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoundaryReport {
    /// Findings in traversal order.
    pub findings: Vec<BoundaryFinding>,
}

impl BoundaryReport {
    /// Whether nothing was found.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Whether any finding has `category`.
    pub fn has(&self, category: BoundaryCategory) -> bool {
        self.findings.iter().any(|f| f.category == category)
    }
}

impl fmt::Display for BoundaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .findings
            .iter()
            .map(|finding| format!("{} at {} ({:?})", finding.category, finding.path, finding.matched))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Pluggable payload scanner.
pub trait BoundaryScanner: Send + Sync {
    /// Scan a command payload.
    fn scan(&self, payload: &Value) -> BoundaryReport;
}

/// Key vocabularies are matched after [`normalize_key`].
const STATE_KEYS: &[&str] = &[
    "state",
    "status",
    "stage",
    "current_state",
    "lead_state",
    "deal_state",
    "current_status",
    "lead_status",
    "deal_status",
    "current_stage",
    "lead_stage",
    "deal_stage",
    "pipeline_stage",
    "read_state",
    "get_status",
    "previous_stage",
];

const CONDITIONAL_KEYS: &[&str] = &["condition", "conditions", "if", "then", "else", "when", "rules"];

const BRANCHING_KEYS: &[&str] = &[
    "branch",
    "branches",
    "route",
    "routing",
    "next_step",
    "on_success",
    "on_failure",
];

/// Keyword and pattern heuristic.
#[derive(Debug, Clone)]
pub struct KeywordBoundaryScanner {
    text_patterns: Vec<(BoundaryCategory, Regex)>,
}

impl Default for KeywordBoundaryScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordBoundaryScanner {
    /// Scanner with the standard vocabulary.
    pub fn new() -> Self {
        let patterns = [
            (
                BoundaryCategory::StateReading,
                r"(?i)\{\{\s*(lead|deal|contact|opportunity)\.(state|status|stage)\s*\}\}",
            ),
            (
                BoundaryCategory::StateReading,
                r"(?i)\b(check|read|get|lookup)\s+(the\s+)?(lead|deal)\s+(state|status|stage)\b",
            ),
            (
                BoundaryCategory::Conditional,
                r"(?i)\{[{%]\s*#?if\b",
            ),
            (
                BoundaryCategory::Conditional,
                r"(?i)\bif\s+(the\s+)?(lead|deal|contact|status|state|stage)\b[^.!?]{0,80}\bthen\b",
            ),
            (BoundaryCategory::Branching, r"(?i)\bbranch\s+(on|to)\b"),
            (BoundaryCategory::Branching, r"(?i)\broute\s+(it\s+|them\s+)?to\b"),
        ];
        let text_patterns = patterns
            .iter()
            .filter_map(|(category, pattern)| Regex::new(pattern).ok().map(|re| (*category, re)))
            .collect();
        Self { text_patterns }
    }

    fn classify_key(key: &str) -> Option<BoundaryCategory> {
        let normalized = normalize_key(key);
        if STATE_KEYS.contains(&normalized.as_str()) {
            Some(BoundaryCategory::StateReading)
        } else if CONDITIONAL_KEYS.contains(&normalized.as_str()) {
            Some(BoundaryCategory::Conditional)
        } else if BRANCHING_KEYS.contains(&normalized.as_str()) {
            Some(BoundaryCategory::Branching)
        } else {
            None
        }
    }

    fn walk(&self, value: &Value, path: &str, findings: &mut Vec<BoundaryFinding>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = format!("{path}.{key}");
                    if let Some(category) = Self::classify_key(key) {
                        findings.push(BoundaryFinding {
                            category,
                            path: child_path.clone(),
                            matched: key.clone(),
                        });
                    }
                    self.walk(child, &child_path, findings);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    self.walk(child, &format!("{path}[{index}]"), findings);
                }
            }
            Value::String(text) => {
                for (category, pattern) in &self.text_patterns {
                    if let Some(m) = pattern.find(text) {
                        findings.push(BoundaryFinding {
                            category: *category,
                            path: path.to_owned(),
                            matched: m.as_str().to_owned(),
                        });
                    }
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
}

/// Fold `leadStatus`, `Lead-Status` and `LEAD_STATUS` to `lead_status`.
fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len().saturating_add(4));
    let mut prev_lower = false;
    for c in key.trim().chars() {
        if c == '-' || c == ' ' || c == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_lowercase());
    }
    out
}

impl BoundaryScanner for KeywordBoundaryScanner {
    fn scan(&self, payload: &Value) -> BoundaryReport {
        let mut findings = Vec::new();
        self.walk(payload, "$", &mut findings);
        BoundaryReport { findings }
    }
}
