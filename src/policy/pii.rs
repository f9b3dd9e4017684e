//! PII detection and redaction for tool arguments and outputs.
//!
//! Patterns run in a fixed order over progressively redacted text, so a value
//! claimed by an earlier category (a card number) is never re-reported by a
//! later one (a phone number inside it).

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Category of personally identifiable information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    /// US social security number.
    Ssn,
    /// Payment card number.
    CreditCard,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Passport number.
    Passport,
    /// IPv4 address.
    IpAddress,
}

impl PiiKind {
    /// Snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Passport => "passport",
            Self::IpAddress => "ip_address",
        }
    }

    /// Replacement text for this category.
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Ssn => "[REDACTED_SSN]",
            Self::CreditCard => "[REDACTED_CREDIT_CARD]",
            Self::Email => "[REDACTED_EMAIL]",
            Self::Phone => "[REDACTED_PHONE]",
            Self::Passport => "[REDACTED_PASSPORT]",
            Self::IpAddress => "[REDACTED_IP]",
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects and redacts PII by category.
#[derive(Debug, Clone)]
pub struct PiiScanner {
    patterns: Vec<(PiiKind, Regex)>,
}

impl Default for PiiScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiScanner {
    /// Scanner with the built-in pattern set.
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// Categories present in `text`, in detection order, without duplicates.
    pub fn scan(&self, text: &str) -> Vec<PiiKind> {
        self.analyze(text).1
    }

    /// Replace every detected value with its category placeholder.
    pub fn redact(&self, text: &str) -> String {
        self.analyze(text).0
    }

    /// Redacted text together with the categories found.
    pub fn analyze(&self, text: &str) -> (String, Vec<PiiKind>) {
        let mut found = Vec::new();
        let mut sanitized = text.to_owned();
        for (kind, pattern) in &self.patterns {
            if pattern.is_match(&sanitized) {
                found.push(*kind);
                sanitized = pattern
                    .replace_all(&sanitized, kind.placeholder())
                    .into_owned();
            }
        }
        (sanitized, found)
    }

    /// Categories found anywhere inside `value`: strings, numbers (by their
    /// JSON text), and object keys.
    pub fn scan_value(&self, value: &Value) -> Vec<PiiKind> {
        let mut found = Vec::new();
        self.visit(value, &mut |text| {
            for kind in self.scan(text) {
                if !found.contains(&kind) {
                    found.push(kind);
                }
            }
        });
        found
    }

    /// Deep copy of `value` with strings, keys, and numbers redacted. A number
    /// that matches becomes its placeholder string.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact(s)),
            Value::Number(n) => {
                let text = n.to_string();
                let redacted = self.redact(&text);
                if redacted == text {
                    Value::Number(n.clone())
                } else {
                    Value::String(redacted)
                }
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.redact(k), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn visit(&self, value: &Value, f: &mut dyn FnMut(&str)) {
        match value {
            Value::String(s) => f(s),
            Value::Number(n) => f(&n.to_string()),
            Value::Array(items) => items.iter().for_each(|v| self.visit(v, f)),
            Value::Object(map) => {
                for (key, v) in map {
                    f(key);
                    self.visit(v, f);
                }
            }
            _ => {}
        }
    }
}

fn default_patterns() -> Vec<(PiiKind, Regex)> {
    let patterns = [
        (PiiKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        (PiiKind::CreditCard, r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
        (
            PiiKind::Email,
            r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
        ),
        (
            PiiKind::Phone,
            r"(?:\+?1[-. ]?)?(?:\(\d{3}\)\s?|\b\d{3}[-. ])\d{3}[-. ]\d{4}\b",
        ),
        (PiiKind::Passport, r"\b[A-Z]{1,2}\d{6,9}\b"),
        (
            PiiKind::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
        ),
    ];

    patterns
        .iter()
        .filter_map(|(kind, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*kind, re)),
            Err(e) => {
                warn!(kind = %kind, error = %e, "invalid PII pattern skipped");
                None
            }
        })
        .collect()
}
