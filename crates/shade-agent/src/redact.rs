//! secret redaction for anything that leaves the crate
//!
//! a small rule engine walked over `serde_json::Value`:
//! - key-name rules replace the value under a blacklisted map key
//! - token rules replace secret-key shaped substrings
//! - keyword rules replace the whole string when it talks about a key
//!
//! rules are applied in order; key-name rules run before a map's values are
//! descended into, so a redacted subtree is never walked.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// replacement marker
pub const REDACTED: &str = "[REDACTED]";

/// normalized key names whose values are always replaced
const SENSITIVE_KEYS: &[&str] = &["privatekey", "secretkey"];

/// `ed25519:` and `secp256k1:` followed by base58
const SECRET_TOKEN: &str = r"(?:ed25519|secp256k1):[1-9A-HJ-NP-Za-km-z]+";

/// free-text mention of a private or secret key
const SECRET_KEYWORD: &str = r"(?i)(?:private|secret)[ _-]?key";

enum Rule {
    KeyName(&'static [&'static str]),
    Token(Regex),
    Keyword(Regex),
}

/// ordered redaction rules
pub struct Redactor {
    rules: Vec<Rule>,
}

impl Redactor {
    /// the rule set used for errors and logs
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Rule::KeyName(SENSITIVE_KEYS),
                Rule::Token(Regex::new(SECRET_TOKEN).expect("static token pattern")),
                Rule::Keyword(Regex::new(SECRET_KEYWORD).expect("static keyword pattern")),
            ],
        }
    }

    /// redact a json value recursively
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(self.redact_map(map)),
            other => other.clone(),
        }
    }

    /// redact a single string
    pub fn redact_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for rule in &self.rules {
            match rule {
                Rule::KeyName(_) => {}
                Rule::Token(re) => {
                    if re.is_match(&out) {
                        out = re.replace_all(&out, REDACTED).into_owned();
                    }
                }
                Rule::Keyword(re) => {
                    if re.is_match(&out) {
                        return REDACTED.to_string();
                    }
                }
            }
        }
        out
    }

    fn redact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.redact_value(value)
                };
                (key.clone(), value)
            })
            .collect()
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let normalized: String = key
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        self.rules.iter().any(|rule| match rule {
            Rule::KeyName(names) => names.contains(&normalized.as_str()),
            _ => false,
        })
    }
}

fn redactor() -> &'static Redactor {
    static REDACTOR: OnceLock<Redactor> = OnceLock::new();
    REDACTOR.get_or_init(Redactor::standard)
}

/// redact a json value with the standard rules
pub fn redact_value(value: &Value) -> Value {
    redactor().redact_value(value)
}

/// redact a string with the standard rules
pub fn redact_str(input: &str) -> String {
    redactor().redact_str(input)
}
