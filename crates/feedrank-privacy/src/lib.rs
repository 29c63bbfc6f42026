//! PII redaction using regex patterns.
//!
//! Queries are redacted before they reach the embedding or storage path,
//! so personally identifying substrings are never persisted. Replacement
//! uses fixed placeholder tokens; the original values are discarded and
//! only the types and counts of what was removed are reported.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Types of PII that can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Ssn,
    CreditCard,
    Phone,
    IpAddress,
    AccountNumber,
}

impl PiiType {
    /// The fixed token substituted for every match of this type.
    pub fn placeholder(&self) -> &'static str {
        match self {
            PiiType::Email => "[REDACTED_EMAIL]",
            PiiType::Ssn => "[REDACTED_SSN]",
            PiiType::CreditCard => "[REDACTED_CARD]",
            PiiType::Phone => "[REDACTED_PHONE]",
            PiiType::IpAddress => "[REDACTED_IP]",
            PiiType::AccountNumber => "[REDACTED_ACCOUNT]",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PiiType::Email => "email",
            PiiType::Ssn => "ssn",
            PiiType::CreditCard => "credit_card",
            PiiType::Phone => "phone",
            PiiType::IpAddress => "ip_address",
            PiiType::AccountNumber => "account_number",
        }
    }
}

/// Result of redacting a piece of text. Carries no original PII values.
#[derive(Debug, Clone, Serialize)]
pub struct RedactionResult {
    pub text: String,
    pub had_pii: bool,
    pub redaction_count: usize,
    /// Counts per detected type, for the audit log.
    pub details: BTreeMap<PiiType, usize>,
}

impl RedactionResult {
    /// Details as a JSON object keyed by type label, for persistence.
    pub fn details_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.details
                .iter()
                .map(|(t, &n)| (t.label().to_string(), serde_json::json!(n)))
                .collect(),
        )
    }
}

// Compiled once, reused. Order matters: more specific numeric formats run
// before the generic phone/account patterns so a card number is not
// half-eaten as a phone number.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());
static SSN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap()
});
static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b")
        .unwrap()
});
static ACCOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:account|acct)[\s#:]*\d{6,}\b").unwrap());

/// Regex-based PII redactor. Stateless and cheap to share.
pub struct PiiRedactor {
    patterns: Vec<(PiiType, &'static Regex)>,
}

impl PiiRedactor {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                (PiiType::Email, &EMAIL_RE),
                (PiiType::Ssn, &SSN_RE),
                (PiiType::CreditCard, &CC_RE),
                (PiiType::AccountNumber, &ACCOUNT_RE),
                (PiiType::Phone, &PHONE_RE),
                (PiiType::IpAddress, &IP_RE),
            ],
        }
    }

    /// Replace every detected PII substring with its fixed placeholder.
    pub fn redact(&self, text: &str) -> RedactionResult {
        let mut matches: Vec<(usize, usize, PiiType)> = Vec::new();
        for (pii_type, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                matches.push((m.start(), m.end(), *pii_type));
            }
        }

        if matches.is_empty() {
            return RedactionResult {
                text: text.to_string(),
                had_pii: false,
                redaction_count: 0,
                details: BTreeMap::new(),
            };
        }

        // Position order, longest match first; overlaps keep the first.
        // Pattern registration order is the overlap tie-break, so the more
        // specific type wins for identical spans.
        matches.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        let mut kept: Vec<(usize, usize, PiiType)> = Vec::new();
        let mut last_end = 0;
        for m in matches {
            if m.0 >= last_end {
                last_end = m.1;
                kept.push(m);
            }
        }

        let mut result = String::with_capacity(text.len());
        let mut details: BTreeMap<PiiType, usize> = BTreeMap::new();
        let mut cursor = 0;
        for (start, end, pii_type) in &kept {
            result.push_str(&text[cursor..*start]);
            result.push_str(pii_type.placeholder());
            *details.entry(*pii_type).or_insert(0) += 1;
            cursor = *end;
        }
        result.push_str(&text[cursor..]);

        RedactionResult {
            text: result,
            had_pii: true,
            redaction_count: kept.len(),
            details,
        }
    }
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Contact me at user@example.com for details.");
        assert_eq!(result.text, "Contact me at [REDACTED_EMAIL] for details.");
        assert!(result.had_pii);
        assert_eq!(result.redaction_count, 1);
        assert_eq!(result.details[&PiiType::Email], 1);
    }

    #[test]
    fn test_redact_phone() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Call me at (555) 123-4567 today.");
        assert_eq!(result.text, "Call me at [REDACTED_PHONE] today.");
    }

    #[test]
    fn test_redact_ssn() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("My SSN is 123-45-6789.");
        assert_eq!(result.text, "My SSN is [REDACTED_SSN].");
    }

    #[test]
    fn test_redact_card_not_phone() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Card 4111-1111-1111-1111 was declined.");
        assert_eq!(result.text, "Card [REDACTED_CARD] was declined.");
        assert_eq!(result.details.get(&PiiType::Phone), None);
    }

    #[test]
    fn test_redact_ip() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Server at 192.168.1.100 is down.");
        assert_eq!(result.text, "Server at [REDACTED_IP] is down.");
    }

    #[test]
    fn test_redact_account_number() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("My account #12345678 is locked.");
        assert_eq!(result.text, "My [REDACTED_ACCOUNT] is locked.");
    }

    #[test]
    fn test_multiple_types_counted() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Email user@test.com or user2@test.com, SSN 123-45-6789");
        assert_eq!(result.redaction_count, 3);
        assert_eq!(result.details[&PiiType::Email], 2);
        assert_eq!(result.details[&PiiType::Ssn], 1);

        let json = result.details_json();
        assert_eq!(json["email"], 2);
        assert_eq!(json["ssn"], 1);
    }

    #[test]
    fn test_clean_text_untouched() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("What is the current discount rate?");
        assert_eq!(result.text, "What is the current discount rate?");
        assert!(!result.had_pii);
        assert!(result.details.is_empty());
    }

    #[test]
    fn test_details_never_contain_values() {
        let redactor = PiiRedactor::new();
        let result = redactor.redact("Reach me at secret@hidden.org");
        let serialized = serde_json::to_string(&result).unwrap();
        assert!(!serialized.contains("secret@hidden.org"));
    }
}
