//! Tests for `src/policy/pii.rs`: detection and placeholders.

use serde_json::json;

use turnstile::policy::{PiiKind, PiiScanner};

#[test]
fn detects_each_category() {
    let scanner = PiiScanner::new();
    assert_eq!(scanner.scan("ssn 123-45-6789"), vec![PiiKind::Ssn]);
    assert_eq!(scanner.scan("card 4111 1111 1111 1111"), vec![PiiKind::CreditCard]);
    assert_eq!(scanner.scan("mail a.b@example.co.uk"), vec![PiiKind::Email]);
    assert_eq!(scanner.scan("call (555) 123-4567"), vec![PiiKind::Phone]);
    assert_eq!(scanner.scan("host 192.168.10.1"), vec![PiiKind::IpAddress]);
    assert!(scanner.scan("nothing to see here").is_empty());
}

#[test]
fn redaction_uses_placeholders_and_is_idempotent() {
    let scanner = PiiScanner::new();
    let once = scanner.redact("write to jo@example.com or 555-123-4567");
    assert_eq!(once, "write to [REDACTED_EMAIL] or [REDACTED_PHONE]");
    assert_eq!(scanner.redact(&once), once);
    assert!(scanner.scan(&once).is_empty());
}

#[test]
fn nested_values_keep_keys_and_shape() {
    let scanner = PiiScanner::new();
    let value = json!({
        "recipients": ["x@example.com", "plain"],
        "meta": {"ip": "10.0.0.1", "count": 2}
    });
    let redacted = scanner.redact_value(&value);
    assert_eq!(
        redacted,
        json!({
            "recipients": ["[REDACTED_EMAIL]", "plain"],
            "meta": {"ip": "[REDACTED_IP]", "count": 2}
        })
    );
    let mut kinds = scanner.scan_value(&value);
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![PiiKind::Email, PiiKind::IpAddress]);
}

#[test]
fn numeric_card_numbers_are_detected_and_redacted() {
    let scanner = PiiScanner::new();
    let value = json!({"card": 4111111111111111_u64, "amount": 42});
    assert_eq!(scanner.scan_value(&value), vec![PiiKind::CreditCard]);

    let redacted = scanner.redact_value(&value);
    assert_eq!(
        redacted,
        json!({"card": "[REDACTED_CREDIT_CARD]", "amount": 42})
    );
    assert!(scanner.scan_value(&redacted).is_empty());
}

#[test]
fn object_keys_are_scanned_and_redacted() {
    let scanner = PiiScanner::new();
    let value = json!({"alice@example.com": "x", "note": "hi"});
    assert_eq!(scanner.scan_value(&value), vec![PiiKind::Email]);

    let redacted = scanner.redact_value(&value);
    assert_eq!(redacted, json!({"[REDACTED_EMAIL]": "x", "note": "hi"}));
}
