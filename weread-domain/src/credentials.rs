//! Seed Record and Secret Material
//!
//! A seed record is the captured request template an account reads with:
//! headers, cookies, body fields and the secret used for signing.
//!
//! # Security Model
//!
//! - Secret material is wiped from memory when dropped
//! - `Debug` output never shows the secret or the session cookie value

use crate::value_objects::DomainError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Session cookie that authenticates every request.
pub const SESSION_COOKIE: &str = "wr_skey";

/// Body fields that identify the user/device and must be present.
pub const REQUIRED_BODY_FIELDS: &[&str] = &["appId", "ps", "pc"];

// =============================================================================
// Secret Material
// =============================================================================

/// Key mixed into the request signature.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct SecretMaterial(Zeroizing<String>);

impl SecretMaterial {
    /// Wrap a secret value
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the secret for hashing
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretMaterial(***)")
    }
}

impl PartialEq for SecretMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

// =============================================================================
// Seed Record
// =============================================================================

/// Render a body field the way it appears in the signed payload.
///
/// Strings are used verbatim; everything else uses its JSON rendering.
pub fn render_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Captured request template for one account.
#[derive(Clone, PartialEq)]
pub struct SeedRecord {
    headers: Vec<(String, String)>,
    cookies: BTreeMap<String, String>,
    fields: Map<String, Value>,
    secret: SecretMaterial,
}

impl SeedRecord {
    /// Create a seed record. Call [`SeedRecord::validate`] before use.
    pub fn new(
        headers: Vec<(String, String)>,
        cookies: BTreeMap<String, String>,
        fields: Map<String, Value>,
        secret: SecretMaterial,
    ) -> Self {
        Self {
            headers,
            cookies,
            fields,
            secret,
        }
    }

    /// Request headers in capture order (without `Cookie`)
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Cookies by name
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Body fields from the template
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Signing secret
    pub fn secret(&self) -> &SecretMaterial {
        &self.secret
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace a header (case-insensitive match) or append it.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Cookie lookup
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Insert or replace a cookie
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Body field rendered as text
    pub fn field_text(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(render_field)
    }

    /// Book id captured in the template (`b`)
    pub fn book_id(&self) -> Option<String> {
        self.field_text("b")
    }

    /// Chapter id captured in the template (`c`)
    pub fn chapter_id(&self) -> Option<String> {
        self.field_text("c")
    }

    /// Chapter index captured in the template (`ci`)
    pub fn chapter_index(&self) -> Option<u32> {
        match self.fields.get("ci")? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Content offset captured in the template (`co`), 0 when absent
    pub fn content_offset(&self) -> i64 {
        match self.fields.get("co") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Check the template carries what signing and authentication need.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSeed` listing every problem found.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut problems = Vec::new();

        match self.cookie(SESSION_COOKIE) {
            None => problems.push(format!("missing cookie {}", SESSION_COOKIE)),
            Some(v) if v.len() < 8 => {
                problems.push(format!("{} too short: {} chars", SESSION_COOKIE, v.len()))
            }
            Some(_) => {}
        }

        if self.header("user-agent").map_or(true, str::is_empty) {
            problems.push("missing User-Agent header".to_string());
        }

        for field in REQUIRED_BODY_FIELDS {
            match self.field_text(field) {
                None => problems.push(format!("missing body field {}", field)),
                Some(v) if v.len() < 4 => {
                    problems.push(format!("body field {} too short: {}", field, v))
                }
                Some(_) => {}
            }
        }

        if self.secret.expose().is_empty() {
            problems.push("empty signing secret".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::InvalidSeed(problems))
        }
    }
}

impl fmt::Debug for SeedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cookie_names: Vec<&str> = self.cookies.keys().map(String::as_str).collect();
        f.debug_struct("SeedRecord")
            .field("headers", &self.headers.len())
            .field("cookies", &cookie_names)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("secret", &self.secret)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_seed() -> SeedRecord {
        let mut cookies = BTreeMap::new();
        cookies.insert(SESSION_COOKIE.to_string(), "abcdefgh1234".to_string());
        let fields = json!({
            "appId": "wb182564874603h",
            "b": "ce032b305a9bc1ce0b0dd2a",
            "c": "7cb321502467cbbc409e62d",
            "ci": 27,
            "co": 389,
            "ps": "a2c325a07a5e1f29g0117fd",
            "pc": "1d432c107a5e1f29g011937",
        });
        SeedRecord::new(
            vec![("User-Agent".to_string(), "Mozilla/5.0".to_string())],
            cookies,
            fields.as_object().unwrap().clone(),
            SecretMaterial::new("secret"),
        )
    }

    #[test]
    fn test_valid_seed_passes() {
        valid_seed().validate().unwrap();
    }

    #[test]
    fn test_seed_accessors() {
        let seed = valid_seed();
        assert_eq!(seed.header("user-agent"), Some("Mozilla/5.0"));
        assert_eq!(seed.book_id().as_deref(), Some("ce032b305a9bc1ce0b0dd2a"));
        assert_eq!(seed.chapter_index(), Some(27));
        assert_eq!(seed.content_offset(), 389);
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let seed = SeedRecord::new(
            vec![],
            BTreeMap::new(),
            json!({"appId": "x"}).as_object().unwrap().clone(),
            SecretMaterial::new(""),
        );

        match seed.validate() {
            Err(DomainError::InvalidSeed(problems)) => {
                assert!(problems.iter().any(|p| p.contains(SESSION_COOKIE)));
                assert!(problems.iter().any(|p| p.contains("User-Agent")));
                assert!(problems.iter().any(|p| p.contains("appId")));
                assert!(problems.iter().any(|p| p.contains("ps")));
                assert!(problems.iter().any(|p| p.contains("secret")));
            }
            other => panic!("expected InvalidSeed, got {:?}", other),
        }
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut seed = valid_seed();
        seed.set_header("user-agent", "Other/1.0");
        assert_eq!(seed.headers().len(), 1);
        assert_eq!(seed.header("User-Agent"), Some("Other/1.0"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", valid_seed());
        assert!(!rendered.contains("abcdefgh1234"));
        assert!(rendered.contains("SecretMaterial(***)"));
    }

    #[test]
    fn test_render_field() {
        assert_eq!(render_field(&json!("abc")), "abc");
        assert_eq!(render_field(&json!(12)), "12");
    }
}
