//! Request Signer
//!
//! Turns a reading position plus the seed template into the wire payload the
//! reading endpoint accepts. The field set, its order and which fields feed
//! each digest are fixed by a versioned [`PayloadContract`].
//!
//! # Determinism
//!
//! [`sign_at`] is a pure function of its arguments: the same seed, position,
//! read seconds, timestamp and nonce always yield a byte-identical payload.
//! [`sign`] only adds reading the clock and drawing the nonce.
//!
//! # Digests
//!
//! ```text
//! ts = ct * 1000 + nonce.jitter_ms
//! sg = hex(sha256("{ts}{rn}{secret}"))
//! s  = rolling_checksum(encode_sorted(every field except s))
//! ```

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use weread_domain::{render_field, Position, SecretMaterial, SeedRecord};

use crate::clock::{Clock, Nonce, NonceSource};
use crate::error::{EngineError, EngineResult};

/// Signing key used by the web reader.
pub const WEB_SIGNING_KEY: &str = "3c5c8717f3daf09iop3423zafeqoi";

// =============================================================================
// Contract Table
// =============================================================================

/// Where a payload field gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Copied unchanged from the seed template
    Seed {
        /// Signing fails when the seed lacks it; otherwise the field is omitted
        required: bool,
    },
    /// `Position::book_id`
    BookId,
    /// `Position::chapter_id`
    ChapterId,
    /// `Position::chapter_index`
    ChapterIndex,
    /// `Position::content_offset`
    ContentOffset,
    /// Simulated seconds read since the previous accepted request
    ReadSeconds,
    /// Millisecond timestamp with nonce jitter
    MillisTimestamp,
    /// Nonce request-sequence number
    Sequence,
    /// sha256 signature over timestamp, sequence and secret
    Signature,
    /// Second timestamp from the clock
    SecondsTimestamp,
}

/// Versioned description of the payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadContract {
    /// Contract version, bumped whenever the table changes
    pub version: u32,
    /// Fields in wire order
    pub fields: &'static [(&'static str, FieldSource)],
    /// Name of the trailing checksum field
    pub checksum_field: &'static str,
}

impl PayloadContract {
    /// Layout accepted by the web reader.
    pub const V1: PayloadContract = PayloadContract {
        version: 1,
        fields: &[
            ("appId", FieldSource::Seed { required: true }),
            ("b", FieldSource::BookId),
            ("c", FieldSource::ChapterId),
            ("ci", FieldSource::ChapterIndex),
            ("co", FieldSource::ContentOffset),
            ("sm", FieldSource::Seed { required: false }),
            ("pr", FieldSource::Seed { required: false }),
            ("rt", FieldSource::ReadSeconds),
            ("ts", FieldSource::MillisTimestamp),
            ("rn", FieldSource::Sequence),
            ("sg", FieldSource::Signature),
            ("ct", FieldSource::SecondsTimestamp),
            ("ps", FieldSource::Seed { required: true }),
            ("pc", FieldSource::Seed { required: true }),
        ],
        checksum_field: "s",
    };

    /// True when the key is produced by the table itself
    pub fn defines(&self, key: &str) -> bool {
        key == self.checksum_field || self.fields.iter().any(|(name, _)| *name == key)
    }
}

impl Default for PayloadContract {
    fn default() -> Self {
        Self::V1
    }
}

// =============================================================================
// Signed Payload
// =============================================================================

/// Ordered, signed request body.
///
/// Serializes as a JSON object whose keys keep contract order.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPayload {
    contract_version: u32,
    fields: Vec<(String, Value)>,
    signature: String,
    checksum: String,
}

impl SignedPayload {
    /// Version of the contract that produced this payload
    pub fn contract_version(&self) -> u32 {
        self.contract_version
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Signature field (`sg`)
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Checksum field (`s`)
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Compact JSON body
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for SignedPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// =============================================================================
// Signing
// =============================================================================

/// Sign a payload, reading the clock and drawing a fresh nonce.
pub fn sign(
    contract: &PayloadContract,
    seed: &SeedRecord,
    position: &Position,
    read_secs: u64,
    clock: &dyn Clock,
    nonces: &mut dyn NonceSource,
) -> EngineResult<SignedPayload> {
    sign_at(contract, seed, position, read_secs, clock.unix_secs(), nonces.next_nonce())
}

/// Sign a payload for an explicit timestamp and nonce.
///
/// # Errors
/// - `EngineError::MissingField` when a required seed field is absent
/// - `EngineError::InvalidField` when a required value is empty
pub fn sign_at(
    contract: &PayloadContract,
    seed: &SeedRecord,
    position: &Position,
    read_secs: u64,
    unix_secs: i64,
    nonce: Nonce,
) -> EngineResult<SignedPayload> {
    if position.book_id.is_empty() {
        return Err(EngineError::InvalidField {
            field: "b",
            reason: "empty book id".to_string(),
        });
    }
    if position.chapter_id.is_empty() {
        return Err(EngineError::InvalidField {
            field: "c",
            reason: "empty chapter id".to_string(),
        });
    }

    let millis = unix_secs * 1000 + i64::from(nonce.jitter_ms);
    let signature = signature_digest(millis, nonce.sequence, seed.secret());

    let mut fields: Vec<(String, Value)> = Vec::with_capacity(contract.fields.len() + 1);
    for &(name, source) in contract.fields {
        let value = match source {
            FieldSource::Seed { required } => match seed.fields().get(name) {
                Some(value) if required && render_field(value).is_empty() => {
                    return Err(EngineError::InvalidField {
                        field: name,
                        reason: "empty value".to_string(),
                    })
                }
                Some(value) => value.clone(),
                None if required => return Err(EngineError::MissingField(name)),
                None => continue,
            },
            FieldSource::BookId => Value::from(position.book_id.as_str()),
            FieldSource::ChapterId => Value::from(position.chapter_id.as_str()),
            FieldSource::ChapterIndex => Value::from(position.chapter_index),
            FieldSource::ContentOffset => Value::from(position.content_offset),
            FieldSource::ReadSeconds => Value::from(read_secs),
            FieldSource::MillisTimestamp => Value::from(millis),
            FieldSource::Sequence => Value::from(nonce.sequence),
            FieldSource::Signature => Value::from(signature.as_str()),
            FieldSource::SecondsTimestamp => Value::from(unix_secs),
        };
        fields.push((name.to_string(), value));
    }

    let mut extras: Vec<(&String, &Value)> = seed
        .fields()
        .iter()
        .filter(|(key, _)| !contract.defines(key))
        .collect();
    extras.sort_by(|a, b| a.0.cmp(b.0));
    fields.extend(extras.into_iter().map(|(k, v)| (k.clone(), v.clone())));

    let checksum = rolling_checksum(&encode_sorted(&fields));
    fields.push((contract.checksum_field.to_string(), Value::from(checksum.as_str())));

    debug!(
        contract = contract.version,
        book_id = %position.book_id,
        chapter_id = %position.chapter_id,
        ts = millis,
        rn = nonce.sequence,
        "Payload signed"
    );

    Ok(SignedPayload {
        contract_version: contract.version,
        fields,
        signature,
        checksum,
    })
}

/// `hex(sha256("{ts}{rn}{secret}"))`
pub fn signature_digest(millis: i64, sequence: u32, secret: &SecretMaterial) -> String {
    let mut hasher = Sha256::new();
    hasher.update(millis.to_string().as_bytes());
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(secret.expose().as_bytes());
    hex::encode(hasher.finalize())
}

/// Render fields as `k=v` pairs sorted by key and joined with `&`.
///
/// Values are percent-encoded keeping only RFC 3986 unreserved characters.
pub fn encode_sorted(fields: &[(String, Value)]) -> String {
    let mut pairs: Vec<(&str, String)> = fields
        .iter()
        .map(|(k, v)| (k.as_str(), percent_encode(&render_field(v))))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode every byte outside the RFC 3986 unreserved set.
pub fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Two interleaved 31-bit XOR/shift accumulators walked from the end of the
/// input, summed and rendered as lowercase hex.
pub fn rolling_checksum(input: &str) -> String {
    let codes: Vec<u64> = input.chars().map(|c| u64::from(u32::from(c))).collect();
    let len = codes.len() as i64;

    let mut high: u64 = 0x1505_1505;
    let mut low: u64 = high;
    let mut i = len - 1;

    while i > 0 {
        let idx = i as usize;
        let shift = ((len - i) % 30) as u32;
        high = 0x7fff_ffff & (high ^ (codes[idx] << shift));

        let prev_shift = (i % 30) as u32;
        low = 0x7fff_ffff & (low ^ (codes[idx - 1] << prev_shift));

        i -= 2;
    }

    format!("{:x}", high + low)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use weread_domain::SESSION_COOKIE;

    fn seed() -> SeedRecord {
        let mut cookies = BTreeMap::new();
        cookies.insert(SESSION_COOKIE.to_string(), "abcdefgh".to_string());
        let fields = json!({
            "appId": "wb182564874603h",
            "b": "stale-book",
            "c": "stale-chapter",
            "ci": 3,
            "co": 389,
            "sm": "[插图]",
            "pr": 74,
            "rt": 15,
            "ts": 1,
            "rn": 2,
            "sg": "x",
            "ct": 3,
            "ps": "a2c325a07a5e1f29g0117fd",
            "pc": "1d432c107a5e1f29g011937",
            "s": "36cc0815",
        });
        SeedRecord::new(
            vec![("User-Agent".to_string(), "Mozilla/5.0".to_string())],
            cookies,
            fields.as_object().unwrap().clone(),
            SecretMaterial::new(WEB_SIGNING_KEY),
        )
    }

    fn position() -> Position {
        Position {
            book_id: "ce032b305a9bc1ce0b0dd2a".to_string(),
            chapter_id: "7cb321502467cbbc409e62d".to_string(),
            chapter_index: 27,
            content_offset: 389,
        }
    }

    fn signed(position: &Position, secs: i64, nonce: Nonce) -> SignedPayload {
        sign_at(&PayloadContract::V1, &seed(), position, 30, secs, nonce).unwrap()
    }

    #[test]
    fn test_rolling_checksum_known_values() {
        assert_eq!(rolling_checksum(""), "2a0a2a0a");
        assert_eq!(rolling_checksum("a"), "2a0a2a0a");
        assert_eq!(rolling_checksum("hello world"), "2a0abc8e");
    }

    #[test]
    fn test_golden_payload_v1() {
        let payload = signed(&position(), 1_700_000_000, Nonce::new(421, 137));

        assert_eq!(payload.contract_version(), 1);
        assert_eq!(payload.signature(), "2acfd7d56bf0d87bb18c71f6446eec64c15b9dd34a286af8de302369dde6a90d");
        assert_eq!(payload.checksum(), "869103d6");
        assert_eq!(payload.to_json().unwrap(), r#"{"appId":"wb182564874603h","b":"ce032b305a9bc1ce0b0dd2a","c":"7cb321502467cbbc409e62d","ci":27,"co":389,"sm":"[插图]","pr":74,"rt":30,"ts":1700000000137,"rn":421,"sg":"2acfd7d56bf0d87bb18c71f6446eec64c15b9dd34a286af8de302369dde6a90d","ct":1700000000,"ps":"a2c325a07a5e1f29g0117fd","pc":"1d432c107a5e1f29g011937","s":"869103d6"}"#);
    }

    #[test]
    fn test_field_order_follows_contract() {
        let payload = signed(&position(), 1_700_000_000, Nonce::new(1, 2));
        let keys: Vec<&str> = payload.fields().iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(
            keys,
            vec!["appId", "b", "c", "ci", "co", "sm", "pr", "rt", "ts", "rn", "sg", "ct", "ps", "pc", "s"]
        );
        assert_eq!(payload.get("ts"), Some(&json!(1_700_000_000_002_i64)));
        assert_eq!(payload.get("rn"), Some(&json!(1)));
        assert_eq!(payload.get("b"), Some(&json!("ce032b305a9bc1ce0b0dd2a")));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let a = signed(&position(), 1_700_000_000, Nonce::new(5, 6));
        let b = signed(&position(), 1_700_000_000, Nonce::new(5, 6));

        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_any_input_change_changes_signature() {
        let base_pos = position();
        let base = signed(&base_pos, 1_700_000_000, Nonce::new(5, 6));
        let digest = |p: &SignedPayload| (p.signature().to_string(), p.checksum().to_string());

        let mut variants = vec![
            signed(&base_pos, 1_700_000_001, Nonce::new(5, 6)),
            signed(&base_pos, 1_700_000_000, Nonce::new(6, 6)),
            signed(&base_pos, 1_700_000_000, Nonce::new(5, 7)),
        ];
        let mutations: [fn(&mut Position); 4] = [
            |p| p.book_id.push('0'),
            |p| p.chapter_id.push('0'),
            |p| p.chapter_index = 270,
            |p| p.content_offset = 3890,
        ];
        for mutate in mutations {
            let mut changed = position();
            mutate(&mut changed);
            variants.push(signed(&changed, 1_700_000_000, Nonce::new(5, 6)));
        }
        let other_secret = sign_at(
            &PayloadContract::V1,
            &SeedRecord::new(
                seed().headers().to_vec(),
                seed().cookies().clone(),
                seed().fields().clone(),
                SecretMaterial::new("another-secret"),
            ),
            &base_pos,
            30,
            1_700_000_000,
            Nonce::new(5, 6),
        )
        .unwrap();
        variants.push(other_secret);

        for variant in &variants {
            assert_ne!(digest(variant), digest(&base));
        }
    }

    #[test]
    fn test_missing_required_field_fails() {
        let mut fields = seed().fields().clone();
        fields.remove("ps");
        let broken = SeedRecord::new(
            vec![],
            BTreeMap::new(),
            fields,
            SecretMaterial::new(WEB_SIGNING_KEY),
        );

        let result = sign_at(&PayloadContract::V1, &broken, &position(), 30, 1, Nonce::new(0, 0));
        assert_eq!(result, Err(EngineError::MissingField("ps")));
    }

    #[test]
    fn test_optional_fields_omitted_and_extras_appended() {
        let mut fields = seed().fields().clone();
        fields.remove("sm");
        fields.remove("pr");
        fields.insert("zz".to_string(), json!("tail"));
        fields.insert("aa".to_string(), json!(1));
        let custom = SeedRecord::new(vec![], BTreeMap::new(), fields, SecretMaterial::new("k"));

        let payload =
            sign_at(&PayloadContract::V1, &custom, &position(), 30, 1, Nonce::new(0, 0)).unwrap();
        let keys: Vec<&str> = payload.fields().iter().map(|(k, _)| k.as_str()).collect();

        assert!(!keys.contains(&"sm"));
        assert!(!keys.contains(&"pr"));
        assert_eq!(&keys[keys.len() - 3..], &["aa", "zz", "s"]);
    }

    #[test]
    fn test_clock_and_nonce_sources_feed_sign() {
        use crate::clock::{FixedClock, FixedNonce};

        let mut nonces = FixedNonce(Nonce::new(421, 137));
        let via_sources = sign(
            &PayloadContract::V1,
            &seed(),
            &position(),
            30,
            &FixedClock(1_700_000_000),
            &mut nonces,
        )
        .unwrap();

        assert_eq!(via_sources, signed(&position(), 1_700_000_000, Nonce::new(421, 137)));
    }

    #[test]
    fn test_percent_encoding() {
        assert_eq!(percent_encode("a b/c~_.-"), "a%20b%2Fc~_.-");
        assert_eq!(percent_encode("插"), "%E6%8F%92");
    }
}
