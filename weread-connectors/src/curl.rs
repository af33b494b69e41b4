//! Request template extraction from a browser "Copy as cURL (bash)" command.
//!
//! Pulls out `-H` headers, cookies (from the `Cookie` header or `-b`) and the
//! JSON body of `--data-raw`, producing the [`SeedRecord`] a session replays.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use weread_domain::{SecretMaterial, SeedRecord};
use weread_engine::WEB_SIGNING_KEY;

/// Errors that can occur while parsing a curl command.
#[derive(Debug, Clone, Error)]
pub enum CurlError {
    /// A built-in pattern failed to compile
    #[error("Invalid pattern: {0}")]
    Pattern(String),

    /// Request body is not a JSON object
    #[error("Request body is not a JSON object: {0}")]
    InvalidBody(String),
}

const HEADER_PATTERN: &str = r"(?:-H|--header) '([^:']+):\s*([^']*)'";
const COOKIE_PATTERN: &str = r"(?:-b|--cookie) '([^']+)'";
const BODY_PATTERN: &str = r"(?:--data-raw|--data-binary|--data|-d) '([^']+)'";

fn compile(pattern: &str) -> Result<Regex, CurlError> {
    Regex::new(pattern).map_err(|e| CurlError::Pattern(e.to_string()))
}

/// Split a `k=v; k2=v2` cookie string. Segments without `=` are dropped.
pub fn parse_cookie_string(cookies: &str) -> BTreeMap<String, String> {
    cookies
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Parse a curl command into a seed record signed with the web key.
///
/// The record is not validated; call [`SeedRecord::validate`] before use.
pub fn parse_curl(command: &str) -> Result<SeedRecord, CurlError> {
    let mut headers = Vec::new();
    let mut cookie_header = None;

    for captures in compile(HEADER_PATTERN)?.captures_iter(command) {
        let name = captures[1].trim().to_string();
        let value = captures[2].trim().to_string();
        if name.eq_ignore_ascii_case("cookie") {
            cookie_header = Some(value);
        } else {
            headers.push((name, value));
        }
    }

    // -b wins over a Cookie header
    let cookie_flag = compile(COOKIE_PATTERN)?
        .captures(command)
        .map(|captures| captures[1].to_string());
    let cookies = cookie_flag
        .or(cookie_header)
        .map(|raw| parse_cookie_string(&raw))
        .unwrap_or_default();

    let fields = match compile(BODY_PATTERN)?.captures(command) {
        Some(captures) => match serde_json::from_str::<Value>(&captures[1]) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(CurlError::InvalidBody(other.to_string())),
            Err(e) => return Err(CurlError::InvalidBody(e.to_string())),
        },
        None => Map::new(),
    };

    debug!(
        headers = headers.len(),
        cookies = cookies.len(),
        fields = fields.len(),
        "Parsed curl template"
    );

    Ok(SeedRecord::new(
        headers,
        cookies,
        fields,
        SecretMaterial::new(WEB_SIGNING_KEY),
    ))
}

// =============================================================================
// Tests
// =============================================================================
