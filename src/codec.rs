//! Reversible payload obfuscation.
//!
//! **This is not encryption.** The key is a fixed, public constant and the
//! transform is a repeating XOR. It only keeps payloads from reading as plain
//! text in a location bar. Never rely on it for access control or secrecy.
//!
//! Wire format (current):
//!
//! ```text
//! text ─UTF-16 units─▶ XOR(key[i % len]) ─UTF-8─▶ base64 ─▶ URL-safe (-, _, no padding)
//! ```
//!
//! Decoding also accepts every older format that made it into the wild:
//!
//! 1. URL-safe XOR+base64, optionally percent-encoded once more by transport.
//! 2. Standard base64 of the raw XOR code units (bytes read as Latin-1).
//! 3. Percent-encoded plain text, which is what [`encode`] emits when it has
//!    to give up on obfuscation.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::utils::has_percent_escapes;
use crate::{ShareError, DEFAULT_KEY};

/// `atob`-style decoder: standard alphabet, padding optional.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ---------------------------------------------------------------------------
// Obfuscator
// ---------------------------------------------------------------------------

/// A reversible, non-secret payload transform.
pub trait Obfuscator: Send + Sync {
    fn encode(&self, text: &str) -> Result<String, ShareError>;
    fn decode(&self, token: &str) -> Result<String, ShareError>;
}

/// The stock obfuscator: repeating-key XOR plus URL-safe base64.
#[derive(Debug, Clone)]
pub struct XorObfuscator {
    key: String,
}

impl XorObfuscator {
    /// Fails with [`ShareError::InvalidKey`] on an empty key.
    pub fn new(key: impl Into<String>) -> Result<Self, ShareError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ShareError::InvalidKey);
        }
        Ok(Self { key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for XorObfuscator {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
        }
    }
}

impl Obfuscator for XorObfuscator {
    fn encode(&self, text: &str) -> Result<String, ShareError> {
        encode(text, &self.key)
    }

    fn decode(&self, token: &str) -> Result<String, ShareError> {
        decode(token, &self.key)
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Obfuscate `text` into a URL-safe token.
///
/// When the XOR result is not valid UTF-16 (only possible with a non-ASCII
/// key) the text is percent-encoded instead. That output still decodes, but it
/// is not obfuscated at all.
pub fn encode(text: &str, key: &str) -> Result<String, ShareError> {
    let key_units = key_units(key)?;

    match obfuscate(text, &key_units) {
        Ok(encoded) => Ok(encoded),
        Err(reason) => {
            tracing::warn!(%reason, len = text.len(), "obfuscation failed, falling back to percent-encoding");
            Ok(urlencoding::encode(text).into_owned())
        }
    }
}

fn obfuscate(text: &str, key_units: &[u16]) -> Result<String, String> {
    let units = xor_units(text.encode_utf16(), key_units);
    let xored = String::from_utf16(&units).map_err(|e| e.to_string())?;
    Ok(URL_SAFE_NO_PAD.encode(xored.as_bytes()))
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Recover the text behind a token produced by [`encode`] or by any of the
/// older encoders.
pub fn decode(token: &str, key: &str) -> Result<String, ShareError> {
    let key_units = key_units(key)?;

    let current_err = match decode_current(token, &key_units) {
        Ok(text) => return Ok(text),
        Err(e) => e,
    };
    tracing::debug!(reason = %current_err, "URL-safe decode failed, trying legacy base64");

    let legacy_err = match decode_legacy_base64(token, &key_units) {
        Ok(text) => return Ok(text),
        Err(e) => e,
    };
    tracing::debug!(reason = %legacy_err, "legacy base64 decode failed, trying percent-decoding");

    match urlencoding::decode(token) {
        Ok(text) => Ok(text.into_owned()),
        Err(e) => {
            tracing::error!(
                len = token.len(),
                percent_encoded = has_percent_escapes(token),
                current = %current_err,
                legacy = %legacy_err,
                percent = %e,
                "all decode tiers failed"
            );
            Err(ShareError::DecodeFailure(format!(
                "url-safe: {current_err}; legacy: {legacy_err}; percent: {e}"
            )))
        }
    }
}

/// Tier 1: optional percent-decoding, URL-safe base64, UTF-8, XOR.
fn decode_current(token: &str, key_units: &[u16]) -> Result<String, String> {
    let unescaped = if has_percent_escapes(token) {
        urlencoding::decode(token)
            .map_err(|e| format!("percent-decoding: {e}"))?
            .into_owned()
    } else {
        token.to_string()
    };

    let mut standard: String = unescaped
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    let bytes = STANDARD
        .decode(standard.as_bytes())
        .map_err(|e| format!("base64: {e}"))?;
    let xored = String::from_utf8(bytes).map_err(|e| format!("utf-8: {e}"))?;
    let units = xor_units(xored.encode_utf16(), key_units);
    String::from_utf16(&units).map_err(|e| format!("utf-16: {e}"))
}

/// Tier 2: standard base64 of the untouched token, bytes taken as code units.
fn decode_legacy_base64(token: &str, key_units: &[u16]) -> Result<String, String> {
    let bytes = LENIENT_STANDARD
        .decode(token.as_bytes())
        .map_err(|e| format!("base64: {e}"))?;
    let units = xor_units(bytes.iter().map(|&b| u16::from(b)), key_units);
    String::from_utf16(&units).map_err(|e| format!("utf-16: {e}"))
}

// ---------------------------------------------------------------------------
// XOR
// ---------------------------------------------------------------------------

fn key_units(key: &str) -> Result<Vec<u16>, ShareError> {
    let units: Vec<u16> = key.encode_utf16().collect();
    if units.is_empty() {
        return Err(ShareError::InvalidKey);
    }
    Ok(units)
}

fn xor_units(units: impl Iterator<Item = u16>, key_units: &[u16]) -> Vec<u16> {
    units
        .enumerate()
        .map(|(i, unit)| unit ^ key_units[i % key_units.len()])
        .collect()
}

/// XOR `text` against `key` code unit by code unit, without any encoding
/// layer. Returns `None` if the result is not valid UTF-16.
pub fn xor_text(text: &str, key: &str) -> Option<String> {
    let key_units = key_units(key).ok()?;
    String::from_utf16(&xor_units(text.encode_utf16(), &key_units)).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
