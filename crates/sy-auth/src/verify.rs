//! Verification of Bedrock login certificate chains
//!
//! Each token's header names (in `x5u`) the key that signed it, and each
//! payload's `identityPublicKey` names the key that must sign the next token.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use p384::pkcs8::DecodePublicKey;
use p384::PublicKey;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Chain is empty")]
    Empty,

    #[error("Token {index} is not in header.payload.signature format")]
    Format { index: usize },

    #[error("Token {index} has an invalid segment: {reason}")]
    Segment { index: usize, reason: String },

    #[error("Token {index} is signed by an unexpected key")]
    KeyMismatch { index: usize },

    #[error("Unsupported public key: {0}")]
    PublicKey(String),

    #[error("Signature of token {index} is invalid")]
    BadSignature { index: usize },
}

/// Result of a successful signature walk
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// Whether the root key signed one of the tokens
    pub trusted: bool,
    /// Key bound by the last token
    pub identity_public_key: String,
    /// Payload of the last token
    pub claims: Value,
}

#[derive(Debug, Deserialize)]
struct JwsHeader {
    #[serde(default)]
    x5u: Option<String>,
}

/// Split a compact JWS into its three raw segments
pub(crate) fn split_compact(token: &str) -> Option<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Some((header, payload, signature)),
        _ => None,
    }
}

/// Decode a base64url JSON segment
pub(crate) fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Parse a base64 P-384 public key in SPKI DER, SEC1 or raw `x||y` form
pub fn parse_public_key(b64: &str) -> Result<VerifyingKey, VerifyError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| VerifyError::PublicKey(e.to_string()))?;

    let key = match bytes.as_slice() {
        [0x30, ..] => PublicKey::from_public_key_der(&bytes).map_err(|e| VerifyError::PublicKey(e.to_string()))?,
        [0x04, ..] if bytes.len() == 97 => {
            PublicKey::from_sec1_bytes(&bytes).map_err(|e| VerifyError::PublicKey(e.to_string()))?
        }
        _ if bytes.len() == 96 => {
            let mut sec1 = Vec::with_capacity(97);
            sec1.push(0x04);
            sec1.extend_from_slice(&bytes);
            PublicKey::from_sec1_bytes(&sec1).map_err(|e| VerifyError::PublicKey(e.to_string()))?
        }
        _ => {
            return Err(VerifyError::PublicKey(format!(
                "unsupported key length: {} bytes",
                bytes.len()
            )))
        }
    };

    Ok(VerifyingKey::from(&key))
}

/// Walk `tokens`, checking every ES384 signature and key link
pub fn verify_chain<S: AsRef<str>>(tokens: &[S], root_key: &str) -> Result<VerifiedChain, VerifyError> {
    let first = tokens.first().ok_or(VerifyError::Empty)?;
    let (first_header, _, _) = split_compact(first.as_ref()).ok_or(VerifyError::Format { index: 0 })?;
    let mut next_key = decode_segment::<JwsHeader>(first_header)
        .and_then(|h| h.x5u)
        .ok_or(VerifyError::Segment {
            index: 0,
            reason: "missing x5u".to_string(),
        })?;

    let mut trusted = false;
    let mut claims = Value::Null;

    for (index, token) in tokens.iter().enumerate() {
        let (header, payload, signature) =
            split_compact(token.as_ref()).ok_or(VerifyError::Format { index })?;

        let x5u = decode_segment::<JwsHeader>(header).and_then(|h| h.x5u);
        if x5u.as_deref() != Some(next_key.as_str()) {
            return Err(VerifyError::KeyMismatch { index });
        }
        if next_key == root_key {
            trusted = true;
        }

        let key = parse_public_key(&next_key)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
            .ok_or(VerifyError::Segment {
                index,
                reason: "signature is not a 96 byte ES384 signature".to_string(),
            })?;

        let signing_input = format!("{}.{}", header, payload);
        key.verify(signing_input.as_bytes(), &signature)
            .map_err(|_| VerifyError::BadSignature { index })?;
        debug!(index, "Token signature is valid");

        claims = decode_segment::<Value>(payload).ok_or(VerifyError::Segment {
            index,
            reason: "payload is not JSON".to_string(),
        })?;
        if let Some(identity_key) = claims.get("identityPublicKey").and_then(Value::as_str) {
            next_key = identity_key.to_string();
        }
    }

    Ok(VerifiedChain {
        trusted,
        identity_public_key: next_key,
        claims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::minecraft::ROOT_PUBLIC_KEY;

    #[test]
    fn test_root_key_parses() {
        assert!(parse_public_key(ROOT_PUBLIC_KEY).is_ok());
    }

    #[test]
    fn test_rejects_bad_key_length() {
        let short = STANDARD.encode([1u8; 10]);
        assert!(matches!(parse_public_key(&short), Err(VerifyError::PublicKey(_))));
    }

    #[test]
    fn test_split_compact() {
        assert_eq!(split_compact("a.b.c"), Some(("a", "b", "c")));
        assert_eq!(split_compact("a.b"), None);
        assert_eq!(split_compact("a.b.c.d"), None);
    }

    #[test]
    fn test_empty_chain() {
        let tokens: [&str; 0] = [];
        assert!(matches!(verify_chain(&tokens, ROOT_PUBLIC_KEY), Err(VerifyError::Empty)));
    }
}
