//! Xbox Live request signing
//!
//! Every call to an Xbox Live authentication endpoint carries a `Signature`
//! header: a versioned, timestamped ECDSA P-256 signature over the method,
//! path, `Authorization` header and body of the request.
//!
//! Signed payload layout (all integers big-endian):
//!
//! ```text
//! i32(1) 0x00 i64(filetime) 0x00 method 0x00 path 0x00 authorization 0x00 body 0x00
//! ```
//!
//! Header value layout, base64 encoded with the standard alphabet:
//!
//! ```text
//! i32(1) i64(filetime) r s
//! ```

use std::sync::Arc;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::trace;

use crate::clock::Clock;
use crate::errors::{AuthError, Result};
use crate::models::ProofKey;

/// Milliseconds between 1601-01-01 and 1970-01-01
pub const FILETIME_UNIX_EPOCH_OFFSET_MILLIS: i64 = 11_644_473_600_000;

const SIGNATURE_VERSION: i32 = 1;

pub const SIGNATURE_HEADER: &str = "Signature";

/// Convert unix milliseconds to Windows FILETIME ticks (100ns since 1601-01-01)
pub fn filetime_from_unix_millis(millis: i64) -> i64 {
    (millis + FILETIME_UNIX_EPOCH_OFFSET_MILLIS) * 10_000
}

/// Ephemeral P-256 key pair proving possession of the device identity
#[derive(Clone)]
pub struct DeviceKeyPair {
    signing_key: SigningKey,
}

impl DeviceKeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// JSON Web Key of the public half, coordinates as minimal unsigned big-endian
    pub fn proof_key(&self) -> ProofKey {
        let point = self.verifying_key().to_encoded_point(false);
        let x = point.x().map(|x| x.as_slice()).unwrap_or_default();
        let y = point.y().map(|y| y.as_slice()).unwrap_or_default();

        ProofKey {
            crv: "P-256".to_string(),
            alg: "ES256".to_string(),
            key_use: "sig".to_string(),
            kty: "EC".to_string(),
            x: URL_SAFE_NO_PAD.encode(trim_leading_zeros(x)),
            y: URL_SAFE_NO_PAD.encode(trim_leading_zeros(y)),
        }
    }

    fn sign_payload(&self, payload: &[u8]) -> Result<Signature> {
        self.signing_key
            .try_sign(payload)
            .map_err(|e| AuthError::SigningFailed(format!("ECDSA signing failed: {}", e)))
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceKeyPair([REDACTED])")
    }
}

/// The parts of an HTTP request covered by the signature
#[derive(Debug, Clone, Copy)]
pub struct SignatureInput<'a> {
    pub method: &'a str,
    /// Percent-encoded path, without query
    pub path: &'a str,
    pub authorization: Option<&'a [u8]>,
    pub body: &'a [u8],
}

/// Bytes fed to ECDSA for `input` at `filetime`
pub fn signing_payload(input: &SignatureInput<'_>, filetime: i64) -> Vec<u8> {
    let authorization = input.authorization.unwrap_or_default();
    let mut payload = Vec::with_capacity(
        4 + 8 + 6 + input.method.len() + input.path.len() + authorization.len() + input.body.len(),
    );

    payload.extend_from_slice(&SIGNATURE_VERSION.to_be_bytes());
    payload.push(0);
    payload.extend_from_slice(&filetime.to_be_bytes());
    payload.push(0);
    payload.extend_from_slice(input.method.as_bytes());
    payload.push(0);
    payload.extend_from_slice(input.path.as_bytes());
    payload.push(0);
    payload.extend_from_slice(authorization);
    payload.push(0);
    payload.extend_from_slice(input.body);
    payload.push(0);

    payload
}

/// Compute the `Signature` header value for `input` at `filetime`
pub fn sign(key: &DeviceKeyPair, input: &SignatureInput<'_>, filetime: i64) -> Result<String> {
    let signature = key.sign_payload(&signing_payload(input, filetime))?;
    let (r, s) = signature.split_bytes();
    let (r, s) = (trim_leading_zeros(&r), trim_leading_zeros(&s));

    let mut header = Vec::with_capacity(4 + 8 + r.len() + s.len());
    header.extend_from_slice(&SIGNATURE_VERSION.to_be_bytes());
    header.extend_from_slice(&filetime.to_be_bytes());
    header.extend_from_slice(r);
    header.extend_from_slice(s);

    Ok(STANDARD.encode(header))
}

/// Minimal unsigned big-endian form
///
/// For `r` and `s` this is the DER integer content without its sign padding
/// byte. Values are never padded back to the curve width.
fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Attaches the `Signature` header to outgoing Xbox Live requests
#[derive(Clone)]
pub struct RequestSigner {
    key: DeviceKeyPair,
    clock: Arc<dyn Clock>,
}

impl RequestSigner {
    pub fn new(key: DeviceKeyPair, clock: Arc<dyn Clock>) -> Self {
        Self { key, clock }
    }

    pub fn key(&self) -> &DeviceKeyPair {
        &self.key
    }

    /// Sign a fully built request in place
    pub fn sign_request(&self, request: &mut reqwest::Request) -> Result<()> {
        let filetime = filetime_from_unix_millis(self.clock.now().timestamp_millis());

        let value = {
            let input = SignatureInput {
                method: request.method().as_str(),
                path: request.url().path(),
                authorization: request.headers().get(AUTHORIZATION).map(|v| v.as_bytes()),
                body: request.body().and_then(|b| b.as_bytes()).unwrap_or_default(),
            };
            sign(&self.key, &input, filetime)?
        };

        trace!(path = request.url().path(), filetime, "Signed Xbox Live request");
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AuthError::SigningFailed(format!("invalid header value: {}", e)))?;
        request.headers_mut().insert(SIGNATURE_HEADER, value);
        Ok(())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").field("key", &self.key).finish_non_exhaustive()
    }
}
