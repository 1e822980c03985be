//! Minecraft login identity chain
//!
//! The chain handed to a Bedrock server is a list of compact ES384 JWS
//! tokens. Its head is signed locally by a fresh identity key and vouches for
//! Mojang's root key; the rest is issued by the multiplayer authentication
//! service for that identity key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Utc};
use p384::ecdsa::{signature::Signer, Signature, SigningKey};
use p384::pkcs8::EncodePublicKey;
use rand_core::OsRng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::clock::{Clock, SystemClock};
use crate::config::{minecraft, AuthConfig};
use crate::device_code::{ConsentPresenter, DeviceCodeClient};
use crate::errors::{AuthError, RequestError, Result, SharedResult};
use crate::models::{McAuthenticationRequest, McAuthenticationResponse};
use crate::verify::{decode_segment, split_compact};
use crate::xbox::XboxLiveExchanger;

/// P-384 key pair identifying this client to Minecraft
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Public key as base64 of its SubjectPublicKeyInfo DER encoding
    pub fn public_key_base64(&self) -> Result<String> {
        let der = self
            .signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| AuthError::SigningFailed(format!("cannot encode identity key: {}", e)))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        self.signing_key
            .try_sign(message)
            .map_err(|e| AuthError::SigningFailed(format!("ES384 signing failed: {}", e)))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityKeyPair([REDACTED])")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CertificateHeader {
    alg: String,
    x5u: String,
}

/// Claims of the self-signed identity certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateClaims {
    pub certificate_authority: bool,
    pub exp: i64,
    pub identity_public_key: String,
    pub nbf: i64,
}

/// Sign a certificate binding `root_key` with the identity key, valid from `now - 60s` to `now + 48h`
pub fn self_signed_certificate(
    identity: &IdentityKeyPair,
    root_key: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let issued_at = now.timestamp();
    let header = CertificateHeader {
        alg: "ES384".to_string(),
        x5u: identity.public_key_base64()?,
    };
    let claims = CertificateClaims {
        certificate_authority: true,
        exp: issued_at + minecraft::CERTIFICATE_LIFETIME_SECS,
        identity_public_key: root_key.to_string(),
        nbf: issued_at - minecraft::CERTIFICATE_NOT_BEFORE_SKEW_SECS,
    };

    let header = serde_json::to_vec(&header)
        .map_err(|e| AuthError::SigningFailed(format!("cannot encode header: {}", e)))?;
    let claims = serde_json::to_vec(&claims)
        .map_err(|e| AuthError::SigningFailed(format!("cannot encode claims: {}", e)))?;

    let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));
    let signature = identity.sign(signing_input.as_bytes())?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

/// Player identity carried in the last token of a chain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityClaims {
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Player UUID
    pub identity: String,
    #[serde(rename = "XUID", default)]
    pub xuid: Option<String>,
}

#[derive(Deserialize)]
struct ExtraDataPayload {
    #[serde(rename = "extraData")]
    extra_data: IdentityClaims,
}

/// Ordered certificate chain, serialized as `{"chain": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateChain {
    chain: Vec<String>,
}

impl CertificateChain {
    /// Place the self-signed certificate ahead of the server-issued tokens
    pub fn assemble(self_signed: String, server_chain: Vec<String>) -> Self {
        let mut chain = Vec::with_capacity(server_chain.len() + 1);
        chain.push(self_signed);
        chain.extend(server_chain);
        Self { chain }
    }

    pub fn tokens(&self) -> &[String] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Player identity from the last token, decoded without verification
    pub fn identity(&self) -> Option<IdentityClaims> {
        let (_, payload, _) = split_compact(self.chain.last()?)?;
        decode_segment::<ExtraDataPayload>(payload).map(|p| p.extra_data)
    }
}

/// Builds the login chain once and hands out the cached result afterwards
///
/// The whole network flow (device code, Xbox Live, chain request) runs at most
/// once per builder. Concurrent first callers wait for the same attempt and
/// observe its result, success or failure. A failed attempt caches nothing, so
/// a call made after it starts over.
pub struct ChainBuilder {
    http: Client,
    clock: Arc<dyn Clock>,
    device_code: DeviceCodeClient,
    exchanger: XboxLiveExchanger,
    identity: IdentityKeyPair,
    client_id: String,
    scope: String,
    client_version: String,
    user_agent: String,
    root_public_key: String,
    authentication_url: String,
    chain: OnceCell<CertificateChain>,
    /// Bumped after every failed attempt
    generation: AtomicU64,
    attempt: Mutex<Option<Arc<AuthError>>>,
}

impl ChainBuilder {
    pub fn new(config: AuthConfig, presenter: Arc<dyn ConsentPresenter>) -> Result<Self> {
        Self::with_clock(config, presenter, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AuthConfig,
        presenter: Arc<dyn ConsentPresenter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = config.http_client().map_err(AuthError::HttpClient)?;
        let device_code = DeviceCodeClient::new(&config, http.clone(), clock.clone(), presenter);
        let exchanger = XboxLiveExchanger::new(&config, http.clone(), clock.clone());

        Ok(Self {
            http,
            clock,
            device_code,
            exchanger,
            identity: IdentityKeyPair::generate(),
            client_id: config.client_id,
            scope: config.scope,
            client_version: config.client_version,
            user_agent: config.user_agent,
            root_public_key: config.root_public_key,
            authentication_url: config.endpoints.minecraft_authentication,
            chain: OnceCell::new(),
            generation: AtomicU64::new(0),
            attempt: Mutex::new(None),
        })
    }

    /// Use a specific identity key instead of a generated one
    pub fn with_identity_key(mut self, identity: IdentityKeyPair) -> Self {
        self.identity = identity;
        self
    }

    pub fn identity_key(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// The login chain, building it on first access
    pub async fn authorization_chain(&self) -> SharedResult<&CertificateChain> {
        self.authorization_chain_with_cancel(&CancellationToken::new()).await
    }

    /// Same as [`Self::authorization_chain`], giving up with `Cancelled` once `cancel` fires
    ///
    /// `cancel` only affects this call. A later call with a fresh token starts
    /// a new attempt.
    pub async fn authorization_chain_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> SharedResult<&CertificateChain> {
        if let Some(chain) = self.chain.get() {
            return Ok(chain);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let mut last_failure = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Arc::new(AuthError::Cancelled)),
            guard = self.attempt.lock() => guard,
        };

        if let Some(chain) = self.chain.get() {
            return Ok(chain);
        }
        // An attempt finished while this caller was queued behind it
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(error) = &*last_failure {
                return Err(error.clone());
            }
        }

        match self.build_chain(cancel).await {
            Ok(chain) => {
                *last_failure = None;
                Ok(self.chain.get_or_init(|| async move { chain }).await)
            }
            Err(error) => {
                let error = Arc::new(error);
                *last_failure = Some(error.clone());
                self.generation.fetch_add(1, Ordering::AcqRel);
                Err(error)
            }
        }
    }

    /// The cached chain, if a previous call built it
    pub fn cached_chain(&self) -> Option<&CertificateChain> {
        self.chain.get()
    }

    #[instrument(skip_all)]
    async fn build_chain(&self, cancel: &CancellationToken) -> Result<CertificateChain> {
        info!("Starting Minecraft authorization");

        let authorization = {
            let access_token = self
                .device_code
                .acquire_access_token_with_cancel(&self.client_id, &self.scope, cancel)
                .await?;
            self.exchanger.exchange(&access_token.access_token).await?
        };

        let server_chain = self.request_server_chain(&authorization).await?;
        let certificate = self_signed_certificate(&self.identity, &self.root_public_key, self.clock.now())?;
        let chain = CertificateChain::assemble(certificate, server_chain);

        match chain.identity() {
            Some(identity) => info!("Successfully logged in as {}", identity.display_name),
            None => info!("Successfully built login chain"),
        }
        Ok(chain)
    }

    /// Ask the multiplayer service to issue a chain for the identity key
    #[instrument(skip_all)]
    pub async fn request_server_chain(&self, authorization: &str) -> Result<Vec<String>> {
        let request = McAuthenticationRequest {
            identity_public_key: self.identity.public_key_base64()?,
        };

        debug!("Requesting Minecraft certificate chain");
        let response = self
            .http
            .post(&self.authentication_url)
            .header("User-Agent", &self.user_agent)
            .header("Client-Version", &self.client_version)
            .header("Authorization", authorization)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::ChainRequestFailed(e.into()))?;

        if !response.status().is_success() {
            return Err(AuthError::ChainRequestFailed(
                RequestError::from_response(response).await,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::ChainRequestFailed(e.into()))?;
        let authentication: McAuthenticationResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::ChainRequestFailed(e.into()))?;

        debug!(tokens = authentication.chain.len(), "Received certificate chain");
        Ok(authentication.chain)
    }
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("client_version", &self.client_version)
            .field("cached", &self.chain.initialized())
            .finish_non_exhaustive()
    }
}
