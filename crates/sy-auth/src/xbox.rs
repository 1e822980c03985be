//! Xbox Live device authentication and SISU user authorization

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::config::{xbox, AuthConfig};
use crate::errors::{AuthError, ExchangeStep, RequestError, Result, XstsError};
use crate::models::*;
use crate::signature::{DeviceKeyPair, RequestSigner};

/// Proof that the device key is registered with Xbox Live
///
/// Consumed by [`XboxLiveExchanger::authorize`].
#[derive(Debug)]
pub struct DeviceToken(String);

/// XSTS-equivalent authorization for the Minecraft multiplayer relying party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthorization {
    pub user_hash: String,
    pub token: String,
    pub xuid: Option<String>,
    pub gamertag: Option<String>,
}

impl UserAuthorization {
    /// `XBL3.0 x=<uhs>;<token>`
    pub fn into_header(self) -> String {
        format!("XBL3.0 x={};{}", self.user_hash, self.token)
    }
}

/// Performs the signed Xbox Live exchange
#[derive(Clone)]
pub struct XboxLiveExchanger {
    http: Client,
    clock: Arc<dyn Clock>,
    device_authenticate_url: String,
    sisu_authorize_url: String,
    app_id: String,
    sandbox: String,
    relying_party: String,
    device_type: String,
    device_version: String,
}

impl XboxLiveExchanger {
    pub fn new(config: &AuthConfig, http: Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            clock,
            device_authenticate_url: config.endpoints.device_authenticate.clone(),
            sisu_authorize_url: config.endpoints.sisu_authorize.clone(),
            app_id: config.app_id.clone(),
            sandbox: config.sandbox.clone(),
            relying_party: config.relying_party.clone(),
            device_type: config.device_type.clone(),
            device_version: config.device_version.clone(),
        }
    }

    /// Exchange a Microsoft access token for the composite Xbox Live header
    ///
    /// A fresh device key pair signs both requests of this exchange.
    pub async fn exchange(&self, access_token: &str) -> Result<String> {
        self.exchange_with_key(access_token, DeviceKeyPair::generate())
            .await
    }

    #[instrument(skip_all)]
    pub async fn exchange_with_key(&self, access_token: &str, key: DeviceKeyPair) -> Result<String> {
        let signer = RequestSigner::new(key, self.clock.clone());

        let device_token = self.authenticate_device(&signer).await?;
        let authorization = self.authorize(&signer, access_token, device_token).await?;
        debug!(
            xuid = authorization.xuid.as_deref().unwrap_or_default(),
            gamertag = authorization.gamertag.as_deref().unwrap_or_default(),
            "Xbox Live authorization complete"
        );

        Ok(authorization.into_header())
    }

    /// Register the signer's device key and obtain a device token
    #[instrument(skip_all)]
    pub async fn authenticate_device(&self, signer: &RequestSigner) -> Result<DeviceToken> {
        const STEP: ExchangeStep = ExchangeStep::DeviceAuthenticate;

        let request = DeviceAuthRequest {
            relying_party: xbox::RP_XBOXLIVE_AUTH.to_string(),
            token_type: "JWT".to_string(),
            properties: DeviceAuthProperties {
                auth_method: "ProofOfPossession".to_string(),
                id: format!("{{{}}}", uuid::Uuid::new_v4()),
                device_type: self.device_type.clone(),
                version: self.device_version.clone(),
                proof_key: signer.key().proof_key(),
            },
        };

        debug!("Authenticating device with Xbox Live");
        let response = self
            .send_signed(STEP, signer, self.http.post(&self.device_authenticate_url).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(exchange_failed(STEP, RequestError::from_response(response).await));
        }

        let device: DeviceAuthResponse = read_json(STEP, response).await?;
        Ok(DeviceToken(device.token))
    }

    /// Authorize the user for the configured relying party through SISU
    #[instrument(skip_all)]
    pub async fn authorize(
        &self,
        signer: &RequestSigner,
        access_token: &str,
        device_token: DeviceToken,
    ) -> Result<UserAuthorization> {
        const STEP: ExchangeStep = ExchangeStep::Authorize;

        let request = SisuAuthorizeRequest {
            access_token: format!("t={}", access_token),
            app_id: self.app_id.clone(),
            device_token: device_token.0,
            sandbox: self.sandbox.clone(),
            use_modern_gamertag: true,
            site_name: xbox::SITE_NAME.to_string(),
            relying_party: self.relying_party.clone(),
            proof_key: signer.key().proof_key(),
        };

        debug!("Authorizing with SISU");
        let response = self
            .send_signed(STEP, signer, self.http.post(&self.sisu_authorize_url).json(&request))
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            let source: RequestError = match serde_json::from_str::<XstsErrorResponse>(&body) {
                Ok(error) => XstsError::from_xerr(error.xerr).into(),
                Err(_) => RequestError::Http {
                    status: StatusCode::UNAUTHORIZED,
                    body_snippet: body.chars().take(200).collect(),
                },
            };
            return Err(exchange_failed(STEP, source));
        }
        if !response.status().is_success() {
            return Err(exchange_failed(STEP, RequestError::from_response(response).await));
        }

        let authorize: SisuAuthorizeResponse = read_json(STEP, response).await?;
        let token = authorize.authorization_token;
        let user = token
            .display_claims
            .xui
            .into_iter()
            .next()
            .ok_or(AuthError::XboxLiveClaimMissing)?;

        Ok(UserAuthorization {
            user_hash: user.uhs,
            token: token.token,
            xuid: user.xid,
            gamertag: user.gtg,
        })
    }

    async fn send_signed(
        &self,
        step: ExchangeStep,
        signer: &RequestSigner,
        builder: RequestBuilder,
    ) -> Result<Response> {
        let mut request = builder
            .header("x-xbl-contract-version", xbox::CONTRACT_VERSION)
            .header("Accept", "application/json")
            .build()
            .map_err(|e| exchange_failed(step, e.into()))?;

        signer.sign_request(&mut request)?;

        self.http
            .execute(request)
            .await
            .map_err(|e| exchange_failed(step, e.into()))
    }
}

fn exchange_failed(step: ExchangeStep, source: RequestError) -> AuthError {
    AuthError::XboxLiveExchangeFailed { step, source }
}

async fn read_json<T: DeserializeOwned>(step: ExchangeStep, response: Response) -> Result<T> {
    let body = response
        .text()
        .await
        .map_err(|e| exchange_failed(step, e.into()))?;
    serde_json::from_str(&body).map_err(|e| exchange_failed(step, e.into()))
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::SigningKey;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::config::Endpoints;
    use crate::signature::{self, filetime_from_unix_millis, SignatureInput, SIGNATURE_HEADER};

    const NOW_MILLIS: i64 = 1_700_000_000_000;

    fn fixed_key() -> DeviceKeyPair {
        DeviceKeyPair::from_signing_key(SigningKey::from_slice(&[3u8; 32]).unwrap())
    }

    async fn setup() -> (MockServer, XboxLiveExchanger) {
        let server = MockServer::start().await;
        let config = AuthConfig::new("1.21.50").with_endpoints(Endpoints::with_base(&server.uri()));
        let exchanger = XboxLiveExchanger::new(
            &config,
            config.http_client().unwrap(),
            Arc::new(ManualClock::at_millis(NOW_MILLIS)),
        );
        (server, exchanger)
    }

    async fn mount_device_ok(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/device/authenticate"))
            .and(header("x-xbl-contract-version", "1"))
            .and(header_exists("Signature"))
            .and(body_partial_json(json!({
                "RelyingParty": "http://auth.xboxlive.com",
                "TokenType": "JWT",
                "Properties": {
                    "AuthMethod": "ProofOfPossession",
                    "DeviceType": "Android",
                    "Version": "10",
                    "ProofKey": { "crv": "P-256", "alg": "ES256", "use": "sig", "kty": "EC" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IssueInstant": "2024-01-01T00:00:00Z",
                "NotAfter": "2024-01-15T00:00:00Z",
                "Token": "device-token",
                "DisplayClaims": { "xdi": { "did": "F0", "dcs": "0" } }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn authorize_body(xui: serde_json::Value) -> serde_json::Value {
        json!({
            "DeviceToken": "device-token",
            "TitleToken": { "Token": "title" },
            "UserToken": { "Token": "user" },
            "AuthorizationToken": {
                "DisplayClaims": { "xui": xui },
                "IssueInstant": "2024-01-01T00:00:00Z",
                "NotAfter": "2024-01-02T00:00:00Z",
                "Token": "xsts-token"
            },
            "WebPage": "https://sisu.xboxlive.com/client/v28/0000000048183522/view/index.html",
            "Sandbox": "RETAIL",
            "UseModernGamertag": true
        })
    }

    #[tokio::test]
    async fn test_exchange_builds_composite_header() {
        let (server, exchanger) = setup().await;
        mount_device_ok(&server).await;

        Mock::given(method("POST"))
            .and(path("/authorize"))
            .and(header_exists("Signature"))
            .and(body_partial_json(json!({
                "AccessToken": "t=ms-token",
                "AppId": "0000000048183522",
                "deviceToken": "device-token",
                "Sandbox": "RETAIL",
                "RelyingParty": "https://multiplayer.minecraft.net/",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorize_body(json!([
                { "gtg": "Steve", "xid": "2535400000000000", "uhs": "1234567890" }
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let header = exchanger.exchange_with_key("ms-token", fixed_key()).await.unwrap();
        assert_eq!(header, "XBL3.0 x=1234567890;xsts-token");
    }

    #[tokio::test]
    async fn test_requests_carry_valid_signature() {
        let (server, exchanger) = setup().await;
        mount_device_ok(&server).await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorize_body(json!([
                { "uhs": "1" }
            ]))))
            .mount(&server)
            .await;

        exchanger.exchange_with_key("ms-token", fixed_key()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests {
            let expected = signature::sign(
                &fixed_key(),
                &SignatureInput {
                    method: "POST",
                    path: request.url.path(),
                    authorization: None,
                    body: &request.body,
                },
                filetime_from_unix_millis(NOW_MILLIS),
            )
            .unwrap();
            assert_eq!(request.headers[SIGNATURE_HEADER].to_str().unwrap(), expected);

            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            assert!(body["ProofKey"].is_object() || body["Properties"]["ProofKey"].is_object());
        }
    }

    #[tokio::test]
    async fn test_device_step_failure() {
        let (server, exchanger) = setup().await;
        Mock::given(method("POST"))
            .and(path("/device/authenticate"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = exchanger.exchange("ms-token").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::XboxLiveExchangeFailed {
                step: ExchangeStep::DeviceAuthenticate,
                source: RequestError::Http { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_authorize_denied_with_xerr() {
        let (server, exchanger) = setup().await;
        mount_device_ok(&server).await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "Identity": "0",
                "XErr": 2148916233u64,
                "Message": "",
                "Redirect": "https://start.ui.xboxlive.com/CreateAccount"
            })))
            .mount(&server)
            .await;

        let err = exchanger.exchange_with_key("ms-token", fixed_key()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::XboxLiveExchangeFailed {
                step: ExchangeStep::Authorize,
                source: RequestError::XstsDenied(XstsError::NoXboxAccount)
            }
        ));
    }

    #[tokio::test]
    async fn test_authorize_without_claims() {
        let (server, exchanger) = setup().await;
        mount_device_ok(&server).await;
        Mock::given(method("POST"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorize_body(json!([]))))
            .mount(&server)
            .await;

        let err = exchanger.exchange_with_key("ms-token", fixed_key()).await.unwrap_err();
        assert!(matches!(err, AuthError::XboxLiveClaimMissing));
    }

    #[tokio::test]
    async fn test_malformed_device_response() {
        let (server, exchanger) = setup().await;
        Mock::given(method("POST"))
            .and(path("/device/authenticate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = exchanger.exchange("ms-token").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::XboxLiveExchangeFailed {
                step: ExchangeStep::DeviceAuthenticate,
                source: RequestError::Decode(_)
            }
        ));
    }

    #[test]
    fn test_composite_header_format() {
        let authorization = UserAuthorization {
            user_hash: "uhs".to_string(),
            token: "tok".to_string(),
            xuid: None,
            gamertag: None,
        };
        assert_eq!(authorization.into_header(), "XBL3.0 x=uhs;tok");
    }
}
