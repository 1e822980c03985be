//! OAuth2 device authorization grant against login.live.com

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::{live, AuthConfig};
use crate::errors::{AuthError, RequestError, Result};
use crate::models::{AccessToken, DeviceCodeResponse, OAuthErrorResponse};

/// What the user needs to approve the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodePrompt {
    pub verification_uri: String,
    pub user_code: String,
    pub expires_in: u64,
}

/// Shows the verification URI and user code to the human
///
/// Presentation is fire-and-forget; completion is detected by polling alone.
pub trait ConsentPresenter: Send + Sync {
    fn present(&self, prompt: &DeviceCodePrompt);
}

/// Presenter that only logs the prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsentPresenter;

impl ConsentPresenter for LogConsentPresenter {
    fn present(&self, prompt: &DeviceCodePrompt) {
        info!("Go to {}", prompt.verification_uri);
        info!("Enter code {}", prompt.user_code);
    }
}

/// State of one device code grant attempt
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds between polls, as dictated by the server
    pub interval: u64,
    /// Seconds until the device code expires
    pub expires_in: u64,
    pub poll_count: u64,
}

impl DeviceCodeSession {
    fn from_response(response: DeviceCodeResponse) -> Self {
        Self {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            interval: response.interval,
            expires_in: response.expires_in,
            poll_count: 0,
        }
    }

    /// Poll budget: `expires_in / interval`, truncated. A zero interval counts as one second.
    pub fn max_polls(&self) -> u64 {
        self.expires_in / self.interval.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn prompt(&self) -> DeviceCodePrompt {
        DeviceCodePrompt {
            verification_uri: self.verification_uri.clone(),
            user_code: self.user_code.clone(),
            expires_in: self.expires_in,
        }
    }
}

/// Client for the device code grant
#[derive(Clone)]
pub struct DeviceCodeClient {
    http: Client,
    connect_url: String,
    token_url: String,
    clock: Arc<dyn Clock>,
    presenter: Arc<dyn ConsentPresenter>,
}

impl DeviceCodeClient {
    pub fn new(
        config: &AuthConfig,
        http: Client,
        clock: Arc<dyn Clock>,
        presenter: Arc<dyn ConsentPresenter>,
    ) -> Self {
        Self {
            http,
            connect_url: config.endpoints.live_connect.clone(),
            token_url: config.endpoints.live_token.clone(),
            clock,
            presenter,
        }
    }

    /// Run the whole grant: request a code, present it, poll until approved or expired
    pub async fn acquire_access_token(&self, client_id: &str, scope: &str) -> Result<AccessToken> {
        self.acquire_access_token_with_cancel(client_id, scope, &CancellationToken::new())
            .await
    }

    /// Same as [`Self::acquire_access_token`], aborting with `Cancelled` once `cancel` fires
    #[instrument(skip(self, cancel))]
    pub async fn acquire_access_token_with_cancel(
        &self,
        client_id: &str,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken> {
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let mut session = self.request_device_code(client_id, scope).await?;
        self.presenter.present(&session.prompt());
        self.poll_for_token(&mut session, client_id, cancel).await
    }

    /// Ask the identity provider for a device code
    #[instrument(skip(self))]
    pub async fn request_device_code(&self, client_id: &str, scope: &str) -> Result<DeviceCodeSession> {
        debug!("Requesting device code");
        let response = self
            .http
            .post(&self.connect_url)
            .form(&[
                ("client_id", client_id),
                ("scope", scope),
                ("response_type", "device_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::DeviceCodeRequestFailed(e.into()))?;

        if !response.status().is_success() {
            return Err(AuthError::DeviceCodeRequestFailed(
                RequestError::from_response(response).await,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::DeviceCodeRequestFailed(e.into()))?;
        let device_code: DeviceCodeResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::DeviceCodeRequestFailed(e.into()))?;

        let session = DeviceCodeSession::from_response(device_code);
        debug!(
            interval = session.interval,
            expires_in = session.expires_in,
            max_polls = session.max_polls(),
            "Received device code"
        );
        Ok(session)
    }

    /// Poll the token endpoint at the server-dictated interval
    ///
    /// The first poll happens immediately; each following one waits `interval` seconds.
    #[instrument(skip_all, fields(max_polls = session.max_polls()))]
    pub async fn poll_for_token(
        &self,
        session: &mut DeviceCodeSession,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken> {
        let max_polls = session.max_polls();
        let interval = session.poll_interval();

        while session.poll_count < max_polls {
            if session.poll_count > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                    _ = self.clock.sleep(interval) => {}
                }
            }

            session.poll_count += 1;
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                attempt = self.poll_once(&session.device_code, client_id) => attempt?,
            };

            if let Some(token) = attempt {
                info!(polls = session.poll_count, "Device authorized");
                return Ok(token);
            }
        }

        warn!(attempts = session.poll_count, "Device code expired before authorization");
        Err(AuthError::DeviceCodeExpired {
            attempts: session.poll_count,
        })
    }

    /// One token request; `None` means not authorized yet
    async fn poll_once(&self, device_code: &str, client_id: &str) -> Result<Option<AccessToken>> {
        let response = match self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id),
                ("grant_type", live::DEVICE_CODE_GRANT),
                ("device_code", device_code),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Device code poll failed: {}", e);
                return Ok(None);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::OK {
            let token: AccessToken = serde_json::from_str(&body)
                .map_err(|e| AuthError::DeviceCodeRequestFailed(e.into()))?;
            return Ok(Some(token));
        }

        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(error) => debug!(
                %status,
                error = %error.error,
                correlation_id = error.correlation_id.as_deref().unwrap_or_default(),
                "Device not authorized yet"
            ),
            Err(_) => debug!(%status, "Device not authorized yet"),
        }
        Ok(None)
    }
}
